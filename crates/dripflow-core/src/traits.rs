//! Store and gateway seams.
//!
//! The sequence definitions and the per-contact runtime state live in two
//! independently-owned databases with no join or shared transaction between
//! them, so each side gets its own trait and all composition happens in the
//! engine. The gateway is a trait for the same reason: tests substitute a
//! recording double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Connection, Contact, Conversation, MediaKind, MessageContent, Sequence, Step, Subscription,
    TriggerKind,
};

/// Read-mostly store holding tenant campaign configuration.
///
/// The engine only ever writes the two best-effort counters.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn sequence(&self, id: &str) -> Result<Option<Sequence>>;

    /// Active sequences on a connection with the given trigger kind.
    async fn sequences_for_trigger(
        &self,
        connection_id: &str,
        kind: TriggerKind,
    ) -> Result<Vec<Sequence>>;

    /// All steps of a sequence ordered by `order_index`, inactive included.
    /// The runner skips inactive steps by advancing past them.
    async fn steps(&self, sequence_id: &str) -> Result<Vec<Step>>;

    async fn connection(&self, id: &str) -> Result<Option<Connection>>;

    /// Reusable template payload, if the id resolves.
    async fn template_content(&self, template_id: &str) -> Result<Option<MessageContent>>;

    /// Inline automation-reply payload, if the id resolves.
    async fn automation_content(&self, automation_id: &str) -> Result<Option<MessageContent>>;

    /// Best-effort subscriber counter bump; drift is tolerated.
    async fn increment_subscriber_count(&self, sequence_id: &str) -> Result<()>;

    /// Best-effort per-step sent counter bump.
    async fn increment_step_sent_count(&self, step_id: &str) -> Result<()>;
}

/// Store holding the engine's mutable state plus contact/conversation reads.
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Persist the full current state of an existing subscription row.
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Most recent subscription row for (sequence, contact), any state.
    async fn find_subscription(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Active subscriptions whose `next_step_at` has passed, oldest first,
    /// bounded by `limit`.
    async fn due_subscriptions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Subscription>>;

    /// All active subscriptions of a contact (reply handling).
    async fn active_subscriptions_for_contact(&self, contact_id: &str)
        -> Result<Vec<Subscription>>;

    async fn contact(&self, id: &str) -> Result<Option<Contact>>;

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>>;
}

/// Outbound messaging gateway.
///
/// Implementations must surface non-2xx responses as errors so the runner can
/// leave state untouched and retry on the next poll.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Send a text message; returns the provider message id.
    async fn send_text(&self, connection: &Connection, recipient: &str, body: &str)
        -> Result<String>;

    /// Send a media message; returns the provider message id.
    async fn send_media(
        &self,
        connection: &Connection,
        recipient: &str,
        kind: MediaKind,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String>;
}
