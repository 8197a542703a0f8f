//! Subscription runner — executes exactly one due subscription.
//!
//! State is only persisted after the decisive action of the cycle succeeds,
//! so a failed send leaves `current_step`/`next_step_at` untouched and the
//! same step retries on the next poll.

use std::sync::Arc;

use chrono::Utc;
use dripflow_core::error::{DripflowError, Result};
use dripflow_core::timing::next_eligible;
use dripflow_core::traits::{DefinitionStore, MessageGateway, RuntimeStore};
use dripflow_core::types::{MessageContent, Step, Subscription, SubscriptionState};

use crate::content;

/// What a runner cycle did to the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Step list exhausted; subscription is now terminal.
    Completed,
    /// Moved to the next step (with or without a send).
    Advanced,
    /// Conversation is agent-paused; re-deferred without sending.
    Deferred,
}

/// Executes due subscriptions.
pub struct SubscriptionRunner {
    definitions: Arc<dyn DefinitionStore>,
    runtime: Arc<dyn RuntimeStore>,
    gateway: Arc<dyn MessageGateway>,
    /// Re-defer delay while a human agent is engaged.
    pause_defer: chrono::Duration,
}

impl SubscriptionRunner {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runtime: Arc<dyn RuntimeStore>,
        gateway: Arc<dyn MessageGateway>,
        pause_defer_secs: u64,
    ) -> Self {
        Self {
            definitions,
            runtime,
            gateway,
            pause_defer: chrono::Duration::seconds(pause_defer_secs as i64),
        }
    }

    /// Run one cycle for a due subscription.
    ///
    /// On `Err` no state was persisted; the unchanged `next_step_at` makes
    /// the scheduler retry on its next poll.
    pub async fn run(&self, subscription: &Subscription) -> Result<RunOutcome> {
        let mut sub = subscription.clone();

        let sequence = self
            .definitions
            .sequence(&sub.sequence_id)
            .await?
            .ok_or_else(|| {
                DripflowError::Config(format!("sequence {} not found", sub.sequence_id))
            })?;
        let steps = self.definitions.steps(&sequence.id).await?;

        // Terminal check first: idempotent even if picked up twice.
        let index = sub.current_step.max(0) as usize;
        if index >= steps.len() {
            return self.complete(&mut sub).await;
        }
        let step = &steps[index];

        // Inactive steps are skipped without sending.
        if !step.active {
            tracing::debug!("Subscription {}: step {} inactive, skipping", sub.id, step.id);
            return self.advance(&mut sub, &steps).await;
        }

        // Back-pressure: never send into a conversation a human is handling.
        if let Some(conversation_id) = &sub.conversation_id {
            if let Some(conversation) = self.runtime.conversation(conversation_id).await? {
                if conversation.agent_paused {
                    let deferred_to = Utc::now() + self.pause_defer;
                    sub.state = SubscriptionState::Active { next_step_at: Some(deferred_to) };
                    self.runtime.update_subscription(&sub).await?;
                    tracing::info!(
                        "Subscription {}: conversation {} agent-paused, deferred to {}",
                        sub.id,
                        conversation_id,
                        deferred_to
                    );
                    return Ok(RunOutcome::Deferred);
                }
            }
        }

        // Prerequisites; aborting here leaves state untouched for retry.
        let contact = self.runtime.contact(&sub.contact_id).await?.ok_or_else(|| {
            DripflowError::Config(format!("contact {} not found", sub.contact_id))
        })?;
        let connection = self
            .definitions
            .connection(&sub.connection_id)
            .await?
            .ok_or_else(|| {
                DripflowError::Config(format!("connection {} not found", sub.connection_id))
            })?;
        if connection
            .access_token
            .as_deref()
            .is_none_or(|t| t.is_empty())
        {
            return Err(DripflowError::AuthFailed(format!(
                "connection {} has no gateway token",
                connection.id
            )));
        }

        match content::resolve(self.definitions.as_ref(), step).await? {
            Some(content) => {
                let message_id = match &content {
                    MessageContent::Text { body } => {
                        self.gateway.send_text(&connection, &contact.wa_id, body).await?
                    }
                    MessageContent::Media { kind, url, caption } => {
                        self.gateway
                            .send_media(&connection, &contact.wa_id, *kind, url, caption.as_deref())
                            .await?
                    }
                };
                tracing::info!(
                    "Subscription {}: step {} sent to {} ({message_id})",
                    sub.id,
                    step.order_index,
                    contact.wa_id
                );
                // Best-effort counter, after the send succeeded.
                if let Err(e) = self.definitions.increment_step_sent_count(&step.id).await {
                    tracing::warn!("Sent counter bump failed for step {}: {e}", step.id);
                }
            }
            None => {
                tracing::warn!(
                    "Subscription {}: step {} has no resolvable content, advancing",
                    sub.id,
                    step.id
                );
            }
        }

        self.advance(&mut sub, &steps).await
    }

    /// Shared step advancement: move to the next step or complete.
    async fn advance(&self, sub: &mut Subscription, steps: &[Step]) -> Result<RunOutcome> {
        let next_index = sub.current_step + 1;
        match steps.get(next_index as usize) {
            None => {
                sub.current_step = next_index;
                self.complete(sub).await
            }
            Some(next_step) => {
                let next_at = next_eligible(next_step.delay, &next_step.schedule, Utc::now())?;
                sub.current_step = next_index;
                sub.state = SubscriptionState::Active { next_step_at: Some(next_at) };
                self.runtime.update_subscription(sub).await?;
                Ok(RunOutcome::Advanced)
            }
        }
    }

    async fn complete(&self, sub: &mut Subscription) -> Result<RunOutcome> {
        // Already-terminal rows are left as-is.
        if sub.state.is_active() {
            sub.state = SubscriptionState::Completed { completed_at: Utc::now() };
            self.runtime.update_subscription(sub).await?;
            tracing::info!("Subscription {} completed", sub.id);
        }
        Ok(RunOutcome::Completed)
    }
}
