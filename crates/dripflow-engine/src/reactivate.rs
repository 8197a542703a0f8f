//! Reply reactivation — an inbound message from a contact stamps
//! `lead_last_message_at` on every active subscription, and restarts
//! follow-up sequences flagged `restart_on_reply` from step 0.

use std::sync::Arc;

use chrono::Utc;
use dripflow_core::error::Result;
use dripflow_core::traits::{DefinitionStore, RuntimeStore};
use dripflow_core::types::SubscriptionState;

use crate::enroll::initial_next_step_at;

/// Handles inbound replies.
pub struct ReplyReactivator {
    definitions: Arc<dyn DefinitionStore>,
    runtime: Arc<dyn RuntimeStore>,
}

impl ReplyReactivator {
    pub fn new(definitions: Arc<dyn DefinitionStore>, runtime: Arc<dyn RuntimeStore>) -> Self {
        Self { definitions, runtime }
    }

    /// Process one inbound reply from a contact. Returns how many
    /// subscriptions were restarted.
    pub async fn on_reply(&self, contact_id: &str) -> Result<usize> {
        let now = Utc::now();
        let subscriptions = self
            .runtime
            .active_subscriptions_for_contact(contact_id)
            .await?;

        let mut restarted = 0;
        for mut sub in subscriptions {
            sub.lead_last_message_at = Some(now);

            let restart = match self.definitions.sequence(&sub.sequence_id).await {
                Ok(Some(sequence)) => sequence.is_follow_up && sequence.restart_on_reply,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(
                        "Subscription {}: sequence load failed on reply: {e}",
                        sub.id
                    );
                    false
                }
            };

            if restart {
                match self.definitions.steps(&sub.sequence_id).await {
                    Ok(steps) => match initial_next_step_at(&steps, now) {
                        Ok(next_step_at) => {
                            sub.current_step = 0;
                            sub.started_at = now;
                            sub.state = SubscriptionState::Active { next_step_at };
                            restarted += 1;
                            tracing::info!(
                                "Reply from {contact_id}: restarted subscription {} at step 0",
                                sub.id
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Subscription {}: restart schedule failed: {e}", sub.id)
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Subscription {}: steps load failed on reply: {e}", sub.id)
                    }
                }
            }

            // Per-subscription isolation: a bad row must not block the rest.
            if let Err(e) = self.runtime.update_subscription(&sub).await {
                tracing::warn!("Subscription {}: reply update failed: {e}", sub.id);
            }
        }
        Ok(restarted)
    }
}
