//! Enrollment — decides which sequences a trigger event enrolls a contact
//! into, and creates or reactivates the subscription rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dripflow_core::error::Result;
use dripflow_core::timing::next_eligible;
use dripflow_core::traits::{DefinitionStore, RuntimeStore};
use dripflow_core::types::{
    Sequence, SequenceTrigger, Step, Subscription, SubscriptionState, TriggerEvent, TriggerPayload,
};

/// Handles trigger events and subscription creation.
pub struct EnrollmentManager {
    definitions: Arc<dyn DefinitionStore>,
    runtime: Arc<dyn RuntimeStore>,
}

impl EnrollmentManager {
    pub fn new(definitions: Arc<dyn DefinitionStore>, runtime: Arc<dyn RuntimeStore>) -> Self {
        Self { definitions, runtime }
    }

    /// Evaluate a trigger event: enroll the contact into every matching
    /// active sequence on the connection. Returns ids of the subscriptions
    /// that were created or reactivated.
    pub async fn handle_event(&self, event: &TriggerEvent) -> Result<Vec<String>> {
        let candidates = self
            .definitions
            .sequences_for_trigger(&event.connection_id, event.payload.trigger_kind())
            .await?;

        let mut enrolled = Vec::new();
        for sequence in candidates {
            if !matches(&sequence.trigger, &event.payload) {
                continue;
            }
            match self.enroll(&sequence, event).await {
                Ok(Some(subscription)) => enrolled.push(subscription.id),
                Ok(None) => {}
                Err(e) => {
                    // One sequence's failure must not block the others.
                    tracing::warn!("Enroll into sequence {} failed: {e}", sequence.id);
                }
            }
        }
        Ok(enrolled)
    }

    /// Enroll a contact into one sequence. Idempotent: an existing active
    /// subscription is left untouched. A terminal row (completed or
    /// unsubscribed) is reactivated in place, preserving history fields.
    pub async fn enroll(
        &self,
        sequence: &Sequence,
        event: &TriggerEvent,
    ) -> Result<Option<Subscription>> {
        let existing = self
            .runtime
            .find_subscription(&sequence.id, &event.contact_id)
            .await?;

        if let Some(sub) = &existing {
            if sub.state.is_active() {
                tracing::debug!(
                    "Contact {} already active in sequence {}, skipping",
                    event.contact_id,
                    sequence.id
                );
                return Ok(None);
            }
        }

        let steps = self.definitions.steps(&sequence.id).await?;
        let next_step_at = initial_next_step_at(&steps, Utc::now())?;

        let subscription = match existing {
            Some(mut prior) => {
                prior.current_step = 0;
                prior.state = SubscriptionState::Active { next_step_at };
                prior.started_at = Utc::now();
                if prior.conversation_id.is_none() {
                    prior.conversation_id = event.conversation_id.clone();
                }
                self.runtime.update_subscription(&prior).await?;
                tracing::info!(
                    "Reactivated subscription {} (sequence {}, contact {})",
                    prior.id,
                    sequence.id,
                    event.contact_id
                );
                prior
            }
            None => {
                let sub = Subscription::new(
                    &sequence.id,
                    &event.contact_id,
                    &event.connection_id,
                    event.conversation_id.clone(),
                    next_step_at,
                );
                self.runtime.insert_subscription(&sub).await?;
                tracing::info!(
                    "Enrolled contact {} into sequence {} (next step {:?})",
                    event.contact_id,
                    sequence.id,
                    next_step_at
                );
                sub
            }
        };

        // Best-effort metric; drift is tolerated.
        if let Err(e) = self
            .definitions
            .increment_subscriber_count(&sequence.id)
            .await
        {
            tracing::warn!("Subscriber counter bump failed for {}: {e}", sequence.id);
        }

        Ok(Some(subscription))
    }

    /// Explicit unenrollment; permanently removes the subscription from
    /// scheduler consideration.
    pub async fn unenroll(&self, sequence_id: &str, contact_id: &str) -> Result<bool> {
        let Some(mut sub) = self.runtime.find_subscription(sequence_id, contact_id).await? else {
            return Ok(false);
        };
        if !sub.state.is_active() {
            return Ok(false);
        }
        sub.state = SubscriptionState::Unsubscribed;
        self.runtime.update_subscription(&sub).await?;
        tracing::info!("Unsubscribed contact {contact_id} from sequence {sequence_id}");
        Ok(true)
    }
}

/// Due-time for a fresh (or restarted) subscription: computed from the first
/// active step, None when the sequence has no usable steps.
pub(crate) fn initial_next_step_at(
    steps: &[Step],
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match steps.iter().find(|s| s.active) {
        Some(first) => Ok(Some(next_eligible(first.delay, &first.schedule, now)?)),
        None => Ok(None),
    }
}

/// Does the event satisfy the sequence's trigger parameters?
fn matches(trigger: &SequenceTrigger, payload: &TriggerPayload) -> bool {
    match (trigger, payload) {
        (SequenceTrigger::NewContact, TriggerPayload::ContactCreated) => true,
        (SequenceTrigger::HasTag { tag_id }, TriggerPayload::TagApplied { tag_id: applied }) => {
            tag_id == applied
        }
        (
            SequenceTrigger::HasOrigin { origin_id },
            TriggerPayload::OriginAssigned { origin_id: assigned },
        ) => origin_id == assigned,
        (SequenceTrigger::Keyword { keywords }, TriggerPayload::KeywordMatched { text }) => {
            let text = text.to_lowercase();
            keywords
                .iter()
                .any(|kw| !kw.is_empty() && text.contains(&kw.to_lowercase()))
        }
        _ => false,
    }
}
