//! Scheduler loop — the periodic driver that polls for due subscriptions
//! and hands each one to the runner.
//!
//! Single-writer by design: one scheduler instance per deployment. The
//! due-query does not take an atomic claim, so two concurrent loops against
//! the same runtime store could double-send.

use std::sync::Arc;

use chrono::Utc;
use dripflow_core::config::SchedulerConfig;
use dripflow_core::error::Result;
use dripflow_core::traits::{DefinitionStore, MessageGateway, RuntimeStore};

use crate::runner::{RunOutcome, SubscriptionRunner};

/// Per-tick processing counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub picked: usize,
    pub advanced: usize,
    pub completed: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The polling scheduler.
pub struct Scheduler {
    definitions: Arc<dyn DefinitionStore>,
    runtime: Arc<dyn RuntimeStore>,
    runner: SubscriptionRunner,
    poll_interval_secs: u64,
    batch_size: usize,
}

impl Scheduler {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runtime: Arc<dyn RuntimeStore>,
        gateway: Arc<dyn MessageGateway>,
        config: &SchedulerConfig,
    ) -> Self {
        let runner = SubscriptionRunner::new(
            definitions.clone(),
            runtime.clone(),
            gateway,
            config.pause_defer_secs,
        );
        Self {
            definitions,
            runtime,
            runner,
            poll_interval_secs: config.poll_interval_secs,
            batch_size: config.batch_size,
        }
    }

    /// One poll cycle: fetch due subscriptions and process each in
    /// isolation. No subscription's failure stops the batch.
    pub async fn tick(&self) -> Result<TickStats> {
        let due = self
            .runtime
            .due_subscriptions(Utc::now(), self.batch_size)
            .await?;

        let mut stats = TickStats { picked: due.len(), ..Default::default() };

        for subscription in due {
            // Paused campaigns stall rather than fail: skip without mutation.
            match self.definitions.sequence(&subscription.sequence_id).await {
                Ok(Some(sequence)) if sequence.active => {}
                Ok(Some(_)) => {
                    tracing::debug!(
                        "Subscription {}: sequence {} inactive, stalling",
                        subscription.id,
                        subscription.sequence_id
                    );
                    stats.skipped += 1;
                    continue;
                }
                Ok(None) => {
                    tracing::warn!(
                        "Subscription {}: sequence {} missing, skipping",
                        subscription.id,
                        subscription.sequence_id
                    );
                    stats.failed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Subscription {}: sequence load failed: {e}", subscription.id);
                    stats.failed += 1;
                    continue;
                }
            }

            match self.runner.run(&subscription).await {
                Ok(RunOutcome::Advanced) => stats.advanced += 1,
                Ok(RunOutcome::Completed) => stats.completed += 1,
                Ok(RunOutcome::Deferred) => stats.deferred += 1,
                Err(e) => {
                    // State untouched; the same row retries next poll.
                    tracing::warn!("Subscription {} cycle failed: {e}", subscription.id);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Run the polling loop forever. Spawn this on the runtime:
    /// `tokio::spawn(scheduler.run_loop())`.
    pub async fn run_loop(self: Arc<Self>) {
        tracing::info!(
            "Scheduler started (poll every {}s, batch {})",
            self.poll_interval_secs,
            self.batch_size
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(stats) if stats.picked > 0 => {
                    tracing::info!(
                        "Tick: {} due, {} advanced, {} completed, {} deferred, {} skipped, {} failed",
                        stats.picked,
                        stats.advanced,
                        stats.completed,
                        stats.deferred,
                        stats.skipped,
                        stats.failed
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // Due-query itself failed; nothing processed this tick.
                    tracing::error!("Scheduler tick failed: {e}");
                }
            }
        }
    }
}
