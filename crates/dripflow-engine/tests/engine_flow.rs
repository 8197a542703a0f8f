//! End-to-end engine behavior on real SQLite stores with a recording
//! gateway double.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dripflow_core::config::SchedulerConfig;
use dripflow_core::error::{DripflowError, Result};
use dripflow_core::traits::{DefinitionStore, MessageGateway, RuntimeStore};
use dripflow_core::types::{
    Connection, Contact, Conversation, MediaKind, MessageContent, Sequence, SequenceTrigger, Step,
    StepContentRef, StepDelay, Subscription, SubscriptionState, TriggerEvent, TriggerKind,
    TriggerPayload, WeeklySchedule,
};
use dripflow_engine::{EnrollmentManager, ReplyReactivator, RunOutcome, Scheduler, SubscriptionRunner};
use dripflow_store::{SqliteDefinitionStore, SqliteRuntimeStore};

/// Gateway double: records sends, optionally fails them.
#[derive(Default)]
struct MockGateway {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl MockGateway {
    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn set_failing(&self, failing: bool) {
        self.fail_next.store(failing, Ordering::SeqCst);
    }

    fn record(&self, recipient: &str, what: &str) -> Result<String> {
        if self.fail_next.load(Ordering::SeqCst) {
            return Err(DripflowError::Gateway("simulated 503".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), what.to_string()));
        Ok(format!("wamid.{}", self.sent_count()))
    }
}

#[async_trait]
impl MessageGateway for MockGateway {
    async fn send_text(&self, _conn: &Connection, recipient: &str, body: &str) -> Result<String> {
        self.record(recipient, body)
    }

    async fn send_media(
        &self,
        _conn: &Connection,
        recipient: &str,
        kind: MediaKind,
        url: &str,
        _caption: Option<&str>,
    ) -> Result<String> {
        self.record(recipient, &format!("{}:{url}", kind.as_str()))
    }
}

/// Test harness: both stores in a temp dir, mock gateway, engine parts.
struct Harness {
    dir: std::path::PathBuf,
    defs: Arc<SqliteDefinitionStore>,
    runtime: Arc<SqliteRuntimeStore>,
    gateway: Arc<MockGateway>,
    enrollment: EnrollmentManager,
    runner: SubscriptionRunner,
    reactivator: ReplyReactivator,
}

impl Harness {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("dripflow-it-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let defs = Arc::new(SqliteDefinitionStore::open(&dir.join("defs.db")).unwrap());
        let runtime = Arc::new(SqliteRuntimeStore::open(&dir.join("runtime.db")).unwrap());
        let gateway = Arc::new(MockGateway::default());

        let d: Arc<dyn DefinitionStore> = defs.clone();
        let r: Arc<dyn RuntimeStore> = runtime.clone();
        let g: Arc<dyn MessageGateway> = gateway.clone();

        Self {
            dir,
            enrollment: EnrollmentManager::new(d.clone(), r.clone()),
            runner: SubscriptionRunner::new(d.clone(), r.clone(), g, 3600),
            reactivator: ReplyReactivator::new(d, r),
            defs,
            runtime,
            gateway,
        }
    }

    fn scheduler(&self) -> Scheduler {
        let config = SchedulerConfig { poll_interval_secs: 60, batch_size: 50, pause_defer_secs: 3600 };
        Scheduler::new(
            self.defs.clone(),
            self.runtime.clone(),
            self.gateway.clone(),
            &config,
        )
    }

    /// A connection, a contact, and a paused-capable conversation.
    fn seed_contact(&self) {
        self.defs
            .save_connection(&Connection {
                id: "conn-1".into(),
                phone_number_id: "10001".into(),
                access_token: Some("token".into()),
                active: true,
            })
            .unwrap();
        self.runtime
            .save_contact(&Contact {
                id: "c-1".into(),
                wa_id: "84900000001".into(),
                name: Some("Linh".into()),
            })
            .unwrap();
        self.runtime
            .save_conversation(&Conversation {
                id: "conv-1".into(),
                contact_id: "c-1".into(),
                agent_paused: false,
            })
            .unwrap();
    }

    /// Sequence with `n` immediate text steps.
    fn seed_sequence(&self, id: &str, n: usize, is_follow_up: bool, restart_on_reply: bool) {
        self.defs
            .save_sequence(&Sequence {
                id: id.into(),
                connection_id: "conn-1".into(),
                name: format!("seq {id}"),
                active: true,
                trigger: SequenceTrigger::NewContact,
                is_follow_up,
                restart_on_reply,
                subscriber_count: 0,
                created_at: Utc::now(),
            })
            .unwrap();
        for i in 0..n {
            let template_id = format!("{id}-t{i}");
            self.defs
                .save_template(&template_id, &MessageContent::Text { body: format!("msg {i}") })
                .unwrap();
            self.defs
                .save_step(&Step {
                    id: format!("{id}-s{i}"),
                    sequence_id: id.into(),
                    order_index: i as i64,
                    active: true,
                    delay: StepDelay::immediately(),
                    schedule: WeeklySchedule::default(),
                    content: StepContentRef { template_id: Some(template_id), automation_id: None },
                    sent_count: 0,
                })
                .unwrap();
        }
    }

    fn new_contact_event(&self) -> TriggerEvent {
        TriggerEvent {
            contact_id: "c-1".into(),
            connection_id: "conn-1".into(),
            conversation_id: Some("conv-1".into()),
            payload: TriggerPayload::ContactCreated,
        }
    }

    async fn subscription(&self, sequence_id: &str) -> Subscription {
        self.runtime
            .find_subscription(sequence_id, "c-1")
            .await
            .unwrap()
            .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

/// Definition-store wrapper whose content lookups can be made to fail,
/// standing in for a busy or unreachable database.
struct FlakyDefinitions {
    inner: Arc<SqliteDefinitionStore>,
    fail_content: AtomicBool,
}

#[async_trait]
impl DefinitionStore for FlakyDefinitions {
    async fn sequence(&self, id: &str) -> Result<Option<Sequence>> {
        self.inner.sequence(id).await
    }

    async fn sequences_for_trigger(
        &self,
        connection_id: &str,
        kind: TriggerKind,
    ) -> Result<Vec<Sequence>> {
        self.inner.sequences_for_trigger(connection_id, kind).await
    }

    async fn steps(&self, sequence_id: &str) -> Result<Vec<Step>> {
        self.inner.steps(sequence_id).await
    }

    async fn connection(&self, id: &str) -> Result<Option<Connection>> {
        self.inner.connection(id).await
    }

    async fn template_content(&self, template_id: &str) -> Result<Option<MessageContent>> {
        if self.fail_content.load(Ordering::SeqCst) {
            return Err(DripflowError::Store("database is locked".into()));
        }
        self.inner.template_content(template_id).await
    }

    async fn automation_content(&self, automation_id: &str) -> Result<Option<MessageContent>> {
        self.inner.automation_content(automation_id).await
    }

    async fn increment_subscriber_count(&self, sequence_id: &str) -> Result<()> {
        self.inner.increment_subscriber_count(sequence_id).await
    }

    async fn increment_step_sent_count(&self, step_id: &str) -> Result<()> {
        self.inner.increment_step_sent_count(step_id).await
    }
}

#[tokio::test]
async fn double_enroll_is_idempotent() {
    let h = Harness::new("idempotent");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);

    let first = h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();
    assert_eq!(first.len(), 1);
    let second = h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();
    assert!(second.is_empty());

    let active = h.runtime.active_subscriptions_for_contact("c-1").await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn empty_sequence_completes_on_first_run() {
    let h = Harness::new("empty");
    h.seed_contact();
    h.seed_sequence("seq-1", 0, false, false);

    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();
    let sub = h.subscription("seq-1").await;
    // No steps: active but nothing pending, so the due-query never sees it.
    assert_eq!(sub.state, SubscriptionState::Active { next_step_at: None });

    let outcome = h.runner.run(&sub).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let sub = h.subscription("seq-1").await;
    assert!(matches!(sub.state, SubscriptionState::Completed { .. }));
    assert_eq!(h.gateway.sent_count(), 0);
}

#[tokio::test]
async fn two_step_sequence_completes_after_two_cycles() {
    let h = Harness::new("twostep");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    let scheduler = h.scheduler();

    let stats = scheduler.tick().await.unwrap();
    assert_eq!(stats.picked, 1);
    assert_eq!(stats.advanced, 1);
    assert_eq!(h.gateway.sent_count(), 1);
    let sub = h.subscription("seq-1").await;
    assert_eq!(sub.current_step, 1);
    assert!(sub.state.next_step_at().is_some());

    let stats = scheduler.tick().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(h.gateway.sent_count(), 2);
    let sub = h.subscription("seq-1").await;
    assert!(matches!(sub.state, SubscriptionState::Completed { .. }));
    assert!(sub.state.next_step_at().is_none());

    // Terminal rows never reappear in the due-query.
    let stats = scheduler.tick().await.unwrap();
    assert_eq!(stats.picked, 0);
}

#[tokio::test]
async fn agent_paused_defers_without_sending() {
    let h = Harness::new("paused");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();
    h.runtime.set_agent_paused("conv-1", true).unwrap();

    let before = h.subscription("seq-1").await;
    let outcome = h.runner.run(&before).await.unwrap();
    assert_eq!(outcome, RunOutcome::Deferred);
    assert_eq!(h.gateway.sent_count(), 0);

    let after = h.subscription("seq-1").await;
    assert_eq!(after.current_step, before.current_step);
    // Re-deferred roughly one hour out.
    let next = after.state.next_step_at().unwrap();
    assert!(next > Utc::now() + chrono::Duration::minutes(55));

    // Clearing the flag lets the next cycle send again.
    h.runtime.set_agent_paused("conv-1", false).unwrap();
    let outcome = h.runner.run(&after).await.unwrap();
    assert_eq!(outcome, RunOutcome::Advanced);
    assert_eq!(h.gateway.sent_count(), 1);
}

#[tokio::test]
async fn failed_send_leaves_state_untouched_then_advances_once() {
    let h = Harness::new("sendfail");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    h.gateway.set_failing(true);
    let before = h.subscription("seq-1").await;
    let err = h.runner.run(&before).await.unwrap_err();
    assert!(matches!(err, DripflowError::Gateway(_)));

    let after = h.subscription("seq-1").await;
    assert_eq!(after.current_step, before.current_step);
    assert_eq!(after.state.next_step_at(), before.state.next_step_at());
    assert_eq!(h.gateway.sent_count(), 0);

    h.gateway.set_failing(false);
    let outcome = h.runner.run(&after).await.unwrap();
    assert_eq!(outcome, RunOutcome::Advanced);
    assert_eq!(h.gateway.sent_count(), 1);
    assert_eq!(h.subscription("seq-1").await.current_step, 1);
}

#[tokio::test]
async fn content_store_failure_aborts_cycle_without_advancing() {
    let h = Harness::new("contentfail");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    let flaky = Arc::new(FlakyDefinitions {
        inner: h.defs.clone(),
        fail_content: AtomicBool::new(true),
    });
    let runner = SubscriptionRunner::new(flaky.clone(), h.runtime.clone(), h.gateway.clone(), 3600);

    // A failing content lookup is a store error, never "no content":
    // the step must not be skipped over.
    let before = h.subscription("seq-1").await;
    let err = runner.run(&before).await.unwrap_err();
    assert!(matches!(err, DripflowError::Store(_)));
    let after = h.subscription("seq-1").await;
    assert_eq!(after.current_step, before.current_step);
    assert_eq!(after.state.next_step_at(), before.state.next_step_at());
    assert_eq!(h.gateway.sent_count(), 0);

    // Once the store recovers the same step sends and advances once.
    flaky.fail_content.store(false, Ordering::SeqCst);
    assert_eq!(runner.run(&before).await.unwrap(), RunOutcome::Advanced);
    assert_eq!(h.gateway.sent_count(), 1);
    assert_eq!(h.subscription("seq-1").await.current_step, 1);
}

#[tokio::test]
async fn missing_token_aborts_cycle_without_state_change() {
    let h = Harness::new("notoken");
    h.seed_contact();
    h.seed_sequence("seq-1", 1, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    h.defs
        .save_connection(&Connection {
            id: "conn-1".into(),
            phone_number_id: "10001".into(),
            access_token: None,
            active: true,
        })
        .unwrap();

    let before = h.subscription("seq-1").await;
    let err = h.runner.run(&before).await.unwrap_err();
    assert!(matches!(err, DripflowError::AuthFailed(_)));
    let after = h.subscription("seq-1").await;
    assert!(after.state.is_active());
    assert_eq!(after.current_step, before.current_step);
}

#[tokio::test]
async fn contentless_and_inactive_steps_advance_without_sending() {
    let h = Harness::new("skips");
    h.seed_contact();
    h.seed_sequence("seq-1", 3, false, false);
    // Step 0: template deleted → no content. Step 1: inactive.
    h.defs
        .save_step(&Step {
            id: "seq-1-s0".into(),
            sequence_id: "seq-1".into(),
            order_index: 0,
            active: true,
            delay: StepDelay::immediately(),
            schedule: WeeklySchedule::default(),
            content: StepContentRef { template_id: Some("missing".into()), automation_id: None },
            sent_count: 0,
        })
        .unwrap();
    h.defs
        .save_step(&Step {
            id: "seq-1-s1".into(),
            sequence_id: "seq-1".into(),
            order_index: 1,
            active: false,
            delay: StepDelay::immediately(),
            schedule: WeeklySchedule::default(),
            content: StepContentRef { template_id: Some("seq-1-t1".into()), automation_id: None },
            sent_count: 0,
        })
        .unwrap();

    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    // Cycle 1: no content, advance silently.
    let sub = h.subscription("seq-1").await;
    assert_eq!(h.runner.run(&sub).await.unwrap(), RunOutcome::Advanced);
    assert_eq!(h.gateway.sent_count(), 0);
    // Cycle 2: inactive step, advance silently.
    let sub = h.subscription("seq-1").await;
    assert_eq!(h.runner.run(&sub).await.unwrap(), RunOutcome::Advanced);
    assert_eq!(h.gateway.sent_count(), 0);
    // Cycle 3: the last step actually sends, then completes.
    let sub = h.subscription("seq-1").await;
    assert_eq!(h.runner.run(&sub).await.unwrap(), RunOutcome::Completed);
    assert_eq!(h.gateway.sent_count(), 1);
}

#[tokio::test]
async fn inactive_sequence_stalls_in_scheduler() {
    let h = Harness::new("stall");
    h.seed_contact();
    h.seed_sequence("seq-1", 1, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    // Tenant pauses the campaign after enrollment.
    let mut paused = h.defs.sequence("seq-1").await.unwrap().unwrap();
    paused.active = false;
    h.defs.save_sequence(&paused).unwrap();

    let stats = h.scheduler().tick().await.unwrap();
    assert_eq!(stats.picked, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.gateway.sent_count(), 0);
    // State untouched: still due once the campaign is re-activated.
    assert!(h.subscription("seq-1").await.state.next_step_at().is_some());
}

#[tokio::test]
async fn reply_restarts_follow_up_and_stamps_others() {
    let h = Harness::new("reply");
    h.seed_contact();
    h.seed_sequence("seq-fu", 2, true, true);
    h.seed_sequence("seq-plain", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    // Advance the follow-up past step 0 so a restart is observable.
    let sub = h.subscription("seq-fu").await;
    h.runner.run(&sub).await.unwrap();
    assert_eq!(h.subscription("seq-fu").await.current_step, 1);

    let restarted = h.reactivator.on_reply("c-1").await.unwrap();
    assert_eq!(restarted, 1);

    let fu = h.subscription("seq-fu").await;
    assert_eq!(fu.current_step, 0);
    assert!(fu.lead_last_message_at.is_some());
    assert!(fu.state.next_step_at().is_some());

    let plain = h.subscription("seq-plain").await;
    assert_eq!(plain.current_step, 0);
    assert!(plain.lead_last_message_at.is_some());
}

#[tokio::test]
async fn unenroll_removes_from_scheduling() {
    let h = Harness::new("unenroll");
    h.seed_contact();
    h.seed_sequence("seq-1", 2, false, false);
    h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();

    assert!(h.enrollment.unenroll("seq-1", "c-1").await.unwrap());
    assert!(!h.enrollment.unenroll("seq-1", "c-1").await.unwrap());

    let stats = h.scheduler().tick().await.unwrap();
    assert_eq!(stats.picked, 0);

    // A later trigger reactivates the same row instead of inserting a twin.
    let enrolled = h.enrollment.handle_event(&h.new_contact_event()).await.unwrap();
    assert_eq!(enrolled.len(), 1);
    let active = h.runtime.active_subscriptions_for_contact("c-1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].current_step, 0);
}
