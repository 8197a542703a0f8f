//! Domain model — sequences, steps, subscriptions, and the events that
//! connect them.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Sequence definitions ──────────────────────────────────

/// A tenant-defined multi-step outbound campaign.
///
/// Owned by tenant configuration; the engine only ever bumps
/// `subscriber_count` (best-effort).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    /// Owning messaging connection.
    pub connection_id: String,
    pub name: String,
    /// Inactive sequences are never enrolled into and never advanced.
    pub active: bool,
    /// What causes a contact to be enrolled.
    pub trigger: SequenceTrigger,
    /// Follow-up sequences may be re-armed by an inbound reply.
    pub is_follow_up: bool,
    /// Together with `is_follow_up`: a reply resets the subscription to step 0.
    pub restart_on_reply: bool,
    /// Best-effort metric, not correctness-bearing.
    pub subscriber_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Enrollment trigger for a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequenceTrigger {
    /// Every newly created contact is eligible.
    NewContact,
    /// Eligible when the applied tag matches.
    HasTag { tag_id: String },
    /// Eligible when the assigned origin matches.
    HasOrigin { origin_id: String },
    /// Eligible when inbound text contains any keyword (case-folded).
    Keyword { keywords: Vec<String> },
}

impl SequenceTrigger {
    /// Stable discriminant used as the store's `trigger_type` column.
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::NewContact => TriggerKind::NewContact,
            Self::HasTag { .. } => TriggerKind::HasTag,
            Self::HasOrigin { .. } => TriggerKind::HasOrigin,
            Self::Keyword { .. } => TriggerKind::Keyword,
        }
    }
}

/// Trigger discriminant, independent of trigger parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    NewContact,
    HasTag,
    HasOrigin,
    Keyword,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewContact => "new_contact",
            Self::HasTag => "has_tag",
            Self::HasOrigin => "has_origin",
            Self::Keyword => "keyword",
        }
    }
}

/// One ordered unit of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub sequence_id: String,
    /// Unique within the sequence; defines strict progression.
    pub order_index: i64,
    /// Inactive steps are skipped without sending.
    pub active: bool,
    /// Delay relative to the previous step (or to enrollment for step 0).
    pub delay: StepDelay,
    /// Weekday + time-of-day constraints for the send instant.
    pub schedule: WeeklySchedule,
    /// Where the message payload comes from.
    pub content: StepContentRef,
    /// Best-effort send counter.
    pub sent_count: i64,
}

/// Delay spec: amount + unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepDelay {
    #[serde(default)]
    pub amount: i64,
    pub unit: DelayUnit,
}

impl StepDelay {
    pub fn immediately() -> Self {
        Self { amount: 0, unit: DelayUnit::Immediately }
    }

    pub fn minutes(amount: i64) -> Self {
        Self { amount, unit: DelayUnit::Minutes }
    }

    pub fn hours(amount: i64) -> Self {
        Self { amount, unit: DelayUnit::Hours }
    }

    pub fn days(amount: i64) -> Self {
        Self { amount, unit: DelayUnit::Days }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Immediately,
    Minutes,
    Hours,
    Days,
}

/// Weekly availability: allowed weekdays plus an optional time-of-day window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    /// Days on which a send is allowed. Defaults to all seven.
    #[serde(default = "Weekday::all")]
    pub days: Vec<Weekday>,
    /// Allowed time-of-day range (inclusive on both ends). None = any time.
    #[serde(default)]
    pub window: Option<TimeWindow>,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self { days: Weekday::all(), window: None }
    }
}

impl WeeklySchedule {
    /// Monday–Friday within a business-hours window.
    pub fn business(window: TimeWindow) -> Self {
        Self {
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            window: Some(window),
        }
    }

    pub fn allows_day(&self, day: chrono::Weekday) -> bool {
        self.days.iter().any(|d| d.to_chrono() == day)
    }
}

/// Day of week, serialized as lowercase three-letter codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn all() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Mon => chrono::Weekday::Mon,
            Weekday::Tue => chrono::Weekday::Tue,
            Weekday::Wed => chrono::Weekday::Wed,
            Weekday::Thu => chrono::Weekday::Thu,
            Weekday::Fri => chrono::Weekday::Fri,
            Weekday::Sat => chrono::Weekday::Sat,
            Weekday::Sun => chrono::Weekday::Sun,
        }
    }
}

/// Time-of-day window, e.g. 09:00–18:00.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Reference to a step's message payload: a reusable template, an inline
/// automation reply, or neither (the runner skips such steps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContentRef {
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub automation_id: Option<String>,
}

// ─── Message payloads ──────────────────────────────────────

/// A resolved, sendable message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { body: String },
    Media { kind: MediaKind, url: String, caption: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

// ─── Subscriptions ─────────────────────────────────────────

/// Per-contact runtime progress through a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub sequence_id: String,
    pub contact_id: String,
    /// Connection the enrollment originated on.
    pub connection_id: String,
    /// Conversation thread; carries the `agent_paused` flag the runner checks.
    pub conversation_id: Option<String>,
    /// Index into the sequence's step ordering, starting at 0.
    pub current_step: i64,
    pub state: SubscriptionState,
    pub started_at: DateTime<Utc>,
    /// Last inbound reply from the contact, used for follow-up restarts.
    pub lead_last_message_at: Option<DateTime<Utc>>,
}

/// Subscription lifecycle state.
///
/// Modeled as a tagged enum rather than a nullable `next_step_at` column so
/// "no further work" is explicit instead of a null sentinel. The inner
/// `Option` exists only for active enrollments in sequences with no steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubscriptionState {
    Active { next_step_at: Option<DateTime<Utc>> },
    Completed { completed_at: DateTime<Utc> },
    Unsubscribed,
}

impl SubscriptionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// The pending due-time, if any.
    pub fn next_step_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { next_step_at } => *next_step_at,
            _ => None,
        }
    }
}

impl Subscription {
    /// Fresh active enrollment at step 0.
    pub fn new(
        sequence_id: &str,
        contact_id: &str,
        connection_id: &str,
        conversation_id: Option<String>,
        next_step_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_id: sequence_id.to_string(),
            contact_id: contact_id.to_string(),
            connection_id: connection_id.to_string(),
            conversation_id,
            current_step: 0,
            state: SubscriptionState::Active { next_step_at },
            started_at: Utc::now(),
            lead_last_message_at: None,
        }
    }
}

// ─── External entities (owned elsewhere, read here) ────────

/// WhatsApp-style contact identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    /// Gateway recipient address (phone in E.164 without the plus).
    pub wa_id: String,
    pub name: Option<String>,
}

/// Messaging connection credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    /// Cloud API phone number id the messages are sent from.
    pub phone_number_id: String,
    /// Bearer token; absent until the tenant completes pairing.
    pub access_token: Option<String>,
    pub active: bool,
}

/// Per-contact conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    /// Set while a human agent is engaged; the runner defers sends.
    pub agent_paused: bool,
}

// ─── Trigger events ────────────────────────────────────────

/// An external event pushed into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub contact_id: String,
    pub connection_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub payload: TriggerPayload,
}

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerPayload {
    ContactCreated,
    TagApplied { tag_id: String },
    OriginAssigned { origin_id: String },
    /// Inbound message text to match against keyword triggers.
    KeywordMatched { text: String },
}

impl TriggerPayload {
    /// Which trigger kind this event can enroll into.
    pub fn trigger_kind(&self) -> TriggerKind {
        match self {
            Self::ContactCreated => TriggerKind::NewContact,
            Self::TagApplied { .. } => TriggerKind::HasTag,
            Self::OriginAssigned { .. } => TriggerKind::HasOrigin,
            Self::KeywordMatched { .. } => TriggerKind::Keyword,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_roundtrip() {
        let trigger = SequenceTrigger::Keyword {
            keywords: vec!["promo".into(), "start".into()],
        };
        let json = serde_json::to_string(&trigger).unwrap();
        let back: SequenceTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(trigger, back);
        assert_eq!(trigger.kind().as_str(), "keyword");
    }

    #[test]
    fn test_weekly_schedule_defaults() {
        let schedule: WeeklySchedule = serde_json::from_str("{}").unwrap();
        assert_eq!(schedule.days.len(), 7);
        assert!(schedule.window.is_none());
        assert!(schedule.allows_day(chrono::Weekday::Sun));
    }

    #[test]
    fn test_business_schedule_excludes_weekend() {
        let window = TimeWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        let schedule = WeeklySchedule::business(window);
        assert!(schedule.allows_day(chrono::Weekday::Fri));
        assert!(!schedule.allows_day(chrono::Weekday::Sat));
    }

    #[test]
    fn test_subscription_state() {
        let sub = Subscription::new("seq-1", "c-1", "conn-1", None, Some(Utc::now()));
        assert!(sub.state.is_active());
        assert!(sub.state.next_step_at().is_some());
        assert_eq!(sub.current_step, 0);

        let done = SubscriptionState::Completed { completed_at: Utc::now() };
        assert!(!done.is_active());
        assert!(done.next_step_at().is_none());
    }
}
