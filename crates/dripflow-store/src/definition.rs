//! Definition store — SQLite schema for tenant campaign configuration.

use async_trait::async_trait;
use dripflow_core::error::{DripflowError, Result};
use dripflow_core::traits::DefinitionStore;
use dripflow_core::types::{
    Connection, MessageContent, Sequence, SequenceTrigger, Step, StepContentRef, StepDelay,
    TriggerKind, WeeklySchedule,
};
use rusqlite::params;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed definition store.
pub struct SqliteDefinitionStore {
    conn: Mutex<rusqlite::Connection>,
}

/// Shared SELECT column list for sequence queries — single source of truth.
const SEQUENCE_SELECT: &str = "SELECT id, connection_id, name, active, trigger_type, \
     trigger_config, is_follow_up, restart_on_reply, subscriber_count, created_at FROM sequences";

const STEP_SELECT: &str = "SELECT id, sequence_id, order_index, active, delay_amount, \
     delay_unit, schedule, template_id, automation_id, sent_count FROM steps";

impl SqliteDefinitionStore {
    /// Open or create the definition database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| DripflowError::Store(format!("DB open: {e}")))?;

        // WAL allows concurrent readers while the tenant UI writes definitions
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| DripflowError::Store(format!("DB pragma: {e}")))?;

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sequences (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                trigger_type TEXT NOT NULL,      -- 'new_contact', 'has_tag', 'has_origin', 'keyword'
                trigger_config TEXT NOT NULL,    -- JSON: tag_id / origin_id / keywords
                is_follow_up INTEGER NOT NULL DEFAULT 0,
                restart_on_reply INTEGER NOT NULL DEFAULT 0,
                subscriber_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                sequence_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                delay_amount INTEGER NOT NULL DEFAULT 0,
                delay_unit TEXT NOT NULL,        -- 'immediately', 'minutes', 'hours', 'days'
                schedule TEXT NOT NULL,          -- JSON: {days: [...], window: {start, end}}
                template_id TEXT,
                automation_id TEXT,
                sent_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (sequence_id, order_index)
            );

            CREATE TABLE IF NOT EXISTS message_templates (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL            -- JSON MessageContent
            );

            CREATE TABLE IF NOT EXISTS automation_replies (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL            -- JSON MessageContent
            );

            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                phone_number_id TEXT NOT NULL,
                access_token TEXT,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_sequences_trigger
                ON sequences (connection_id, trigger_type, active);
            CREATE INDEX IF NOT EXISTS idx_steps_sequence
                ON steps (sequence_id, order_index);
            ",
        )
        .map_err(|e| DripflowError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|e| DripflowError::Store(e.to_string()))
    }

    // ─── Tenant-side writes (configuration, seeding) ───────

    /// Insert or replace a sequence definition.
    pub fn save_sequence(&self, sequence: &Sequence) -> Result<()> {
        let (trigger_type, trigger_config) = encode_trigger(&sequence.trigger);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sequences
             (id, connection_id, name, active, trigger_type, trigger_config,
              is_follow_up, restart_on_reply, subscriber_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                sequence.id,
                sequence.connection_id,
                sequence.name,
                sequence.active as i32,
                trigger_type,
                trigger_config.to_string(),
                sequence.is_follow_up as i32,
                sequence.restart_on_reply as i32,
                sequence.subscriber_count,
                sequence.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| DripflowError::Store(format!("Save sequence: {e}")))?;
        Ok(())
    }

    /// Insert or replace a step.
    pub fn save_step(&self, step: &Step) -> Result<()> {
        let schedule = serde_json::to_string(&step.schedule)
            .map_err(|e| DripflowError::Store(format!("Encode schedule: {e}")))?;
        let unit = serde_json::to_value(step.delay.unit)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "immediately".into());
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO steps
             (id, sequence_id, order_index, active, delay_amount, delay_unit,
              schedule, template_id, automation_id, sent_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                step.id,
                step.sequence_id,
                step.order_index,
                step.active as i32,
                step.delay.amount,
                unit,
                schedule,
                step.content.template_id,
                step.content.automation_id,
                step.sent_count,
            ],
        )
        .map_err(|e| DripflowError::Store(format!("Save step: {e}")))?;
        Ok(())
    }

    /// Insert or replace a reusable template payload.
    pub fn save_template(&self, id: &str, content: &MessageContent) -> Result<()> {
        let json = serde_json::to_string(content)
            .map_err(|e| DripflowError::Store(format!("Encode template: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO message_templates (id, content) VALUES (?1, ?2)",
            params![id, json],
        )
        .map_err(|e| DripflowError::Store(format!("Save template: {e}")))?;
        Ok(())
    }

    /// Insert or replace an inline automation-reply payload.
    pub fn save_automation_reply(&self, id: &str, content: &MessageContent) -> Result<()> {
        let json = serde_json::to_string(content)
            .map_err(|e| DripflowError::Store(format!("Encode automation reply: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO automation_replies (id, content) VALUES (?1, ?2)",
            params![id, json],
        )
        .map_err(|e| DripflowError::Store(format!("Save automation reply: {e}")))?;
        Ok(())
    }

    /// Insert or replace a connection record.
    pub fn save_connection(&self, connection: &Connection) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO connections (id, phone_number_id, access_token, active)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                connection.id,
                connection.phone_number_id,
                connection.access_token,
                connection.active as i32,
            ],
        )
        .map_err(|e| DripflowError::Store(format!("Save connection: {e}")))?;
        Ok(())
    }

    fn content_by_id(&self, table: &str, id: &str) -> Result<Option<MessageContent>> {
        let conn = self.lock()?;
        let json: Option<String> = crate::optional_row(
            conn.query_row(
                &format!("SELECT content FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            ),
            "Query content",
        )?;
        match json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| DripflowError::Store(format!("Decode content {id}: {e}"))),
            None => Ok(None),
        }
    }
}

/// Map a database row to a Sequence struct.
fn row_to_sequence(row: &rusqlite::Row) -> rusqlite::Result<(Sequence, String, String)> {
    let trigger_type: String = row.get(4)?;
    let trigger_config: String = row.get(5)?;
    let created_at: String = row.get(9)?;
    Ok((
        Sequence {
            id: row.get(0)?,
            connection_id: row.get(1)?,
            name: row.get(2)?,
            active: row.get::<_, i32>(3)? != 0,
            // Placeholder; decoded from the two raw columns by the caller.
            trigger: SequenceTrigger::NewContact,
            is_follow_up: row.get::<_, i32>(6)? != 0,
            restart_on_reply: row.get::<_, i32>(7)? != 0,
            subscriber_count: row.get(8)?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
        },
        trigger_type,
        trigger_config,
    ))
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<(Step, String, String)> {
    let unit: String = row.get(5)?;
    let schedule: String = row.get(6)?;
    Ok((
        Step {
            id: row.get(0)?,
            sequence_id: row.get(1)?,
            order_index: row.get(2)?,
            active: row.get::<_, i32>(3)? != 0,
            delay: StepDelay {
                amount: row.get(4)?,
                unit: dripflow_core::types::DelayUnit::Immediately, // decoded below
            },
            schedule: WeeklySchedule::default(), // decoded below
            content: StepContentRef {
                template_id: row.get(7)?,
                automation_id: row.get(8)?,
            },
            sent_count: row.get(9)?,
        },
        unit,
        schedule,
    ))
}

fn encode_trigger(trigger: &SequenceTrigger) -> (&'static str, serde_json::Value) {
    match trigger {
        SequenceTrigger::NewContact => ("new_contact", serde_json::json!({})),
        SequenceTrigger::HasTag { tag_id } => ("has_tag", serde_json::json!({ "tag_id": tag_id })),
        SequenceTrigger::HasOrigin { origin_id } => {
            ("has_origin", serde_json::json!({ "origin_id": origin_id }))
        }
        SequenceTrigger::Keyword { keywords } => {
            ("keyword", serde_json::json!({ "keywords": keywords }))
        }
    }
}

fn decode_trigger(trigger_type: &str, config: &str) -> SequenceTrigger {
    let data: serde_json::Value = serde_json::from_str(config).unwrap_or_default();
    match trigger_type {
        "has_tag" => SequenceTrigger::HasTag {
            tag_id: data["tag_id"].as_str().unwrap_or("").to_string(),
        },
        "has_origin" => SequenceTrigger::HasOrigin {
            origin_id: data["origin_id"].as_str().unwrap_or("").to_string(),
        },
        "keyword" => SequenceTrigger::Keyword {
            keywords: serde_json::from_value(data["keywords"].clone()).unwrap_or_default(),
        },
        _ => SequenceTrigger::NewContact,
    }
}

fn decode_step(raw: (Step, String, String)) -> Step {
    let (mut step, unit, schedule) = raw;
    step.delay.unit = serde_json::from_value(serde_json::Value::String(unit))
        .unwrap_or(dripflow_core::types::DelayUnit::Immediately);
    step.schedule = serde_json::from_str(&schedule).unwrap_or_default();
    step
}

#[async_trait]
impl DefinitionStore for SqliteDefinitionStore {
    async fn sequence(&self, id: &str) -> Result<Option<Sequence>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SEQUENCE_SELECT} WHERE id = ?1"))
            .map_err(|e| DripflowError::Store(format!("Query sequence: {e}")))?;
        let row = crate::optional_row(stmt.query_row(params![id], row_to_sequence), "Query sequence")?;
        Ok(row.map(|(mut seq, trigger_type, config)| {
            seq.trigger = decode_trigger(&trigger_type, &config);
            seq
        }))
    }

    async fn sequences_for_trigger(
        &self,
        connection_id: &str,
        kind: TriggerKind,
    ) -> Result<Vec<Sequence>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SEQUENCE_SELECT} WHERE connection_id = ?1 AND trigger_type = ?2 AND active = 1"
            ))
            .map_err(|e| DripflowError::Store(format!("Query sequences: {e}")))?;
        let rows = stmt
            .query_map(params![connection_id, kind.as_str()], row_to_sequence)
            .map_err(|e| DripflowError::Store(format!("Query sequences: {e}")))?;
        Ok(rows
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Skipping unreadable sequence row: {e}");
                    None
                }
            })
            .map(|(mut seq, trigger_type, config)| {
                seq.trigger = decode_trigger(&trigger_type, &config);
                seq
            })
            .collect())
    }

    async fn steps(&self, sequence_id: &str) -> Result<Vec<Step>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{STEP_SELECT} WHERE sequence_id = ?1 ORDER BY order_index"
            ))
            .map_err(|e| DripflowError::Store(format!("Query steps: {e}")))?;
        let rows = stmt
            .query_map(params![sequence_id], row_to_step)
            .map_err(|e| DripflowError::Store(format!("Query steps: {e}")))?;
        Ok(rows
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Skipping unreadable step row: {e}");
                    None
                }
            })
            .map(decode_step)
            .collect())
    }

    async fn connection(&self, id: &str) -> Result<Option<Connection>> {
        let conn = self.lock()?;
        crate::optional_row(
            conn.query_row(
                "SELECT id, phone_number_id, access_token, active FROM connections WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Connection {
                        id: row.get(0)?,
                        phone_number_id: row.get(1)?,
                        access_token: row.get(2)?,
                        active: row.get::<_, i32>(3)? != 0,
                    })
                },
            ),
            "Query connection",
        )
    }

    async fn template_content(&self, template_id: &str) -> Result<Option<MessageContent>> {
        self.content_by_id("message_templates", template_id)
    }

    async fn automation_content(&self, automation_id: &str) -> Result<Option<MessageContent>> {
        self.content_by_id("automation_replies", automation_id)
    }

    async fn increment_subscriber_count(&self, sequence_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sequences SET subscriber_count = subscriber_count + 1 WHERE id = ?1",
            params![sequence_id],
        )
        .map_err(|e| DripflowError::Store(format!("Bump subscribers: {e}")))?;
        Ok(())
    }

    async fn increment_step_sent_count(&self, step_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE steps SET sent_count = sent_count + 1 WHERE id = ?1",
            params![step_id],
        )
        .map_err(|e| DripflowError::Store(format!("Bump sent count: {e}")))?;
        Ok(())
    }
}
