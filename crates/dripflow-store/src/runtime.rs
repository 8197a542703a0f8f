//! Runtime store — SQLite schema for subscription state, contacts, and
//! conversations. Lives in its own database, independent of the definition
//! store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dripflow_core::error::{DripflowError, Result};
use dripflow_core::traits::RuntimeStore;
use dripflow_core::types::{Contact, Conversation, Subscription, SubscriptionState};
use rusqlite::params;
use std::path::Path;
use std::sync::Mutex;

use crate::parse_ts;

/// SQLite-backed runtime store.
pub struct SqliteRuntimeStore {
    conn: Mutex<rusqlite::Connection>,
}

const SUBSCRIPTION_SELECT: &str = "SELECT id, sequence_id, contact_id, connection_id, \
     conversation_id, current_step, status, next_step_at, started_at, completed_at, \
     lead_last_message_at FROM subscriptions";

impl SqliteRuntimeStore {
    /// Open or create the runtime database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| DripflowError::Store(format!("DB open: {e}")))?;

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

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                sequence_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                conversation_id TEXT,
                current_step INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',  -- active, completed, unsubscribed
                next_step_at TEXT,                      -- RFC3339, only while active
                started_at TEXT NOT NULL,
                completed_at TEXT,
                lead_last_message_at TEXT
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                wa_id TEXT NOT NULL,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                agent_paused INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_due
                ON subscriptions (status, next_step_at);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_pair
                ON subscriptions (sequence_id, contact_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_contact
                ON subscriptions (contact_id, status);
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

    // ─── Contact / conversation writes (owned by the CRM side) ───

    pub fn save_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO contacts (id, wa_id, name) VALUES (?1, ?2, ?3)",
            params![contact.id, contact.wa_id, contact.name],
        )
        .map_err(|e| DripflowError::Store(format!("Save contact: {e}")))?;
        Ok(())
    }

    pub fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversations (id, contact_id, agent_paused)
             VALUES (?1, ?2, ?3)",
            params![
                conversation.id,
                conversation.contact_id,
                conversation.agent_paused as i32
            ],
        )
        .map_err(|e| DripflowError::Store(format!("Save conversation: {e}")))?;
        Ok(())
    }

    pub fn set_agent_paused(&self, conversation_id: &str, paused: bool) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET agent_paused = ?1 WHERE id = ?2",
            params![paused as i32, conversation_id],
        )
        .map_err(|e| DripflowError::Store(format!("Set agent_paused: {e}")))?;
        Ok(())
    }
}

/// Split a tagged state into its three storage columns.
fn encode_state(state: &SubscriptionState) -> (&'static str, Option<String>, Option<String>) {
    match state {
        SubscriptionState::Active { next_step_at } => {
            ("active", next_step_at.map(|t| t.to_rfc3339()), None)
        }
        SubscriptionState::Completed { completed_at } => {
            ("completed", None, Some(completed_at.to_rfc3339()))
        }
        SubscriptionState::Unsubscribed => ("unsubscribed", None, None),
    }
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<Subscription> {
    let status: String = row.get(6)?;
    let next_step_at: Option<String> = row.get(7)?;
    let started_at: String = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    let lead_last_message_at: Option<String> = row.get(10)?;

    let state = match status.as_str() {
        "completed" => SubscriptionState::Completed {
            completed_at: parse_ts(completed_at).unwrap_or_else(Utc::now),
        },
        "unsubscribed" => SubscriptionState::Unsubscribed,
        _ => SubscriptionState::Active { next_step_at: parse_ts(next_step_at) },
    };

    Ok(Subscription {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        contact_id: row.get(2)?,
        connection_id: row.get(3)?,
        conversation_id: row.get(4)?,
        current_step: row.get(5)?,
        state,
        started_at: parse_ts(Some(started_at)).unwrap_or_else(Utc::now),
        lead_last_message_at: parse_ts(lead_last_message_at),
    })
}

#[async_trait]
impl RuntimeStore for SqliteRuntimeStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let (status, next_step_at, completed_at) = encode_state(&subscription.state);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO subscriptions
             (id, sequence_id, contact_id, connection_id, conversation_id, current_step,
              status, next_step_at, started_at, completed_at, lead_last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                subscription.id,
                subscription.sequence_id,
                subscription.contact_id,
                subscription.connection_id,
                subscription.conversation_id,
                subscription.current_step,
                status,
                next_step_at,
                subscription.started_at.to_rfc3339(),
                completed_at,
                subscription.lead_last_message_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| DripflowError::Store(format!("Insert subscription: {e}")))?;
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let (status, next_step_at, completed_at) = encode_state(&subscription.state);
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE subscriptions SET current_step = ?2, status = ?3, next_step_at = ?4,
                 started_at = ?5, completed_at = ?6, lead_last_message_at = ?7
                 WHERE id = ?1",
                params![
                    subscription.id,
                    subscription.current_step,
                    status,
                    next_step_at,
                    subscription.started_at.to_rfc3339(),
                    completed_at,
                    subscription.lead_last_message_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| DripflowError::Store(format!("Update subscription: {e}")))?;
        if changed == 0 {
            return Err(DripflowError::Store(format!(
                "Update subscription: no row with id {}",
                subscription.id
            )));
        }
        Ok(())
    }

    async fn find_subscription(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> Result<Option<Subscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SUBSCRIPTION_SELECT} WHERE sequence_id = ?1 AND contact_id = ?2
                 ORDER BY started_at DESC LIMIT 1"
            ))
            .map_err(|e| DripflowError::Store(format!("Find subscription: {e}")))?;
        crate::optional_row(
            stmt.query_row(params![sequence_id, contact_id], row_to_subscription),
            "Find subscription",
        )
    }

    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SUBSCRIPTION_SELECT} WHERE status = 'active' AND next_step_at IS NOT NULL
                 AND next_step_at <= ?1 ORDER BY next_step_at LIMIT ?2"
            ))
            .map_err(|e| DripflowError::Store(format!("Due query: {e}")))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], row_to_subscription)
            .map_err(|e| DripflowError::Store(format!("Due query: {e}")))?;
        Ok(rows
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Skipping unreadable due subscription row: {e}");
                    None
                }
            })
            .collect())
    }

    async fn active_subscriptions_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<Subscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SUBSCRIPTION_SELECT} WHERE contact_id = ?1 AND status = 'active'"
            ))
            .map_err(|e| DripflowError::Store(format!("Contact query: {e}")))?;
        let rows = stmt
            .query_map(params![contact_id], row_to_subscription)
            .map_err(|e| DripflowError::Store(format!("Contact query: {e}")))?;
        Ok(rows
            .filter_map(|r| match r {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Skipping unreadable subscription row: {e}");
                    None
                }
            })
            .collect())
    }

    async fn contact(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.lock()?;
        crate::optional_row(
            conn.query_row(
                "SELECT id, wa_id, name FROM contacts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Contact {
                        id: row.get(0)?,
                        wa_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            ),
            "Query contact",
        )
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        crate::optional_row(
            conn.query_row(
                "SELECT id, contact_id, agent_paused FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        contact_id: row.get(1)?,
                        agent_paused: row.get::<_, i32>(2)? != 0,
                    })
                },
            ),
            "Query conversation",
        )
    }
}
