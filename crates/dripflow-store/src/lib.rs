//! # Dripflow Store
//!
//! SQLite persistence, split across two independently opened databases:
//!
//! - `definitions.db` — tenant campaign configuration (sequences, steps,
//!   templates, automation replies, connections). Read-mostly; the engine
//!   only writes best-effort counters.
//! - `runtime.db` — per-contact subscription state plus contact and
//!   conversation reads.
//!
//! The two databases are never attached or joined; all cross-store
//! composition happens in `dripflow-engine`.

pub mod definition;
pub mod runtime;

pub use definition::SqliteDefinitionStore;
pub use runtime::SqliteRuntimeStore;

use chrono::{DateTime, Utc};
use dripflow_core::error::{DripflowError, Result};

/// Parse an RFC3339 TEXT column, tolerating NULL.
pub(crate) fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Single-row lookup result: no row is `Ok(None)`, anything else
/// (busy database, corrupt row) stays an error instead of reading as
/// absence.
pub(crate) fn optional_row<T>(result: rusqlite::Result<T>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DripflowError::Store(format!("{what}: {e}"))),
    }
}
