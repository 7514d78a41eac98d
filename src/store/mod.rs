//! Store (C2) — sole owner of persistent state.
//!
//! Every other component talks to the store exclusively through the typed
//! repository methods defined in the sibling modules; nothing else in this
//! crate issues a SQL statement. Grounded in the teacher's
//! `auth::user_store::UserStore` (`Connection::open` + idempotent
//! `CREATE TABLE IF NOT EXISTS` schema application at construction time),
//! generalized to one store covering every entity in `spec.md` §3 instead
//! of one store per concern.

mod artifacts;
mod events;
mod instruments;
mod lots;
pub mod raw_records;
mod runs;
mod schema;
mod snapshots;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Mutex;

/// Shared, cloneable handle onto the single SQLite connection backing this
/// process. A `std::sync::Mutex` rather than an async lock: every method
/// below does a small, bounded amount of synchronous work, mirroring the
/// teacher's own un-offloaded `rusqlite` usage from async handlers.
pub struct Store {
    conn: Mutex<rusqlite::Connection>,
}

impl Store {
    /// Open (creating if absent) a SQLite-backed store at `database_url`
    /// and apply the schema idempotently.
    pub fn open(database_url: &str) -> Result<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("failed to open store at {path}"))?;
        Self::from_connection(conn)
    }

    /// An in-memory store for tests, matching the disposable per-test state
    /// the teacher's `tests/backtest_run_integration.rs` sets up.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("failed to open in-memory store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA)
            .context("failed to apply store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid decimal in store row: {raw}"))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::from_str(raw).with_context(|| format!("invalid uuid in store row: {raw}"))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .with_context(|| format!("invalid timestamp in store row: {raw}"))
}

pub(crate) fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date in store row: {raw}"))
}

pub use artifacts::ArtifactUpsertResult;
pub use events::TradeFillUpsertResult;
pub use instruments::InstrumentAttrs;
pub use lots::LotUpsert;
pub use raw_records::NewRawRecord;
pub use runs::BeginRunOutcome;
