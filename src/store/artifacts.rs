//! Raw artifact repository — content-addressed dedupe (`spec.md` §4.4 #1).

use super::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub struct ArtifactUpsertResult {
    pub artifact_id: Uuid,
    pub created_now: bool,
}

impl Store {
    /// Insert-or-return-existing by (account, period_key, flex_query_id,
    /// sha256(payload)). `created_now = false` is the idempotency signal
    /// consumed by the orchestrator's dedupe diagnostics.
    pub fn upsert_artifact(
        &self,
        account: &str,
        period_key: &str,
        flex_query_id: &str,
        payload: &[u8],
    ) -> Result<ArtifactUpsertResult> {
        let sha256 = hex::encode(Sha256::digest(payload));
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM raw_artifact
                 WHERE account = ?1 AND period_key = ?2 AND flex_query_id = ?3 AND payload_sha256 = ?4",
                params![account, period_key, flex_query_id, sha256],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up raw_artifact")?;

        if let Some(id) = existing {
            return Ok(ArtifactUpsertResult {
                artifact_id: super::parse_uuid(&id)?,
                created_now: false,
            });
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO raw_artifact
                (id, account, period_key, flex_query_id, payload_sha256, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                account,
                period_key,
                flex_query_id,
                sha256,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("failed to insert raw_artifact")?;

        Ok(ArtifactUpsertResult {
            artifact_id: id,
            created_now: true,
        })
    }
}
