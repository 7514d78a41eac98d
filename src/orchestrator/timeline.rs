//! Stage timeline — the orchestrator's JSON diagnostics payload
//! (`spec.md` §4.1). Every stage transition appends one [`StageEvent`];
//! the whole timeline serializes directly into `ingestion_run.diagnostics`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub stage: &'static str,
    pub status: &'static str,
    pub started_at_utc: DateTime<Utc>,
    pub ended_at_utc: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(flatten)]
    pub fields: Value,
}

#[derive(Debug, Default)]
pub struct StageTimeline {
    events: Vec<StageEvent>,
}

impl StageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stage: &'static str,
        status: &'static str,
        started_at_utc: DateTime<Utc>,
        fields: Value,
    ) {
        let ended_at_utc = Utc::now();
        self.events.push(StageEvent {
            stage,
            status,
            started_at_utc,
            ended_at_utc,
            duration_ms: (ended_at_utc - started_at_utc).num_milliseconds(),
            fields,
        });
    }

    pub fn to_json(&self) -> Value {
        json!(self.events)
    }

    /// Human-readable one-line-per-stage summary (`spec.md` §7 "human
    /// readable summary").
    pub fn summary(&self) -> String {
        self.events
            .iter()
            .map(|e| format!("{} [{}] {}ms", e.stage, e.status, e.duration_ms))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_renders_one_line_per_stage() {
        let mut timeline = StageTimeline::new();
        let start = Utc::now();
        timeline.record("request", "success", start, json!({"reference_code": "abc"}));
        timeline.record("poll", "success", start, json!({"poll_attempt": 1}));
        let summary = timeline.summary();
        assert!(summary.contains("request [success]"));
        assert!(summary.contains("poll [success]"));
    }

    #[test]
    fn to_json_carries_stage_specific_fields() {
        let mut timeline = StageTimeline::new();
        let start = Utc::now();
        timeline.record("persist", "success", start, json!({"raw_rows_inserted": 3}));
        let value = timeline.to_json();
        assert_eq!(value[0]["raw_rows_inserted"], 3);
        assert_eq!(value[0]["stage"], "persist");
    }
}
