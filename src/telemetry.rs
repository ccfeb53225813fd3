//! # Telemetry Sink
//!
//! ## Responsibility
//! Keep the append-only history of routing decisions and their outcomes,
//! and aggregate it into [`UsageStats`].
//!
//! ## Guarantees
//! - Append-only: records are never updated or deleted through this API.
//!   The in-memory view retains the newest `capacity` records; the JSON-lines
//!   file (when configured) keeps every record.
//! - Aggregates cover every record ever appended, not only the retained ones.
//! - `record` failures are reported to the caller as [`TelemetryError`];
//!   the router logs and swallows them.
//!
//! ## NOT Responsible For
//! - Adjusting rankings from history (the scorer does not read it yet)
//! - Rotating or shipping the audit file

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::routing::{Outcome, RoutingDecision};

/// One appended history entry.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    /// The decision that was dispatched.
    pub decision: RoutingDecision,
    /// What happened.
    pub outcome: Outcome,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    /// Prompt text, only when prompt capture is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl TelemetryRecord {
    /// Pair a decision with its outcome, stamped now.
    pub fn new(decision: RoutingDecision, outcome: Outcome) -> Self {
        Self {
            decision,
            outcome,
            timestamp: Utc::now(),
            prompt: None,
        }
    }

    /// Attach the prompt text.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Telemetry write failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The audit file could not be opened or written.
    #[error("telemetry I/O error on {path}: {source}")]
    Io {
        /// Audit file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialised.
    #[error("telemetry serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Aggregated routing statistics.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageStats {
    /// Records appended.
    pub total_requests: u64,
    /// Records with a successful outcome.
    pub successful: u64,
    /// Records with a failed outcome.
    pub failed: u64,
    /// Sum of actual cost in USD.
    pub total_cost: f64,
    /// Sum of tokens consumed.
    pub total_tokens: u64,
    /// Mean actual cost per record.
    pub avg_cost: f64,
    /// Mean quality over records that reported one.
    pub avg_quality: Option<f64>,
    /// Mean dispatch latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Sum of the most expensive predicted cost per decision.
    pub baseline_cost: f64,
    /// `baseline_cost - total_cost` over successful records.
    pub savings: f64,
    /// Savings as a percentage of the baseline.
    pub savings_percent: f64,
    /// Records per provider.
    pub by_provider: BTreeMap<String, u64>,
    /// Records per `provider/model`.
    pub by_model: BTreeMap<String, u64>,
    /// Records per objective.
    pub by_objective: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct Accumulator {
    stats: UsageStats,
    latency_sum_ms: u128,
    quality_sum: f64,
    quality_count: u64,
    success_cost: f64,
}

impl Accumulator {
    fn absorb(&mut self, record: &TelemetryRecord) {
        let s = &mut self.stats;
        s.total_requests += 1;
        if record.outcome.success {
            s.successful += 1;
            s.baseline_cost += record.decision.baseline_cost();
            self.success_cost += record.outcome.actual_cost.max(0.0);
        } else {
            s.failed += 1;
        }
        s.total_cost += record.outcome.actual_cost.max(0.0);
        s.total_tokens += record.outcome.tokens_used;
        self.latency_sum_ms += u128::from(record.outcome.latency_ms);
        if let Some(q) = record.outcome.quality {
            self.quality_sum += q;
            self.quality_count += 1;
        }

        let chosen = &record.decision.chosen;
        *s.by_provider.entry(chosen.provider.clone()).or_default() += 1;
        *s.by_model.entry(chosen.key()).or_default() += 1;
        *s.by_objective
            .entry(record.decision.objective.as_str().to_string())
            .or_default() += 1;
    }

    fn snapshot(&self) -> UsageStats {
        let mut s = self.stats.clone();
        if s.total_requests > 0 {
            let n = s.total_requests as f64;
            s.avg_cost = s.total_cost / n;
            s.avg_latency_ms = self.latency_sum_ms as f64 / n;
        }
        if self.quality_count > 0 {
            s.avg_quality = Some(self.quality_sum / self.quality_count as f64);
        }
        s.savings = (s.baseline_cost - self.success_cost).max(0.0);
        if s.baseline_cost > 0.0 {
            s.savings_percent = s.savings / s.baseline_cost * 100.0;
        }
        s
    }
}

/// Append-only store of routing history.
///
/// Implementations must be thread-safe; the router shares one sink across
/// every concurrent call.
pub trait TelemetrySink: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the record could not be persisted.
    fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError>;

    /// Up to `limit` most recent records, newest first, optionally limited
    /// to one budget scope.
    fn recent(&self, scope: Option<&str>, limit: usize) -> Vec<TelemetryRecord>;

    /// Aggregates over every record appended so far.
    fn stats(&self) -> UsageStats;
}

// ── InMemoryTelemetry ──────────────────────────────────────────────────

/// Bounded in-memory sink.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct InMemoryTelemetry {
    capacity: usize,
    records: RwLock<VecDeque<TelemetryRecord>>,
    totals: Mutex<Accumulator>,
}

impl InMemoryTelemetry {
    /// Retain at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            totals: Mutex::new(Accumulator::default()),
        }
    }

    /// Records currently retained.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn push(&self, record: TelemetryRecord) {
        self.totals.lock().absorb(&record);
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

impl Default for InMemoryTelemetry {
    fn default() -> Self {
        Self::new(TelemetryConfig::default().capacity)
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        self.push(record);
        Ok(())
    }

    fn recent(&self, scope: Option<&str>, limit: usize) -> Vec<TelemetryRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .filter(|r| scope.map_or(true, |s| r.decision.budget_scopes.iter().any(|b| b == s)))
            .take(limit)
            .cloned()
            .collect()
    }

    fn stats(&self) -> UsageStats {
        self.totals.lock().snapshot()
    }
}

// ── JsonLinesTelemetry ─────────────────────────────────────────────────

/// Sink that appends one JSON object per line to a file and keeps an
/// in-memory view for queries.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct JsonLinesTelemetry {
    path: PathBuf,
    file: Mutex<LineWriter<File>>,
    memory: InMemoryTelemetry,
}

impl JsonLinesTelemetry {
    /// Open (or create) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(LineWriter::new(file)),
            memory: InMemoryTelemetry::new(capacity),
        })
    }

    /// Audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonLinesTelemetry {
    fn record(&self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(&record)?;
        {
            let mut file = self.file.lock();
            writeln!(file, "{line}").map_err(|source| TelemetryError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        }
        self.memory.push(record);
        Ok(())
    }

    fn recent(&self, scope: Option<&str>, limit: usize) -> Vec<TelemetryRecord> {
        self.memory.recent(scope, limit)
    }

    fn stats(&self) -> UsageStats {
        self.memory.stats()
    }
}

/// Build the sink described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::Io`] if a configured audit file cannot be
/// opened.
pub fn from_config(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>, TelemetryError> {
    match &config.path {
        Some(path) => Ok(Arc::new(JsonLinesTelemetry::open(path, config.capacity)?)),
        None => Ok(Arc::new(InMemoryTelemetry::new(config.capacity))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Alternate, CatalogEntry, LatencyClass, Objective};

    fn record(provider: &str, scope: Option<&str>, success: bool, cost: f64) -> TelemetryRecord {
        let decision = RoutingDecision {
            request_id: uuid::Uuid::new_v4().to_string(),
            chosen: CatalogEntry::new(provider, "m", 0.7, LatencyClass::Fast),
            estimated_cost: cost,
            objective: Objective::Cost,
            category: "simple_qa".into(),
            budget_scopes: scope.map(str::to_string).into_iter().collect(),
            alternates: vec![Alternate {
                provider: "premium".into(),
                model: "big".into(),
                score: 0.1,
                predicted_cost: 0.10,
            }],
        };
        let outcome = if success {
            Outcome {
                actual_cost: cost,
                latency_ms: 100,
                success: true,
                quality: Some(0.8),
                tokens_used: 50,
                error: None,
            }
        } else {
            Outcome::failure("boom", 300)
        };
        TelemetryRecord::new(decision, outcome)
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let sink = InMemoryTelemetry::new(10);
        for p in ["a", "b", "c"] {
            assert!(sink.record(record(p, None, true, 0.01)).is_ok());
        }
        let names: Vec<String> = sink
            .recent(None, 2)
            .into_iter()
            .map(|r| r.decision.chosen.provider)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn test_recent_filters_by_scope() {
        let sink = InMemoryTelemetry::new(10);
        let _ = sink.record(record("a", Some("daily"), true, 0.01));
        let _ = sink.record(record("b", Some("monthly"), true, 0.01));
        let _ = sink.record(record("c", None, true, 0.01));
        let got = sink.recent(Some("daily"), 10);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].decision.chosen.provider, "a");
    }

    #[test]
    fn test_capacity_evicts_oldest_but_stats_keep_everything() {
        let sink = InMemoryTelemetry::new(2);
        for p in ["a", "b", "c"] {
            let _ = sink.record(record(p, None, true, 0.01));
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.stats().total_requests, 3);
    }

    #[test]
    fn test_stats_aggregate_costs_and_savings() {
        let sink = InMemoryTelemetry::new(10);
        let _ = sink.record(record("cheap", None, true, 0.02));
        let _ = sink.record(record("cheap", None, true, 0.03));
        let _ = sink.record(record("cheap", None, false, 0.0));
        let s = sink.stats();

        assert_eq!(s.total_requests, 3);
        assert_eq!(s.successful, 2);
        assert_eq!(s.failed, 1);
        assert!((s.total_cost - 0.05).abs() < 1e-12);
        assert!((s.baseline_cost - 0.20).abs() < 1e-12);
        assert!((s.savings - 0.15).abs() < 1e-12);
        assert!((s.savings_percent - 75.0).abs() < 1e-9);
        assert_eq!(s.avg_quality, Some(0.8));
        assert!((s.avg_latency_ms - 500.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.by_provider.get("cheap"), Some(&3));
        assert_eq!(s.by_objective.get("cost"), Some(&3));
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let s = InMemoryTelemetry::default().stats();
        assert_eq!(s.total_requests, 0);
        assert!(s.avg_cost.abs() < f64::EPSILON);
        assert_eq!(s.avg_quality, None);
    }

    #[test]
    fn test_json_lines_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("telemetry.jsonl");
        let sink = JsonLinesTelemetry::open(&path, 10).expect("test: open sink");

        assert!(sink.record(record("a", None, true, 0.01)).is_ok());
        assert!(sink.record(record("b", None, false, 0.0)).is_ok());

        let text = std::fs::read_to_string(&path).expect("test: read file");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TelemetryRecord =
            serde_json::from_str(lines[1]).expect("test: parse second line");
        assert_eq!(parsed.decision.chosen.provider, "b");
        assert!(!parsed.outcome.success);
        assert_eq!(sink.recent(None, 5).len(), 2);
    }

    #[test]
    fn test_json_lines_open_in_missing_dir_fails() {
        let result = JsonLinesTelemetry::open("/definitely/not/here/t.jsonl", 10);
        assert!(matches!(result, Err(TelemetryError::Io { .. })));
    }

    #[test]
    fn test_prompt_is_omitted_from_json_when_absent() {
        let json = serde_json::to_string(&record("a", None, true, 0.01)).expect("test: serialise");
        assert!(!json.contains("\"prompt\""));
        let with = record("a", None, true, 0.01).with_prompt("hello");
        let json = serde_json::to_string(&with).expect("test: serialise");
        assert!(json.contains("\"prompt\":\"hello\""));
    }

    #[test]
    fn test_from_config_builds_in_memory_sink_without_path() {
        let sink = from_config(&TelemetryConfig::default()).expect("test: build sink");
        assert!(sink.record(record("a", None, true, 0.01)).is_ok());
        assert_eq!(sink.stats().total_requests, 1);
    }
}
