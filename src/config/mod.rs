//! # Router Configuration
//!
//! ## Responsibility
//! Parse, validate, and hot-reload the TOML file that defines the
//! capability catalog, budget scopes and retry policy:
//! ```text
//! agent-router --config router.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `RouterConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Hot-reloadable: file changes are detected and validated before applying
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Applying a config to a running router (that belongs to `routing::router`)
//! - Provider credentials (adapters own those)

pub mod loader;
pub mod validation;
pub mod watcher;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::routing::{BudgetLimit, CatalogEntry, Objective};

// ── Default value functions ──────────────────────────────────────────────

/// Default reservation lifetime: 300 seconds.
fn default_reservation_timeout_seconds() -> u64 {
    300
}

/// Default retry budget per routing call.
fn default_max_retries_per_call() -> u32 {
    2
}

/// Default per-attempt dispatch timeout: 30 seconds.
fn default_attempt_timeout_ms() -> u64 {
    30_000
}

/// Default backoff cap: 2000ms.
fn default_retry_backoff_max_ms() -> u64 {
    2000
}

/// Predicted output tokens per input token.
fn default_output_ratio() -> f64 {
    0.5
}

/// Default in-memory telemetry capacity.
fn default_telemetry_capacity() -> usize {
    10_000
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a router instance.
///
/// Deserialized from a TOML file and validated before use.
/// Every field other than `catalog_entries` has a documented default.
///
/// # Example
///
/// ```toml
/// default_objective = "cost"
/// default_scope = "daily"
///
/// [budget_limits.daily]
/// limit = 10.0
///
/// [[catalog_entries]]
/// provider = "openai"
/// model = "gpt-4o-mini"
/// input_cost_per_1k = 0.00015
/// output_cost_per_1k = 0.0006
/// quality = 0.78
/// latency = "fast"
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterConfig {
    /// Objective applied when a request does not declare one.
    #[serde(default)]
    pub default_objective: Objective,
    /// Scope charged when a request names none. No charge when this and
    /// `default_scopes` are both unset.
    #[serde(default)]
    pub default_scope: Option<String>,
    /// Further scopes charged together with `default_scope`, e.g.
    /// `["daily", "monthly"]`. One reservation holds all of them.
    #[serde(default)]
    pub default_scopes: Vec<String>,
    /// Seconds before an uncommitted reservation is auto-released.
    #[serde(default = "default_reservation_timeout_seconds")]
    pub reservation_timeout_seconds: u64,
    /// Retries allowed across one routing call (not per candidate).
    #[serde(default = "default_max_retries_per_call")]
    pub max_retries_per_call: u32,
    /// Timeout for a single dispatch attempt in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Base delay before the next candidate after a retryable failure.
    /// Zero disables backoff.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Upper bound on a single backoff delay.
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    /// Predicted output tokens per input token when a request sets no
    /// `max_output_tokens`.
    #[serde(default = "default_output_ratio")]
    pub default_output_ratio: f64,
    /// Scope name → ceiling.
    #[serde(default)]
    pub budget_limits: BTreeMap<String, BudgetLimit>,
    /// Capability catalog.
    pub catalog_entries: Vec<CatalogEntry>,
    /// Telemetry sink settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RouterConfig {
    /// A config with the given catalog and every other field defaulted.
    pub fn with_catalog(catalog_entries: Vec<CatalogEntry>) -> Self {
        Self {
            default_objective: Objective::default(),
            default_scope: None,
            default_scopes: Vec::new(),
            reservation_timeout_seconds: default_reservation_timeout_seconds(),
            max_retries_per_call: default_max_retries_per_call(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            retry_backoff_ms: 0,
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            default_output_ratio: default_output_ratio(),
            budget_limits: BTreeMap::new(),
            catalog_entries,
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Scopes charged when a request names none: `default_scope` first,
    /// then `default_scopes`, without repeats.
    pub fn default_budget_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.default_scope.iter().chain(&self.default_scopes) {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        scopes
    }

    /// Reservation lifetime as a [`Duration`].
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_seconds)
    }

    /// Per-attempt dispatch timeout as a [`Duration`].
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

// ── Telemetry ────────────────────────────────────────────────────────────

/// Telemetry sink settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TelemetryConfig {
    /// Records retained in memory for `recent` queries.
    #[serde(default = "default_telemetry_capacity")]
    pub capacity: usize,
    /// Optional JSON-lines audit file. In-memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Store prompt text in telemetry records.
    #[serde(default)]
    pub include_prompts: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: default_telemetry_capacity(),
            path: None,
            include_prompts: false,
        }
    }
}

// ── JSON Schema export ───────────────────────────────────────────────────

/// Export the JSON Schema for [`RouterConfig`] as a pretty-printed string.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(RouterConfig);
    serde_json::to_string_pretty(&schema)
}
