//! # agent-router
//!
//! Cost-aware request routing for LLM providers over Tokio.
//!
//! ## Architecture
//!
//! ```text
//! Request → Catalog(list_candidates) → Scorer(rank) → Ledger(reserve)
//!         → ProviderAdapter(dispatch) → Ledger(commit | release) → Telemetry(record)
//! ```
//!
//! The [`Router`](routing::Router) drives each call through an explicit state
//! machine with bounded retries and candidate fallback. Budget state lives
//! only in the [`BudgetLedger`](routing::BudgetLedger); routing history lives
//! only in a [`TelemetrySink`](telemetry::TelemetrySink).

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod metrics;
pub mod provider;
pub mod routing;
pub mod telemetry;

// Re-exports for convenience
pub use config::RouterConfig;
pub use provider::{DispatchResult, ProviderAdapter, ProviderError, SimulatedProvider};
pub use routing::{
    AttemptFailure, BudgetLedger, CatalogEntry, FailureKind, FailureReason, LatencyClass,
    Objective, Outcome, Request, RouteResponse, Router, RouterBuilder, RoutingDecision,
};
pub use telemetry::{InMemoryTelemetry, TelemetryRecord, TelemetrySink};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=agent_router=debug`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use agent_router::{init_tracing, RouterError};
/// # fn example() -> Result<(), RouterError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), RouterError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| RouterError::Other(format!("tracing init failed: {e}")))
}

/// Top-level router errors.
///
/// Every failure that reaches a caller of [`Router::route`](routing::Router::route)
/// is mapped to a variant here.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The routing call ended in the `FAILED` state.
    ///
    /// `attempts` lists every candidate that was tried or rejected, in
    /// order, with the reason it was rejected, so callers can tell
    /// "nothing affordable" apart from "everything errored".
    #[error("routing failed ({kind}) after {} rejected candidate(s)", .attempts.len())]
    RoutingFailed {
        /// Why the call as a whole failed.
        kind: FailureKind,
        /// Ordered per-candidate rejection reasons.
        attempts: Vec<AttemptFailure>,
    },

    /// The budget ledger rejected an operation for a reason other than a
    /// spend ceiling (unknown scope, invalid amount).
    #[error(transparent)]
    Ledger(#[from] routing::LedgerError),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl RouterError {
    /// Return the [`FailureKind`] if this is a routing failure.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::RoutingFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Return the per-candidate rejection list (empty for non-routing errors).
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::RoutingFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
