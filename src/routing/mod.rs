//! # Stage: Cost-Aware Routing
//!
//! ## Responsibility
//! Pick a provider/model for each request under an optimisation objective,
//! hold budget for it, dispatch it, fall back to the next candidate on
//! retryable failures, and record what happened.
//!
//! ## Guarantees
//! - Deterministic: identical catalog, request and objective always rank
//!   candidates in the same order (stable sort, catalog order on ties).
//! - Thread-safe: catalog, ledger and settings use interior locking and are
//!   shared by every concurrent call.
//! - Budget-safe: concurrent reservations never push a scope past its limit.
//! - Bounded: each call makes at most `max_retries_per_call + 1` dispatches.
//!
//! ## NOT Responsible For
//! - Talking to providers (that belongs to `provider`)
//! - Persisting history (that belongs to `telemetry`)
//! - Learning rankings from history

pub mod backoff;
pub mod catalog;
pub mod ledger;
pub mod router;
pub mod scorer;
pub mod types;

// Re-exports for convenience
pub use backoff::BackoffPolicy;
pub use catalog::{categorize, filter_by_category, Catalog, CatalogEntry, LatencyClass};
pub use ledger::{
    BudgetLedger, BudgetLimit, BudgetPeriod, BudgetRecommendation, BudgetState, LedgerError,
    ReservationToken, MIN_SWEEP_PERIOD,
};
pub use router::{
    AttemptFailure, FailureKind, FailureReason, RouteResponse, RouteState, Router, RouterBuilder,
};
pub use scorer::{Objective, RankError, ScoredCandidate, Scorer, TokenEstimate, Weights};
pub use types::{Alternate, Outcome, Request, RoutingDecision};
