//! Routing state machine.
//!
//! The [`Router`] drives one call through
//!
//! ```text
//! INITIATED → CANDIDATES_RANKED → BUDGET_RESERVED → DISPATCHED
//!                                      ↑                 │
//!                                      └─ RETRY_PENDING ←┤
//!                                                        ├→ SUCCEEDED
//!                                                        └→ FAILED
//! ```
//!
//! as an explicit loop over the ranked candidates with a retry counter
//! shared by the whole call.
//!
//! ## Guarantees
//! - No ledger lock is held while a provider is dispatched.
//! - A reservation is always either committed, released, or released on
//!   drop: cancelling the `route` future (dropping it, or aborting the task
//!   running it) releases any held reservation and records no telemetry.
//! - Telemetry write failures are logged and never change the result.
//! - Each call reads one snapshot of catalog, scorer and settings; a
//!   concurrent [`Router::apply_config`] affects only later calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{validation, RouterConfig};
use crate::metrics;
use crate::provider::{DispatchResult, ProviderAdapter, ProviderError};
use crate::telemetry::{self, TelemetryRecord, TelemetrySink, UsageStats};
use crate::RouterError;

use super::backoff::BackoffPolicy;
use super::catalog::{categorize, Catalog};
use super::ledger::{BudgetLedger, LedgerError, ReservationToken};
use super::scorer::{Objective, RankError, ScoredCandidate, Scorer};
use super::types::{Alternate, Outcome, Request, RoutingDecision};

// ── State machine vocabulary ───────────────────────────────────────────

/// States of one routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteState {
    /// Call accepted.
    Initiated,
    /// Scorer produced a non-empty ranking.
    CandidatesRanked,
    /// Budget held for the current candidate.
    BudgetReserved,
    /// Provider call in flight.
    Dispatched,
    /// Terminal: a candidate succeeded.
    Succeeded,
    /// A retryable failure; the next candidate will be tried.
    RetryPending,
    /// Terminal: no candidate succeeded.
    Failed,
}

/// Why a single candidate was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    /// A budget scope could not cover the predicted cost.
    #[error("budget scope '{scope}' has ${available:.6} left, needed ${requested:.6}")]
    BudgetExceeded {
        /// First scope that rejected the reservation.
        scope: String,
        /// Predicted cost that was requested.
        requested: f64,
        /// What the scope still had available.
        available: f64,
    },

    /// The predicted cost is above the request's own ceiling.
    #[error("predicted ${predicted:.6} exceeds per-request ceiling ${ceiling:.6}")]
    CeilingExceeded {
        /// The request's `max_cost`.
        ceiling: f64,
        /// The candidate's predicted cost.
        predicted: f64,
    },

    /// Retryable provider error.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The attempt did not finish within the per-attempt timeout.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Non-retryable provider error.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// The result's quality signal is below the request's minimum.
    #[error("quality {observed:.3} below required {required:.3}")]
    QualityBelowThreshold {
        /// Quality reported by the adapter.
        observed: f64,
        /// The request's `min_quality`.
        required: f64,
    },

    /// No adapter is registered for the candidate's provider.
    #[error("no adapter registered for provider")]
    NoAdapter,
}

impl FailureReason {
    /// Whether the rejection was about money rather than the provider.
    pub fn is_budget(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. } | Self::CeilingExceeded { .. })
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::CeilingExceeded { .. } => "ceiling_exceeded",
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::Permanent(_) => "permanent",
            Self::QualityBelowThreshold { .. } => "low_quality",
            Self::NoAdapter => "no_adapter",
        }
    }
}

/// One rejected candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// Provider identifier.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Why it was rejected.
    pub reason: FailureReason,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.provider, self.model, self.reason)
    }
}

/// Why a whole routing call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The catalog offered nothing to rank.
    NoViableCandidate,
    /// Every candidate was unaffordable under the scope or request ceiling.
    BudgetExhausted,
    /// A provider reported a non-retryable error.
    PermanentProviderError,
    /// The call's retry budget ran out.
    RetriesExhausted,
    /// Every candidate was tried and none succeeded.
    CandidatesExhausted,
}

impl FailureKind {
    /// Snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoViableCandidate => "no_viable_candidate",
            Self::BudgetExhausted => "budget_exhausted",
            Self::PermanentProviderError => "permanent_provider_error",
            Self::RetriesExhausted => "retries_exhausted",
            Self::CandidatesExhausted => "candidates_exhausted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful routing call.
#[derive(Debug, Clone)]
pub struct RouteResponse {
    /// The decision that succeeded.
    pub decision: RoutingDecision,
    /// Its outcome.
    pub outcome: Outcome,
    /// Provider output.
    pub output: String,
    /// Candidates rejected before this one, in order.
    pub attempts: Vec<AttemptFailure>,
    /// Retries consumed.
    pub retries: u32,
    /// States visited, in order.
    pub transitions: Vec<RouteState>,
}

// ── Settings snapshot ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RouterSettings {
    default_objective: Objective,
    default_scopes: Vec<String>,
    max_retries: u32,
    attempt_timeout: Duration,
    backoff: BackoffPolicy,
    include_prompts: bool,
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            default_objective: config.default_objective,
            default_scopes: config.default_budget_scopes(),
            max_retries: config.max_retries_per_call,
            attempt_timeout: config.attempt_timeout(),
            backoff: BackoffPolicy::from_millis(config.retry_backoff_ms, config.retry_backoff_max_ms),
            include_prompts: config.telemetry.include_prompts,
        }
    }
}

// ── Reservation guard ──────────────────────────────────────────────────

/// Releases its reservation on drop unless committed or released first.
struct ReservationGuard<'a> {
    ledger: &'a BudgetLedger,
    token: Option<ReservationToken>,
}

impl<'a> ReservationGuard<'a> {
    fn new(ledger: &'a BudgetLedger, token: ReservationToken) -> Self {
        Self {
            ledger,
            token: Some(token),
        }
    }

    fn commit(mut self, actual_cost: f64) {
        if let Some(token) = self.token.take() {
            let reservation = token.to_string();
            if let Err(e) = self.ledger.commit(token, actual_cost) {
                warn!(reservation, error = %e, "could not commit spend");
            }
        }
    }

    fn release(mut self) {
        if let Some(token) = self.token.take() {
            self.ledger.release(&token);
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if self.ledger.release(&token) {
                debug!(reservation = %token, "routing call dropped, reservation released");
            }
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────

/// Cost-aware router.
///
/// Thread-safe; share one instance behind an `Arc` across all callers.
///
/// # Panics
///
/// This type and its methods never panic.
pub struct Router {
    catalog: Catalog,
    scorer: RwLock<Scorer>,
    settings: RwLock<RouterSettings>,
    ledger: Arc<BudgetLedger>,
    telemetry: Arc<dyn TelemetrySink>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&String> = self.providers.keys().collect();
        providers.sort();
        f.debug_struct("Router")
            .field("catalog_entries", &self.catalog.len())
            .field("settings", &*self.settings.read())
            .field("providers", &providers)
            .finish()
    }
}

/// Assembles a [`Router`].
pub struct RouterBuilder {
    config: RouterConfig,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    ledger: Option<Arc<BudgetLedger>>,
}

impl RouterBuilder {
    /// Start from a config.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            telemetry: None,
            ledger: None,
        }
    }

    /// Register an adapter under its [`ProviderAdapter::name`]. A later
    /// adapter with the same name replaces an earlier one.
    pub fn provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.insert(adapter.name().to_string(), adapter);
        self
    }

    /// Use this sink instead of the one described by the config.
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Share an existing ledger instead of building one from the config.
    pub fn ledger(mut self, ledger: Arc<BudgetLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Validate the config and build the router.
    ///
    /// # Errors
    ///
    /// [`RouterError::ConfigError`] if the config fails validation, if the
    /// attempt timeout is not shorter than the ledger's reservation timeout
    /// (relevant when a ledger was injected), or if the configured
    /// telemetry file cannot be opened.
    pub fn build(self) -> Result<Router, RouterError> {
        validation::validate(&self.config).map_err(|errors| {
            RouterError::ConfigError(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let telemetry = match self.telemetry {
            Some(sink) => sink,
            None => telemetry::from_config(&self.config.telemetry)
                .map_err(|e| RouterError::ConfigError(e.to_string()))?,
        };
        let ledger = self.ledger.unwrap_or_else(|| {
            Arc::new(BudgetLedger::new(
                &self.config.budget_limits,
                self.config.reservation_timeout(),
            ))
        });
        validation::check_attempt_within_reservation(
            self.config.attempt_timeout(),
            ledger.reservation_timeout(),
        )
        .map_err(|e| RouterError::ConfigError(e.to_string()))?;

        for entry in &self.config.catalog_entries {
            if !self.providers.contains_key(&entry.provider) {
                warn!(
                    provider = %entry.provider,
                    model = %entry.model,
                    "catalog entry has no registered adapter"
                );
            }
        }

        Ok(Router {
            catalog: Catalog::new(self.config.catalog_entries.clone()),
            scorer: RwLock::new(Scorer::with_output_ratio(self.config.default_output_ratio)),
            settings: RwLock::new(RouterSettings::from(&self.config)),
            ledger,
            telemetry,
            providers: self.providers,
        })
    }
}

/// Per-call bookkeeping.
struct CallLog {
    transitions: Vec<RouteState>,
    attempts: Vec<AttemptFailure>,
    last: Option<(RoutingDecision, Outcome)>,
}

impl CallLog {
    fn enter(&mut self, state: RouteState) {
        debug!(?state, "route state");
        self.transitions.push(state);
    }

    fn reject(&mut self, candidate: &ScoredCandidate, reason: FailureReason) {
        metrics::record_attempt(&candidate.entry.provider, reason.label());
        self.attempts.push(AttemptFailure {
            provider: candidate.entry.provider.clone(),
            model: candidate.entry.model.clone(),
            reason,
        });
    }
}

impl Router {
    /// Route `request` under its own objective, or the configured default.
    ///
    /// # Errors
    ///
    /// - [`RouterError::RoutingFailed`] when the call ends in `FAILED`.
    /// - [`RouterError::Ledger`] when the budget scope is not configured.
    pub async fn route(&self, request: &Request) -> Result<RouteResponse, RouterError> {
        let objective = request
            .objective
            .unwrap_or_else(|| self.settings.read().default_objective);
        self.route_with_objective(request, objective).await
    }

    /// Route `request` under an explicit objective.
    ///
    /// # Errors
    ///
    /// Same as [`Router::route`].
    pub async fn route_with_objective(
        &self,
        request: &Request,
        objective: Objective,
    ) -> Result<RouteResponse, RouterError> {
        let category = request
            .category
            .clone()
            .unwrap_or_else(|| categorize(&request.prompt).to_string());
        let span = tracing::info_span!(
            "route",
            request_id = %request.request_id,
            objective = %objective,
            category = %category,
        );
        self.run(request, objective, category).instrument(span).await
    }

    async fn run(
        &self,
        request: &Request,
        objective: Objective,
        category: String,
    ) -> Result<RouteResponse, RouterError> {
        let settings = self.settings.read().clone();
        let scorer = self.scorer.read().clone();
        let mut log = CallLog {
            transitions: Vec::new(),
            attempts: Vec::new(),
            last: None,
        };
        log.enter(RouteState::Initiated);

        // INITIATED → CANDIDATES_RANKED
        let candidates = self
            .catalog
            .list_candidates(&category, &request.excluded_providers);

        let ranked = match scorer.rank(&candidates, request, objective) {
            Ok(ranked) => ranked,
            Err(RankError::NoCandidates) => {
                return Err(self.fail(FailureKind::NoViableCandidate, log, request, &settings));
            }
            Err(RankError::ExceedsCeiling { ceiling, rejected }) => {
                for (provider, model, predicted) in rejected {
                    metrics::record_attempt(&provider, "ceiling_exceeded");
                    log.attempts.push(AttemptFailure {
                        provider,
                        model,
                        reason: FailureReason::CeilingExceeded { ceiling, predicted },
                    });
                }
                return Err(self.fail(FailureKind::BudgetExhausted, log, request, &settings));
            }
        };
        log.enter(RouteState::CandidatesRanked);

        let scopes = if request.budget_scopes.is_empty() {
            settings.default_scopes.clone()
        } else {
            request.budget_scopes.clone()
        };
        let mut retries: u32 = 0;

        for (idx, candidate) in ranked.iter().enumerate() {
            let decision = decision_for(request, &ranked, idx, objective, &category, &scopes);
            let provider = candidate.entry.provider.as_str();

            let Some(adapter) = self.providers.get(provider) else {
                log.reject(candidate, FailureReason::NoAdapter);
                continue;
            };

            // CANDIDATES_RANKED | RETRY_PENDING → BUDGET_RESERVED
            let guard = if scopes.is_empty() {
                None
            } else {
                match self.ledger.reserve_all(scopes.as_slice(), candidate.predicted_cost) {
                    Ok(token) => Some(ReservationGuard::new(&self.ledger, token)),
                    Err(LedgerError::BudgetExceeded {
                        scope,
                        committed,
                        reserved,
                        limit,
                        ..
                    }) => {
                        let available = (limit - committed - reserved).max(0.0);
                        debug!(provider, model = %candidate.entry.model, %scope, available, "candidate unaffordable");
                        let reason = FailureReason::BudgetExceeded {
                            scope,
                            requested: candidate.predicted_cost,
                            available,
                        };
                        log.last = Some((decision, Outcome::failure(reason.to_string(), 0)));
                        log.reject(candidate, reason);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            log.enter(RouteState::BudgetReserved);

            // BUDGET_RESERVED → DISPATCHED
            log.enter(RouteState::Dispatched);
            let started = Instant::now();
            let result = tokio::time::timeout(
                settings.attempt_timeout,
                adapter.dispatch(&candidate.entry.model, request),
            )
            .await;
            let elapsed = started.elapsed();
            metrics::record_dispatch_latency(provider, elapsed);
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            let reason = match result {
                Ok(Ok(dispatched)) => {
                    let below = request
                        .min_quality
                        .zip(dispatched.quality)
                        .filter(|(required, observed)| observed < required);

                    // Only an accepted result turns its reservation into spend.
                    if let Some(guard) = guard {
                        if below.is_none() {
                            guard.commit(dispatched.actual_cost);
                        } else {
                            guard.release();
                        }
                    }
                    self.publish_budget(&scopes);

                    match below {
                        None => {
                            return Ok(self.succeed(
                                decision, dispatched, elapsed_ms, log, retries, request, &settings,
                            ));
                        }
                        Some((required, observed)) => {
                            let reason = FailureReason::QualityBelowThreshold { observed, required };
                            let mut outcome = success_outcome(&dispatched, elapsed_ms);
                            outcome.success = false;
                            outcome.error = Some(reason.to_string());
                            log.last = Some((decision, outcome));
                            reason
                        }
                    }
                }
                Ok(Err(err)) => {
                    if let Some(guard) = guard {
                        guard.release();
                    }
                    self.publish_budget(&scopes);
                    log.last = Some((decision, Outcome::failure(err.to_string(), elapsed_ms)));
                    match err {
                        ProviderError::Permanent { message, .. } => {
                            log.reject(candidate, FailureReason::Permanent(message));
                            return Err(self.fail(
                                FailureKind::PermanentProviderError,
                                log,
                                request,
                                &settings,
                            ));
                        }
                        ProviderError::Transient { message, .. } => FailureReason::Transient(message),
                    }
                }
                Err(_) => {
                    if let Some(guard) = guard {
                        guard.release();
                    }
                    self.publish_budget(&scopes);
                    let reason = FailureReason::Timeout(settings.attempt_timeout);
                    log.last = Some((decision, Outcome::failure(reason.to_string(), elapsed_ms)));
                    reason
                }
            };

            // DISPATCHED → RETRY_PENDING
            warn!(provider, model = %candidate.entry.model, reason = %reason, retries, "attempt failed");
            log.reject(candidate, reason);
            log.enter(RouteState::RetryPending);

            if retries >= settings.max_retries {
                return Err(self.fail(FailureKind::RetriesExhausted, log, request, &settings));
            }
            retries += 1;
            if idx + 1 < ranked.len() {
                settings.backoff.wait(retries).await;
            }
        }

        let kind = if !log.attempts.is_empty() && log.attempts.iter().all(|a| a.reason.is_budget()) {
            FailureKind::BudgetExhausted
        } else {
            FailureKind::CandidatesExhausted
        };
        Err(self.fail(kind, log, request, &settings))
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        decision: RoutingDecision,
        dispatched: DispatchResult,
        elapsed_ms: u64,
        mut log: CallLog,
        retries: u32,
        request: &Request,
        settings: &RouterSettings,
    ) -> RouteResponse {
        log.enter(RouteState::Succeeded);
        let outcome = success_outcome(&dispatched, elapsed_ms);

        metrics::record_attempt(&decision.chosen.provider, "success");
        metrics::record_route("succeeded");
        info!(
            provider = %decision.chosen.provider,
            model = %decision.chosen.model,
            estimated_cost = decision.estimated_cost,
            actual_cost = outcome.actual_cost,
            latency_ms = outcome.latency_ms,
            retries,
            "routing succeeded"
        );
        self.record(decision.clone(), outcome.clone(), request, settings);

        RouteResponse {
            decision,
            outcome,
            output: dispatched.output,
            attempts: log.attempts,
            retries,
            transitions: log.transitions,
        }
    }

    fn fail(
        &self,
        kind: FailureKind,
        mut log: CallLog,
        request: &Request,
        settings: &RouterSettings,
    ) -> RouterError {
        log.enter(RouteState::Failed);
        if let Some((decision, outcome)) = log.last.take() {
            self.record(decision, outcome, request, settings);
        }
        metrics::record_route(kind.as_str());
        error!(%kind, rejected = log.attempts.len(), "routing failed");
        RouterError::RoutingFailed {
            kind,
            attempts: log.attempts,
        }
    }

    fn record(
        &self,
        decision: RoutingDecision,
        outcome: Outcome,
        request: &Request,
        settings: &RouterSettings,
    ) {
        let mut record = TelemetryRecord::new(decision, outcome);
        if settings.include_prompts {
            record = record.with_prompt(request.prompt.clone());
        }
        if let Err(e) = self.telemetry.record(record) {
            warn!(error = %e, "telemetry write failed, routing result unaffected");
        }
    }

    fn publish_budget(&self, scopes: &[String]) {
        for scope in scopes {
            if let Ok(state) = self.ledger.status(scope) {
                metrics::set_budget_gauges(&state);
            }
        }
    }

    // ── Configuration ──────────────────────────────────────────────────

    /// Apply a reloaded config.
    ///
    /// Swaps the catalog snapshot, updates budget limits (spend and
    /// outstanding reservations are kept) and replaces retry, timeout and
    /// objective settings. The reservation timeout is fixed when the ledger
    /// is built and is not changed here, so an attempt timeout that would
    /// outlive it is ignored and the current one kept.
    pub fn apply_config(&self, config: &RouterConfig) {
        self.catalog.reload(config.catalog_entries.clone());
        self.ledger.apply_limits(&config.budget_limits);
        *self.scorer.write() = Scorer::with_output_ratio(config.default_output_ratio);

        let mut next = RouterSettings::from(config);
        if let Err(e) = validation::check_attempt_within_reservation(
            next.attempt_timeout,
            self.ledger.reservation_timeout(),
        ) {
            warn!(error = %e, "keeping current attempt timeout");
            next.attempt_timeout = self.settings.read().attempt_timeout;
        }
        *self.settings.write() = next;
        info!(
            catalog_entries = config.catalog_entries.len(),
            budget_scopes = config.budget_limits.len(),
            "router config applied"
        );
    }

    /// Apply every config received on `rx` until the channel closes.
    pub fn spawn_config_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<RouterConfig>,
    ) -> tokio::task::JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(config) => router.apply_config(&config),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "config listener lagged, waiting for the next update");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// The capability catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The budget ledger.
    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    /// The telemetry sink.
    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    /// Aggregated usage statistics.
    pub fn stats(&self) -> UsageStats {
        self.telemetry.stats()
    }
}

fn success_outcome(dispatched: &DispatchResult, elapsed_ms: u64) -> Outcome {
    Outcome {
        actual_cost: dispatched.actual_cost.max(0.0),
        latency_ms: u64::try_from(dispatched.latency.as_millis()).unwrap_or(elapsed_ms),
        success: true,
        quality: dispatched.quality,
        tokens_used: dispatched.tokens_used,
        error: None,
    }
}

fn decision_for(
    request: &Request,
    ranked: &[ScoredCandidate],
    chosen: usize,
    objective: Objective,
    category: &str,
    scopes: &[String],
) -> RoutingDecision {
    let alternates = ranked
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != chosen)
        .map(|(_, c)| Alternate {
            provider: c.entry.provider.clone(),
            model: c.entry.model.clone(),
            score: c.score,
            predicted_cost: c.predicted_cost,
        })
        .collect();
    let candidate = &ranked[chosen];
    RoutingDecision {
        request_id: request.request_id.clone(),
        chosen: candidate.entry.clone(),
        estimated_cost: candidate.predicted_cost,
        objective,
        category: category.to_string(),
        budget_scopes: scopes.to_vec(),
        alternates,
    }
}
