//! Budget ledger.
//!
//! Tracks committed and reserved spend per budget scope and enforces each
//! scope's ceiling.
//!
//! ## Guarantees
//! - `reserve` is an atomic check-and-increment: two concurrent reservations
//!   can never both succeed if together they would breach the limit.
//! - `reserve_all` holds the amount against several scopes at once: either
//!   every scope accepts it or none is touched.
//! - `committed + reserved <= limit` holds after every successful reservation.
//! - `release` is idempotent; releasing twice frees the amount once.
//! - Reservations that are neither committed nor released expire after the
//!   configured timeout and are released automatically.
//! - Amounts are stored as nano-dollars (1 USD = 10^9) so long-running
//!   aggregation does not drift.
//!
//! ## NOT Responsible For
//! - Choosing what to reserve (that belongs to the router)
//! - Persisting spend across restarts

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Nano-dollars per USD.
const NANOS_PER_USD: f64 = 1_000_000_000.0;

/// Shortest period accepted by [`BudgetLedger::spawn_sweeper`].
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

// ── Configuration types ────────────────────────────────────────────────

/// Accounting window after which committed spend resets.
///
/// # Panics
///
/// This type never panics.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Resets every 24 hours.
    #[default]
    Daily,
    /// Resets every 30 days.
    Monthly,
    /// Never resets on its own.
    Session,
}

impl BudgetPeriod {
    /// Length of the window, or `None` for [`BudgetPeriod::Session`].
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            Self::Monthly => Some(Duration::from_secs(30 * 24 * 60 * 60)),
            Self::Session => None,
        }
    }
}

fn default_alert_threshold() -> f64 {
    0.8
}

/// Configured ceiling for one scope.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BudgetLimit {
    /// Maximum USD spend per period.
    pub limit: f64,
    /// Reset window.
    #[serde(default)]
    pub period: BudgetPeriod,
    /// Fraction of `limit` at which a one-off warning is logged.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

impl BudgetLimit {
    /// A daily limit with the default alert threshold.
    pub fn daily(limit: f64) -> Self {
        Self {
            limit,
            period: BudgetPeriod::Daily,
            alert_threshold: default_alert_threshold(),
        }
    }

    /// A limit with an explicit period.
    pub fn with_period(limit: f64, period: BudgetPeriod) -> Self {
        Self {
            limit,
            period,
            alert_threshold: default_alert_threshold(),
        }
    }
}

// ── Public records ─────────────────────────────────────────────────────

/// Handle for a provisional hold.
///
/// Not `Clone`: [`BudgetLedger::commit`] consumes it, so a reservation can
/// be committed at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReservationToken {
    id: u64,
    scopes: Vec<Arc<str>>,
}

impl ReservationToken {
    /// First scope the reservation was taken against.
    pub fn scope(&self) -> &str {
        self.scopes.first().map_or("", |s| &**s)
    }

    /// Every scope the reservation holds, in request order.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(|s| &**s)
    }

    /// Ledger-unique reservation id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, scope) in self.scopes.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            f.write_str(scope)?;
        }
        write!(f, "#{}", self.id)
    }
}

/// Read-only snapshot of one scope.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetState {
    /// Scope identifier.
    pub scope: String,
    /// Reset window.
    pub period: BudgetPeriod,
    /// Configured ceiling in USD.
    pub limit: f64,
    /// Spend committed in the current period, in USD.
    pub committed: f64,
    /// Spend reserved but not yet committed or released, in USD.
    pub reserved: f64,
    /// Number of outstanding reservations.
    pub outstanding: usize,
}

impl BudgetState {
    /// USD still available for new reservations (never negative).
    pub fn remaining(&self) -> f64 {
        (self.limit - self.committed - self.reserved).max(0.0)
    }

    /// Committed spend as a percentage of the limit.
    pub fn usage_percent(&self) -> f64 {
        if self.limit > 0.0 {
            (self.committed / self.limit) * 100.0
        } else {
            0.0
        }
    }
}

/// Spend-based limit suggestion for one scope.
///
/// Suggests a daily figure with 20% headroom over the scope's spend per
/// day so far, and a monthly figure of thirty such days.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetRecommendation {
    /// Scope identifier.
    pub scope: String,
    /// Reset window of the scope.
    pub period: BudgetPeriod,
    /// Suggested daily ceiling in USD.
    pub suggested_daily: f64,
    /// Suggested 30-day ceiling in USD.
    pub suggested_monthly: f64,
    /// Human-readable basis for the figures.
    pub reasoning: String,
}

/// Headroom applied on top of observed daily spend.
const RECOMMENDATION_HEADROOM: f64 = 1.2;

/// Days in a recommended month.
const DAYS_PER_MONTH: f64 = 30.0;

/// Ledger operation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// The reservation would push the scope past its ceiling.
    #[error(
        "budget exceeded for scope '{scope}': requested ${requested:.6}, \
         committed ${committed:.6}, reserved ${reserved:.6}, limit ${limit:.6}"
    )]
    BudgetExceeded {
        /// Scope that rejected the reservation.
        scope: String,
        /// Amount requested in USD.
        requested: f64,
        /// Committed spend at rejection time.
        committed: f64,
        /// Reserved spend at rejection time.
        reserved: f64,
        /// Configured ceiling.
        limit: f64,
    },

    /// No budget is configured for this scope.
    #[error("unknown budget scope '{0}'")]
    UnknownScope(String),

    /// A reservation was requested against an empty scope list.
    #[error("no budget scope given")]
    NoScope,

    /// Negative or non-finite amount.
    #[error("invalid amount {0}")]
    InvalidAmount(f64),
}

impl LedgerError {
    /// USD still available when a `BudgetExceeded` was raised.
    pub fn available(&self) -> Option<f64> {
        match self {
            Self::BudgetExceeded {
                committed,
                reserved,
                limit,
                ..
            } => Some((limit - committed - reserved).max(0.0)),
            _ => None,
        }
    }
}

// ── Internal state ─────────────────────────────────────────────────────

#[derive(Debug)]
struct ScopeState {
    period: BudgetPeriod,
    limit: u64,
    committed: u64,
    reserved: u64,
    alert_threshold: f64,
    period_start: Instant,
    alerted: bool,
    /// Commits seen since the scope was created. Not reset by rollover.
    commits: u64,
}

impl ScopeState {
    fn new(limit: &BudgetLimit, now: Instant) -> Self {
        Self {
            period: limit.period,
            limit: usd_to_nanos(limit.limit),
            committed: 0,
            reserved: 0,
            alert_threshold: limit.alert_threshold,
            period_start: now,
            alerted: false,
            commits: 0,
        }
    }

    /// Reset committed spend if the accounting window has elapsed.
    fn roll_period(&mut self, scope: &str, now: Instant) {
        if let Some(window) = self.period.duration() {
            if now.duration_since(self.period_start) >= window {
                debug!(scope, "budget period elapsed, resetting committed spend");
                self.committed = 0;
                self.period_start = now;
                self.alerted = false;
            }
        }
    }

    fn recommendation(&self, scope: &str, now: Instant) -> BudgetRecommendation {
        let limit = nanos_to_usd(self.limit);
        if self.commits == 0 {
            let (daily, monthly) = match self.period {
                BudgetPeriod::Monthly => (limit / DAYS_PER_MONTH, limit),
                BudgetPeriod::Daily | BudgetPeriod::Session => (limit, limit * DAYS_PER_MONTH),
            };
            return BudgetRecommendation {
                scope: scope.to_string(),
                period: self.period,
                suggested_daily: daily,
                suggested_monthly: monthly,
                reasoning: "No usage history available".to_string(),
            };
        }

        // A period shorter than a day counts as one full day.
        let days = (now.duration_since(self.period_start).as_secs_f64() / 86_400.0).max(1.0);
        let per_day = nanos_to_usd(self.committed) / days;
        let daily = per_day * RECOMMENDATION_HEADROOM;
        BudgetRecommendation {
            scope: scope.to_string(),
            period: self.period,
            suggested_daily: daily,
            suggested_monthly: daily * DAYS_PER_MONTH,
            reasoning: format!("Based on current daily spend of ${per_day:.4}"),
        }
    }

    fn maybe_alert(&mut self, scope: &str) {
        if self.alerted || self.limit == 0 {
            return;
        }
        let usage = self.committed as f64 / self.limit as f64;
        if usage >= self.alert_threshold {
            self.alerted = true;
            warn!(
                scope,
                usage_percent = usage * 100.0,
                threshold_percent = self.alert_threshold * 100.0,
                "budget alert threshold crossed"
            );
        }
    }
}

#[derive(Debug)]
struct Reservation {
    scopes: Vec<Arc<str>>,
    amount: u64,
    /// `None` when the timeout is too large to represent; never expires.
    expires_at: Option<Instant>,
}

impl Reservation {
    fn holds(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| &**s == scope)
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    scopes: HashMap<String, ScopeState>,
    reservations: HashMap<u64, Reservation>,
}

impl LedgerInner {
    /// Release every reservation whose deadline has passed.
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .reservations
            .iter()
            .filter(|(_, r)| r.expires_at.is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(r) = self.reservations.remove(id) {
                self.unhold(&r);
                warn!(
                    scopes = ?r.scopes,
                    reservation = id,
                    amount_usd = nanos_to_usd(r.amount),
                    "reservation expired without commit or release, auto-released"
                );
            }
        }
        expired.len()
    }

    /// Return a reservation's amount to every scope it holds.
    fn unhold(&mut self, r: &Reservation) {
        for name in &r.scopes {
            if let Some(scope) = self.scopes.get_mut(&**name) {
                scope.reserved = scope.reserved.saturating_sub(r.amount);
            }
        }
    }

    fn state(&self, name: &str, scope: &ScopeState) -> BudgetState {
        BudgetState {
            scope: name.to_string(),
            period: scope.period,
            limit: nanos_to_usd(scope.limit),
            committed: nanos_to_usd(scope.committed),
            reserved: nanos_to_usd(scope.reserved),
            outstanding: self
                .reservations
                .values()
                .filter(|r| r.holds(name))
                .count(),
        }
    }
}

// ── BudgetLedger ───────────────────────────────────────────────────────

/// Per-scope spend ledger.
///
/// The only mutator of committed and reserved spend. Every operation takes
/// one short lock and does no I/O, so callers never hold ledger state
/// across a provider dispatch.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug)]
pub struct BudgetLedger {
    inner: Mutex<LedgerInner>,
    next_id: AtomicU64,
    reservation_timeout: Duration,
}

impl BudgetLedger {
    /// Create a ledger for the given scopes.
    ///
    /// # Arguments
    ///
    /// * `limits`: scope name → ceiling.
    /// * `reservation_timeout`: how long an uncommitted reservation lives.
    pub fn new<'a, I>(limits: I, reservation_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a BudgetLimit)>,
    {
        let now = Instant::now();
        let scopes = limits
            .into_iter()
            .map(|(name, limit)| (name.clone(), ScopeState::new(limit, now)))
            .collect();
        Self {
            inner: Mutex::new(LedgerInner {
                scopes,
                reservations: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            reservation_timeout,
        }
    }

    /// Reservation lifetime before automatic release.
    pub fn reservation_timeout(&self) -> Duration {
        self.reservation_timeout
    }

    /// Hold `estimated_cost` USD against `scope`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::BudgetExceeded`] if `committed + reserved +
    ///   estimated_cost` would exceed the limit. Nothing is held.
    /// - [`LedgerError::UnknownScope`] if the scope is not configured.
    /// - [`LedgerError::InvalidAmount`] for negative or non-finite costs.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn reserve(&self, scope: &str, estimated_cost: f64) -> Result<ReservationToken, LedgerError> {
        self.reserve_all(&[scope], estimated_cost)
    }

    /// Hold `estimated_cost` USD against every scope in `scopes` at once.
    ///
    /// All scopes are checked and incremented under one lock: either every
    /// scope accepts the amount or none of them holds anything. Repeated
    /// scope names are charged once.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoScope`] if `scopes` is empty.
    /// - [`LedgerError::UnknownScope`] for the first scope not configured.
    /// - [`LedgerError::BudgetExceeded`] for the first scope that cannot
    ///   cover the amount.
    /// - [`LedgerError::InvalidAmount`] for negative or non-finite costs.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn reserve_all<S: AsRef<str>>(
        &self,
        scopes: &[S],
        estimated_cost: f64,
    ) -> Result<ReservationToken, LedgerError> {
        if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            return Err(LedgerError::InvalidAmount(estimated_cost));
        }
        let mut names: Vec<&str> = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let scope = scope.as_ref();
            if !names.contains(&scope) {
                names.push(scope);
            }
        }
        if names.is_empty() {
            return Err(LedgerError::NoScope);
        }
        let amount = usd_to_nanos(estimated_cost);
        let now = Instant::now();

        let mut inner = self.inner.lock();
        inner.sweep(now);

        for &scope in &names {
            let state = inner
                .scopes
                .get_mut(scope)
                .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
            state.roll_period(scope, now);

            let held = state.committed.saturating_add(state.reserved);
            if held.saturating_add(amount) > state.limit {
                return Err(LedgerError::BudgetExceeded {
                    scope: scope.to_string(),
                    requested: estimated_cost,
                    committed: nanos_to_usd(state.committed),
                    reserved: nanos_to_usd(state.reserved),
                    limit: nanos_to_usd(state.limit),
                });
            }
        }
        for &scope in &names {
            if let Some(state) = inner.scopes.get_mut(scope) {
                state.reserved = state.reserved.saturating_add(amount);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let scopes: Vec<Arc<str>> = names.iter().map(|s| Arc::from(*s)).collect();
        inner.reservations.insert(
            id,
            Reservation {
                scopes: scopes.clone(),
                amount,
                expires_at: now.checked_add(self.reservation_timeout),
            },
        );
        debug!(scopes = ?names, reservation = id, amount_usd = estimated_cost, "budget reserved");

        Ok(ReservationToken { id, scopes })
    }

    /// Replace a reservation with the actual spend.
    ///
    /// The actual cost is added to the committed spend of every scope the
    /// reservation covered, even if it already expired or was released:
    /// the provider has been paid either way. Negative costs count as zero.
    /// An actual cost above the estimate is accepted and logged as an
    /// overrun.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownScope`] if a scope was removed by a
    /// configuration reload after the reservation was taken. The remaining
    /// scopes are still charged.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn commit(&self, token: ReservationToken, actual_cost: f64) -> Result<(), LedgerError> {
        let actual = if actual_cost.is_finite() {
            usd_to_nanos(actual_cost)
        } else {
            0
        };
        let now = Instant::now();

        let mut inner = self.inner.lock();
        match inner.reservations.remove(&token.id) {
            Some(r) => {
                inner.unhold(&r);
                if actual > r.amount {
                    warn!(
                        reservation = %token,
                        estimated_usd = nanos_to_usd(r.amount),
                        actual_usd = nanos_to_usd(actual),
                        "actual cost exceeded reservation"
                    );
                }
            }
            None => {
                warn!(
                    reservation = %token,
                    "committing a reservation that was already released or expired"
                );
            }
        }

        let mut missing = None;
        for scope in token.scopes() {
            let Some(state) = inner.scopes.get_mut(scope) else {
                if missing.is_none() {
                    missing = Some(scope.to_string());
                }
                continue;
            };
            state.roll_period(scope, now);
            state.committed = state.committed.saturating_add(actual);
            state.commits += 1;
            state.maybe_alert(scope);
        }

        debug!(
            reservation = %token,
            actual_usd = nanos_to_usd(actual),
            "budget committed"
        );
        match missing {
            Some(scope) => Err(LedgerError::UnknownScope(scope)),
            None => Ok(()),
        }
    }

    /// Cancel a reservation, returning its amount to every scope it holds.
    ///
    /// Releasing an unknown, committed, expired or already-released token
    /// is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if this call freed budget.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn release(&self, token: &ReservationToken) -> bool {
        let mut inner = self.inner.lock();
        let Some(r) = inner.reservations.remove(&token.id) else {
            return false;
        };
        inner.unhold(&r);
        debug!(reservation = %token, "budget reservation released");
        true
    }

    /// Snapshot of one scope, after expiring stale reservations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownScope`] if the scope is not configured.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn status(&self, scope: &str) -> Result<BudgetState, LedgerError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let state = inner
            .scopes
            .get_mut(scope)
            .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
        state.roll_period(scope, now);

        let inner = &*inner;
        let state = inner
            .scopes
            .get(scope)
            .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
        Ok(inner.state(scope, state))
    }

    /// Snapshot of every scope, sorted by name.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn report(&self) -> Vec<BudgetState> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        for (name, state) in inner.scopes.iter_mut() {
            state.roll_period(name, now);
        }
        let inner = &*inner;
        let sorted: BTreeMap<&String, &ScopeState> = inner.scopes.iter().collect();
        sorted
            .into_iter()
            .map(|(name, state)| inner.state(name, state))
            .collect()
    }

    /// Limit suggestion for `scope` based on its spend so far.
    ///
    /// Without any commit on record the configured limit is returned with
    /// the reasoning "No usage history available".
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownScope`] if the scope is not configured.
    pub fn recommend(&self, scope: &str) -> Result<BudgetRecommendation, LedgerError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = inner
            .scopes
            .get_mut(scope)
            .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
        state.roll_period(scope, now);
        Ok(state.recommendation(scope, now))
    }

    /// Limit suggestions for every scope, sorted by name.
    pub fn recommendations(&self) -> Vec<BudgetRecommendation> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut out: Vec<BudgetRecommendation> = inner
            .scopes
            .iter_mut()
            .map(|(name, state)| {
                state.roll_period(name, now);
                state.recommendation(name, now)
            })
            .collect();
        out.sort_by(|a, b| a.scope.cmp(&b.scope));
        out
    }

    /// Release every expired reservation now.
    ///
    /// # Returns
    ///
    /// Number of reservations released.
    pub fn sweep_expired(&self) -> usize {
        self.inner.lock().sweep(Instant::now())
    }

    /// Zero the committed spend of `scope` and restart its period.
    ///
    /// Outstanding reservations are kept.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownScope`] if the scope is not configured.
    pub fn reset(&self, scope: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let state = inner
            .scopes
            .get_mut(scope)
            .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
        state.committed = 0;
        state.period_start = Instant::now();
        state.alerted = false;
        Ok(())
    }

    /// Change the ceiling of an existing scope.
    ///
    /// Lowering a limit below current spend does not revoke reservations;
    /// it only blocks new ones.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownScope`] if the scope is not configured.
    /// - [`LedgerError::InvalidAmount`] for negative or non-finite limits.
    pub fn set_limit(&self, scope: &str, limit: f64) -> Result<(), LedgerError> {
        if !limit.is_finite() || limit < 0.0 {
            return Err(LedgerError::InvalidAmount(limit));
        }
        let mut inner = self.inner.lock();
        let state = inner
            .scopes
            .get_mut(scope)
            .ok_or_else(|| LedgerError::UnknownScope(scope.to_string()))?;
        state.limit = usd_to_nanos(limit);
        Ok(())
    }

    /// Apply a reloaded limit table.
    ///
    /// Existing scopes keep their spend and reservations and take the new
    /// limit, period and alert threshold; new scopes start empty; scopes
    /// missing from `limits` are dropped unless they still hold
    /// reservations.
    pub fn apply_limits<'a, I>(&self, limits: I)
    where
        I: IntoIterator<Item = (&'a String, &'a BudgetLimit)>,
    {
        let now = Instant::now();
        let limits: HashMap<&String, &BudgetLimit> = limits.into_iter().collect();
        let mut inner = self.inner.lock();

        let busy: Vec<String> = inner
            .reservations
            .values()
            .flat_map(|r| r.scopes.iter().map(|s| s.to_string()))
            .collect();
        inner
            .scopes
            .retain(|name, _| limits.contains_key(name) || busy.contains(name));

        for (name, limit) in limits {
            match inner.scopes.get_mut(name) {
                Some(state) => {
                    state.limit = usd_to_nanos(limit.limit);
                    state.period = limit.period;
                    state.alert_threshold = limit.alert_threshold;
                }
                None => {
                    inner.scopes.insert(name.clone(), ScopeState::new(limit, now));
                }
            }
        }
        debug!(scopes = inner.scopes.len(), "budget limits applied");
    }

    /// Spawn a background task that sweeps expired reservations every
    /// `every` (at least [`MIN_SWEEP_PERIOD`]).
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(self);
        let every = every.max(MIN_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let released = ledger.sweep_expired();
                if released > 0 {
                    debug!(released, "expired reservations swept");
                }
            }
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Convert USD to nano-dollars, clamping negatives to zero.
fn usd_to_nanos(usd: f64) -> u64 {
    if usd <= 0.0 || !usd.is_finite() {
        0
    } else {
        (usd * NANOS_PER_USD).round() as u64
    }
}

/// Convert nano-dollars to USD.
fn nanos_to_usd(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_USD
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(limit: f64) -> BudgetLedger {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(limit));
        BudgetLedger::new(&limits, Duration::from_secs(60))
    }

    fn status(l: &BudgetLedger) -> BudgetState {
        l.status("daily")
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: status: {e}")))
    }

    fn reserve(l: &BudgetLedger, cost: f64) -> ReservationToken {
        l.reserve("daily", cost)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve: {e}")))
    }

    // -- helpers ---------------------------------------------------------

    #[test]
    fn test_usd_to_nanos_round_trip() {
        let back = nanos_to_usd(usd_to_nanos(0.015));
        assert!((back - 0.015).abs() < 1e-12);
    }

    #[test]
    fn test_usd_to_nanos_negative_is_zero() {
        assert_eq!(usd_to_nanos(-1.0), 0);
        assert_eq!(usd_to_nanos(f64::NAN), 0);
    }

    #[test]
    fn test_period_durations() {
        assert_eq!(BudgetPeriod::Daily.duration(), Some(Duration::from_secs(86_400)));
        assert_eq!(BudgetPeriod::Monthly.duration(), Some(Duration::from_secs(2_592_000)));
        assert_eq!(BudgetPeriod::Session.duration(), None);
    }

    // -- reserve ---------------------------------------------------------

    #[test]
    fn test_reserve_within_limit_holds_amount() {
        let l = ledger(1.0);
        let _t = reserve(&l, 0.25);
        let s = status(&l);
        assert!((s.reserved - 0.25).abs() < 1e-9);
        assert!(s.committed.abs() < 1e-9);
        assert_eq!(s.outstanding, 1);
    }

    #[test]
    fn test_reserve_exactly_at_limit_succeeds() {
        let l = ledger(0.05);
        assert!(l.reserve("daily", 0.05).is_ok());
    }

    #[test]
    fn test_reserve_over_limit_is_rejected_not_truncated() {
        let l = ledger(0.03);
        let err = l.reserve("daily", 0.05).err();
        assert!(matches!(err, Some(LedgerError::BudgetExceeded { .. })));
        let s = status(&l);
        assert!(s.reserved.abs() < 1e-12, "nothing may be held after rejection");
    }

    #[test]
    fn test_budget_exceeded_reports_available() {
        let l = ledger(0.03);
        let _t = reserve(&l, 0.01);
        let err = l.reserve("daily", 0.05).err();
        let available = err.and_then(|e| e.available()).unwrap_or(-1.0);
        assert!((available - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_reserve_counts_existing_reservations() {
        let l = ledger(0.10);
        let _a = reserve(&l, 0.06);
        assert!(l.reserve("daily", 0.05).is_err());
        assert!(l.reserve("daily", 0.04).is_ok());
    }

    #[test]
    fn test_reserve_unknown_scope_fails() {
        let l = ledger(1.0);
        assert_eq!(
            l.reserve("monthly", 0.1).err(),
            Some(LedgerError::UnknownScope("monthly".to_string()))
        );
    }

    #[test]
    fn test_reserve_negative_amount_fails() {
        let l = ledger(1.0);
        assert!(matches!(l.reserve("daily", -0.1), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(l.reserve("daily", f64::INFINITY), Err(LedgerError::InvalidAmount(_))));
    }

    // -- commit ----------------------------------------------------------

    #[test]
    fn test_commit_then_status_reflects_actual_exactly() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.05);
        assert!(l.commit(t, 0.0425).is_ok());
        let s = status(&l);
        assert!((s.committed - 0.0425).abs() < 1e-12);
        assert!(s.reserved.abs() < 1e-12);
        assert_eq!(s.outstanding, 0);
    }

    #[test]
    fn test_commit_negative_actual_counts_as_zero() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.05);
        assert!(l.commit(t, -3.0).is_ok());
        assert!(status(&l).committed.abs() < 1e-12);
    }

    #[test]
    fn test_commit_after_release_still_records_spend() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.05);
        assert!(l.release(&t));
        assert!(l.commit(t, 0.02).is_ok());
        let s = status(&l);
        assert!((s.committed - 0.02).abs() < 1e-12);
        assert!(s.reserved.abs() < 1e-12);
    }

    // -- release ---------------------------------------------------------

    #[test]
    fn test_release_returns_reservation_fully() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.3);
        assert!(l.release(&t));
        let s = status(&l);
        assert!(s.reserved.abs() < 1e-12);
        assert!((s.remaining() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_release_twice_is_noop() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.3);
        let _other = reserve(&l, 0.2);
        assert!(l.release(&t));
        assert!(!l.release(&t));
        let s = status(&l);
        assert!((s.reserved - 0.2).abs() < 1e-9, "second release must not free other holds");
    }

    // -- expiry ----------------------------------------------------------

    #[test]
    fn test_expired_reservation_is_auto_released() {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(0.05));
        let l = BudgetLedger::new(&limits, Duration::from_millis(20));
        let t = reserve(&l, 0.05);
        assert!(l.reserve("daily", 0.01).is_err());

        std::thread::sleep(Duration::from_millis(40));
        assert!(l.reserve("daily", 0.01).is_ok(), "expired hold must be freed");
        assert!(!l.release(&t), "expired token release is a no-op");
    }

    #[test]
    fn test_sweep_expired_counts_released() {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(1.0));
        let l = BudgetLedger::new(&limits, Duration::from_millis(10));
        let _a = reserve(&l, 0.1);
        let _b = reserve(&l, 0.1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(l.sweep_expired(), 2);
        assert_eq!(l.sweep_expired(), 0);
    }

    #[test]
    fn test_unrepresentable_timeout_never_expires() {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(1.0));
        let l = BudgetLedger::new(&limits, Duration::from_secs(u64::MAX));
        let t = reserve(&l, 0.1);
        assert_eq!(l.sweep_expired(), 0);
        assert_eq!(status(&l).outstanding, 1);
        assert!(l.release(&t));
    }

    #[tokio::test]
    async fn test_sweeper_with_zero_period_keeps_running() {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(1.0));
        let l = Arc::new(BudgetLedger::new(&limits, Duration::from_millis(5)));
        let _t = reserve(&l, 0.1);

        let sweeper = l.spawn_sweeper(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sweeper.is_finished(), "sweeper task must not die");
        assert_eq!(l.sweep_expired(), 0, "sweeper already released the hold");
        sweeper.abort();
    }

    // -- multiple scopes -------------------------------------------------

    fn two_scopes(daily: f64, monthly: f64) -> BudgetLedger {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(daily));
        limits.insert("monthly".to_string(), BudgetLimit::with_period(monthly, BudgetPeriod::Monthly));
        BudgetLedger::new(&limits, Duration::from_secs(60))
    }

    fn state_of(l: &BudgetLedger, scope: &str) -> BudgetState {
        l.status(scope)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: status {scope}: {e}")))
    }

    #[test]
    fn test_reserve_all_holds_every_scope() {
        let l = two_scopes(1.0, 10.0);
        let t = l
            .reserve_all(&["daily", "monthly"], 0.2)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve_all: {e}")));
        assert_eq!(t.scopes().collect::<Vec<_>>(), vec!["daily", "monthly"]);
        assert_eq!(t.to_string(), format!("daily+monthly#{}", t.id()));
        for scope in ["daily", "monthly"] {
            let s = state_of(&l, scope);
            assert!((s.reserved - 0.2).abs() < 1e-9);
            assert_eq!(s.outstanding, 1);
        }
    }

    #[test]
    fn test_reserve_all_short_scope_holds_nothing_anywhere() {
        let l = two_scopes(1.0, 0.05);
        let err = l.reserve_all(&["daily", "monthly"], 0.1).err();
        assert!(matches!(
            err,
            Some(LedgerError::BudgetExceeded { ref scope, .. }) if scope == "monthly"
        ));
        assert!(state_of(&l, "daily").reserved.abs() < 1e-12);
        assert!(state_of(&l, "monthly").reserved.abs() < 1e-12);
    }

    #[test]
    fn test_reserve_all_unknown_scope_holds_nothing() {
        let l = two_scopes(1.0, 10.0);
        assert_eq!(
            l.reserve_all(&["daily", "weekly"], 0.1).err(),
            Some(LedgerError::UnknownScope("weekly".to_string()))
        );
        assert!(state_of(&l, "daily").reserved.abs() < 1e-12);
    }

    #[test]
    fn test_reserve_all_empty_or_repeated_scopes() {
        let l = two_scopes(1.0, 10.0);
        let none: [&str; 0] = [];
        assert_eq!(l.reserve_all(&none, 0.1).err(), Some(LedgerError::NoScope));

        let _t = l
            .reserve_all(&["daily", "daily"], 0.1)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve_all: {e}")));
        assert!((state_of(&l, "daily").reserved - 0.1).abs() < 1e-9, "charged once");
    }

    #[test]
    fn test_commit_and_release_cover_every_scope() {
        let l = two_scopes(1.0, 10.0);
        let committed = l
            .reserve_all(&["daily", "monthly"], 0.2)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve_all: {e}")));
        let released = l
            .reserve_all(&["daily", "monthly"], 0.3)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve_all: {e}")));

        assert!(l.commit(committed, 0.15).is_ok());
        assert!(l.release(&released));
        for scope in ["daily", "monthly"] {
            let s = state_of(&l, scope);
            assert!((s.committed - 0.15).abs() < 1e-12);
            assert!(s.reserved.abs() < 1e-12);
            assert_eq!(s.outstanding, 0);
        }
    }

    #[test]
    fn test_expired_multi_scope_reservation_frees_every_scope() {
        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(1.0));
        limits.insert("monthly".to_string(), BudgetLimit::with_period(1.0, BudgetPeriod::Monthly));
        let l = BudgetLedger::new(&limits, Duration::from_millis(10));
        let _t = l
            .reserve_all(&["daily", "monthly"], 0.5)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: reserve_all: {e}")));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(l.sweep_expired(), 1);
        assert!(state_of(&l, "daily").reserved.abs() < 1e-12);
        assert!(state_of(&l, "monthly").reserved.abs() < 1e-12);
    }

    // -- recommendations -------------------------------------------------

    #[test]
    fn test_recommend_without_history_returns_current_limits() {
        let l = two_scopes(2.0, 30.0);
        let daily = l
            .recommend("daily")
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: recommend: {e}")));
        assert!((daily.suggested_daily - 2.0).abs() < 1e-9);
        assert!((daily.suggested_monthly - 60.0).abs() < 1e-9);
        assert_eq!(daily.reasoning, "No usage history available");

        let monthly = l
            .recommend("monthly")
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: recommend: {e}")));
        assert!((monthly.suggested_daily - 1.0).abs() < 1e-9);
        assert!((monthly.suggested_monthly - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommend_adds_headroom_to_daily_spend() {
        let l = ledger(10.0);
        let t = reserve(&l, 0.5);
        assert!(l.commit(t, 0.5).is_ok());
        let r = l
            .recommend("daily")
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: recommend: {e}")));
        assert!((r.suggested_daily - 0.6).abs() < 1e-9);
        assert!((r.suggested_monthly - 18.0).abs() < 1e-9);
        assert_eq!(r.reasoning, "Based on current daily spend of $0.5000");
    }

    #[test]
    fn test_recommendations_cover_every_scope_sorted() {
        let l = two_scopes(1.0, 10.0);
        let scopes: Vec<String> = l.recommendations().into_iter().map(|r| r.scope).collect();
        assert_eq!(scopes, vec!["daily", "monthly"]);
        assert!(matches!(l.recommend("weekly"), Err(LedgerError::UnknownScope(_))));
    }

    // -- reporting / admin -----------------------------------------------

    #[test]
    fn test_usage_percent_and_remaining() {
        let l = ledger(2.0);
        let t = reserve(&l, 0.5);
        assert!(l.commit(t, 0.5).is_ok());
        let s = status(&l);
        assert!((s.usage_percent() - 25.0).abs() < 1e-9);
        assert!((s.remaining() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_committed() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.5);
        assert!(l.commit(t, 0.5).is_ok());
        assert!(l.reset("daily").is_ok());
        assert!(status(&l).committed.abs() < 1e-12);
    }

    #[test]
    fn test_set_limit_changes_ceiling() {
        let l = ledger(0.01);
        assert!(l.reserve("daily", 0.05).is_err());
        assert!(l.set_limit("daily", 0.10).is_ok());
        assert!(l.reserve("daily", 0.05).is_ok());
        assert!(l.set_limit("daily", -1.0).is_err());
    }

    #[test]
    fn test_report_lists_scopes_sorted() {
        let mut limits = BTreeMap::new();
        limits.insert("monthly".to_string(), BudgetLimit::with_period(10.0, BudgetPeriod::Monthly));
        limits.insert("daily".to_string(), BudgetLimit::daily(1.0));
        let l = BudgetLedger::new(&limits, Duration::from_secs(60));
        let names: Vec<String> = l.report().into_iter().map(|s| s.scope).collect();
        assert_eq!(names, vec!["daily", "monthly"]);
    }

    #[test]
    fn test_apply_limits_keeps_spend_and_adds_scopes() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.4);
        assert!(l.commit(t, 0.4).is_ok());

        let mut limits = BTreeMap::new();
        limits.insert("daily".to_string(), BudgetLimit::daily(2.0));
        limits.insert("session".to_string(), BudgetLimit::with_period(5.0, BudgetPeriod::Session));
        l.apply_limits(&limits);

        let s = status(&l);
        assert!((s.limit - 2.0).abs() < 1e-9);
        assert!((s.committed - 0.4).abs() < 1e-9);
        assert!(l.status("session").is_ok());
    }

    #[test]
    fn test_apply_limits_drops_idle_removed_scopes() {
        let l = ledger(1.0);
        let limits: BTreeMap<String, BudgetLimit> = BTreeMap::new();
        l.apply_limits(&limits);
        assert!(l.status("daily").is_err());
    }

    #[test]
    fn test_apply_limits_keeps_removed_scope_with_reservations() {
        let l = ledger(1.0);
        let t = reserve(&l, 0.1);
        let limits: BTreeMap<String, BudgetLimit> = BTreeMap::new();
        l.apply_limits(&limits);
        assert!(l.commit(t, 0.1).is_ok());
    }

    #[test]
    fn test_budget_limit_toml_defaults() {
        let limit: BudgetLimit = toml::from_str("limit = 5.0")
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: deserialize: {e}")));
        assert_eq!(limit.period, BudgetPeriod::Daily);
        assert!((limit.alert_threshold - 0.8).abs() < f64::EPSILON);
    }

    // -- thread safety ---------------------------------------------------

    #[test]
    fn test_concurrent_reservations_never_exceed_limit() {
        use std::thread;

        let l = Arc::new(ledger(1.0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let l = Arc::clone(&l);
            handles.push(thread::spawn(move || {
                let mut granted = Vec::new();
                for _ in 0..50 {
                    if let Ok(t) = l.reserve("daily", 0.01) {
                        granted.push(t);
                    }
                }
                granted
            }));
        }

        let mut total = 0usize;
        for h in handles {
            total += h.join().expect("test: reserver thread panicked").len();
        }
        // 1.0 / 0.01 = 100 slots, 800 attempts.
        assert_eq!(total, 100);
        assert!(status(&l).reserved <= 1.0 + 1e-9);
    }
}
