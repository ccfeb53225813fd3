//! Prometheus metrics for the router.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_route`, `record_attempt`, …) are no-ops if `init_metrics` was
//! never called, so routing is always safe to run and observability simply
//! degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `router_routes_total` | Counter | `outcome` |
//! | `router_attempts_total` | Counter | `provider`, `result` |
//! | `router_dispatch_duration_seconds` | Histogram | `provider` |
//! | `router_budget_committed_usd` | Gauge | `scope` |
//! | `router_budget_reserved_usd` | Gauge | `scope` |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    core::Collector, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::routing::BudgetState;
use crate::RouterError;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the router, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Routing calls by terminal outcome.
    pub routes_total: CounterVec,
    /// Candidate attempts by provider and result.
    pub attempts_total: CounterVec,
    /// Provider dispatch latency.
    pub dispatch_duration: HistogramVec,
    /// Committed spend per budget scope.
    pub budget_committed: GaugeVec,
    /// Reserved spend per budget scope.
    pub budget_reserved: GaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C>(registry: &Registry, collector: C) -> Result<C, RouterError>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(prefix: &str) -> Result<Metrics, RouterError> {
    let registry = Registry::new();
    let init_err = |e: prometheus::Error| RouterError::Other(format!("metrics init failed: {e}"));

    let routes_total = register(
        &registry,
        CounterVec::new(
            Opts::new(format!("{prefix}_routes_total"), "Routing calls by outcome"),
            &["outcome"],
        )
        .map_err(init_err)?,
    )?;

    let attempts_total = register(
        &registry,
        CounterVec::new(
            Opts::new(
                format!("{prefix}_attempts_total"),
                "Candidate attempts by provider and result",
            ),
            &["provider", "result"],
        )
        .map_err(init_err)?,
    )?;

    let dispatch_duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_dispatch_duration_seconds"),
                "Provider dispatch duration",
            ),
            &["provider"],
        )
        .map_err(init_err)?,
    )?;

    let budget_committed = register(
        &registry,
        GaugeVec::new(
            Opts::new(
                format!("{prefix}_budget_committed_usd"),
                "Committed spend in the current period",
            ),
            &["scope"],
        )
        .map_err(init_err)?,
    )?;

    let budget_reserved = register(
        &registry,
        GaugeVec::new(
            Opts::new(
                format!("{prefix}_budget_reserved_usd"),
                "Outstanding reserved spend",
            ),
            &["scope"],
        )
        .map_err(init_err)?,
    )?;

    Ok(Metrics {
        registry,
        routes_total,
        attempts_total,
        dispatch_duration,
        budget_committed,
        budget_reserved,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(build("router")?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count a finished routing call. `outcome` is `"succeeded"` or a
/// failure kind label.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_route(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.routes_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Count one candidate attempt.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_attempt(provider: &str, result: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .attempts_total
            .get_metric_with_label_values(&[provider, result])
        {
            c.inc();
        }
    }
}

/// Record how long a provider dispatch took.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_dispatch_latency(provider: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.dispatch_duration.get_metric_with_label_values(&[provider]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Publish a ledger snapshot to the budget gauges.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn set_budget_gauges(state: &BudgetState) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.budget_committed.get_metric_with_label_values(&[state.scope.as_str()]) {
            g.set(state.committed);
        }
        if let Ok(g) = m.budget_reserved.get_metric_with_label_values(&[state.scope.as_str()]) {
            g.set(state.reserved);
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = metrics().map_or_else(Vec::new, |m| m.registry.gather());
    if families.is_empty() {
        return String::new();
    }
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of the routing counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Routing calls keyed by outcome label.
    pub routes_total: HashMap<String, u64>,
    /// Attempts keyed by `"provider:result"`.
    pub attempts_total: HashMap<String, u64>,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

fn summarize(m: &Metrics) -> MetricsSummary {
    let mut summary = MetricsSummary::default();

    for family in m.routes_total.collect() {
        for metric in family.get_metric() {
            summary.routes_total.insert(
                label(metric, "outcome").to_string(),
                metric.get_counter().get_value() as u64,
            );
        }
    }

    for family in m.attempts_total.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "provider"), label(metric, "result"));
            summary
                .attempts_total
                .insert(key, metric.get_counter().get_value() as u64);
        }
    }

    summary
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}
