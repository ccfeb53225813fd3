//! Demo binary for agent-router
//!
//! Loads a router config (or a built-in one), registers a simulated adapter
//! per catalog provider, routes a batch of prompts and prints usage stats.
//!
//! ## Usage
//!
//! ```text
//! agent-router [--config router.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_router::config::{loader, watcher::ConfigWatcher, RouterConfig};
use agent_router::{init_tracing, metrics, Objective, Request, RouterBuilder, SimulatedProvider};
use tracing::{error, info};

const DEMO_CONFIG: &str = r#"
default_objective = "balanced"
default_scopes = ["daily", "monthly"]
max_retries_per_call = 2
attempt_timeout_ms = 2000

[budget_limits.daily]
limit = 0.05
alert_threshold = 0.5

[budget_limits.monthly]
limit = 1.0
period = "monthly"

[[catalog_entries]]
provider = "openai"
model = "gpt-4o-mini"
input_cost_per_1k = 0.00015
output_cost_per_1k = 0.0006
quality = 0.78
latency = "fast"
categories = ["simple_qa", "creative"]

[[catalog_entries]]
provider = "anthropic"
model = "claude-sonnet"
input_cost_per_1k = 0.003
output_cost_per_1k = 0.015
quality = 0.93
latency = "medium"
categories = ["code_generation", "analysis", "creative"]

[[catalog_entries]]
provider = "deepseek"
model = "deepseek-chat"
input_cost_per_1k = 0.00014
output_cost_per_1k = 0.00028
quality = 0.72
latency = "slow"
"#;

fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// One simulated adapter per provider, billing each model at its average
/// catalog token rate. The first call to `anthropic` fails to show fallback.
fn simulated_providers(config: &RouterConfig) -> Vec<Arc<SimulatedProvider>> {
    let mut by_provider: BTreeMap<&str, SimulatedProvider> = BTreeMap::new();
    for entry in &config.catalog_entries {
        let provider = by_provider
            .remove(entry.provider.as_str())
            .unwrap_or_else(|| {
                let p = SimulatedProvider::new(&entry.provider)
                    .with_delay(Duration::from_millis(15))
                    .with_quality(entry.quality);
                if entry.provider == "anthropic" {
                    p.failing_first(1)
                } else {
                    p
                }
            })
            .with_model_rate(
                &entry.model,
                (entry.input_cost_per_1k + entry.output_cost_per_1k) / 2.0,
            );
        by_provider.insert(entry.provider.as_str(), provider);
    }
    by_provider.into_values().map(Arc::new).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let path = config_path();
    let config = match &path {
        Some(path) => loader::load_from_file(path)?,
        None => loader::load_from_str(DEMO_CONFIG, "built-in demo config")?,
    };
    let source = path
        .as_ref()
        .map_or_else(|| "built-in".to_string(), |p| p.display().to_string());
    info!(
        catalog_entries = config.catalog_entries.len(),
        %source,
        "starting agent-router demo"
    );

    let mut builder = RouterBuilder::new(config.clone());
    for provider in simulated_providers(&config) {
        builder = builder.provider(provider);
    }
    let router = Arc::new(builder.build()?);
    let sweeper = router.ledger().spawn_sweeper(Duration::from_secs(30));

    // Hot reload only makes sense for a file on disk.
    let _watcher = match path {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path)?;
            router.spawn_config_listener(rx);
            Some(watcher)
        }
        None => None,
    };

    let demo = [
        ("What is the capital of France?", None),
        ("Write a function that reverses a linked list in Rust", Some(Objective::Quality)),
        ("Analyze the trade-offs between REST and gRPC for internal services", None),
        ("Write a haiku about autumn rain", Some(Objective::Cost)),
        ("How does photosynthesis work?", Some(Objective::Speed)),
        ("Explain the theory of relativity in one paragraph", None),
    ];

    for (i, (prompt, objective)) in demo.iter().enumerate() {
        let mut request = Request::new(*prompt)
            .with_request_id(format!("demo-req-{i:03}"))
            .with_session("demo-session");
        if let Some(objective) = objective {
            request = request.with_objective(*objective);
        }

        match router.route(&request).await {
            Ok(resp) => info!(
                request_id = %request.request_id,
                provider = %resp.decision.chosen.provider,
                model = %resp.decision.chosen.model,
                cost = resp.outcome.actual_cost,
                retries = resp.retries,
                "routed"
            ),
            Err(e) => {
                error!(request_id = %request.request_id, error = %e, "request failed");
                for attempt in e.attempts() {
                    error!(%attempt, "rejected candidate");
                }
            }
        }
    }

    for state in router.ledger().report() {
        info!(
            scope = %state.scope,
            committed = state.committed,
            remaining = state.remaining(),
            usage_percent = state.usage_percent(),
            "budget"
        );
    }

    for rec in router.ledger().recommendations() {
        info!(
            scope = %rec.scope,
            suggested_daily = rec.suggested_daily,
            suggested_monthly = rec.suggested_monthly,
            reasoning = %rec.reasoning,
            "budget recommendation"
        );
    }

    let stats = router.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let summary = metrics::get_metrics_summary();
    info!(routes = ?summary.routes_total, attempts = ?summary.attempts_total, "metrics summary");

    sweeper.abort();
    Ok(())
}
