//! Capability catalog.
//!
//! Holds the provider/model table the scorer ranks from. The table is
//! published as an immutable snapshot behind an [`Arc`]; [`Catalog::reload`]
//! swaps the snapshot atomically, so a routing call that already listed its
//! candidates keeps working against the entries it started with.

use std::sync::Arc;

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Latency class ──────────────────────────────────────────────────────

/// Coarse latency bucket for a model.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    /// Interactive-speed model.
    Fast,
    /// Typical hosted model.
    Medium,
    /// Large or heavily loaded model.
    Slow,
}

impl LatencyClass {
    /// Ordinal used for latency normalisation (`Fast` = 1 … `Slow` = 3).
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Fast => 1,
            Self::Medium => 2,
            Self::Slow => 3,
        }
    }
}

impl std::fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        };
        f.write_str(s)
    }
}

// ── CatalogEntry ───────────────────────────────────────────────────────

/// One provider + model pairing with its pricing, quality and latency.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CatalogEntry {
    /// Provider identifier; must match a registered adapter name.
    pub provider: String,
    /// Model identifier passed to the adapter.
    pub model: String,
    /// USD per 1 000 input tokens.
    #[serde(default)]
    pub input_cost_per_1k: f64,
    /// USD per 1 000 output tokens.
    #[serde(default)]
    pub output_cost_per_1k: f64,
    /// Flat USD charge per call, on top of token costs.
    #[serde(default)]
    pub per_request_cost: f64,
    /// Quality score in `[0.0, 1.0]`.
    pub quality: f64,
    /// Latency bucket.
    pub latency: LatencyClass,
    /// Task categories this model is suited for. Empty means "any".
    #[serde(default)]
    pub categories: Vec<String>,
}

impl CatalogEntry {
    /// Create an entry with zero cost and no category restriction.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        quality: f64,
        latency: LatencyClass,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            per_request_cost: 0.0,
            quality,
            latency,
            categories: Vec::new(),
        }
    }

    /// Set per-1K-token input and output rates.
    pub fn with_token_rates(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Set the flat per-call charge.
    pub fn with_per_request_cost(mut self, cost: f64) -> Self {
        self.per_request_cost = cost;
        self
    }

    /// Restrict the entry to the given task categories.
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// `"provider/model"` label used in logs, metrics and telemetry.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    /// Estimated USD cost of a call with the given token counts.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.per_request_cost
            + (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }

    /// Whether this entry declares itself suitable for `category`.
    ///
    /// Entries without categories are generalists and match everything.
    pub fn supports(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c == category)
    }
}

// ── Catalog ────────────────────────────────────────────────────────────

/// Reloadable table of [`CatalogEntry`] values.
///
/// Thread-safe: readers clone an `Arc` snapshot under a short read lock;
/// reload replaces the `Arc` under a short write lock.
#[derive(Debug)]
pub struct Catalog {
    snapshot: RwLock<Arc<Vec<CatalogEntry>>>,
}

impl Catalog {
    /// Create a catalog from an initial entry list.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(entries)),
        }
    }

    /// Return the current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Vec<CatalogEntry>> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the whole table.
    ///
    /// Snapshots handed out before the call are unaffected.
    pub fn reload(&self, entries: Vec<CatalogEntry>) {
        let count = entries.len();
        *self.snapshot.write() = Arc::new(entries);
        tracing::info!(entries = count, "catalog reloaded");
    }

    /// Number of entries in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Whether the current snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// List the candidates for `category` from the current snapshot,
    /// leaving out every provider named in `excluded`.
    ///
    /// Exclusion is applied first. Category filtering is then advisory over
    /// what remains: if no remaining entry declares categories, or if
    /// filtering would leave nothing, every remaining entry is returned.
    /// Catalog order is preserved.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn list_candidates(&self, category: &str, excluded: &[String]) -> Vec<CatalogEntry> {
        let snapshot = self.snapshot();
        if excluded.is_empty() {
            return filter_by_category(&snapshot, category);
        }
        let allowed: Vec<CatalogEntry> = snapshot
            .iter()
            .filter(|e| !excluded.contains(&e.provider))
            .cloned()
            .collect();
        filter_by_category(&allowed, category)
    }
}

/// Apply the advisory category filter to `entries`.
pub fn filter_by_category(entries: &[CatalogEntry], category: &str) -> Vec<CatalogEntry> {
    let has_rules = entries.iter().any(|e| !e.categories.is_empty());
    if !has_rules {
        return entries.to_vec();
    }

    let filtered: Vec<CatalogEntry> = entries
        .iter()
        .filter(|e| e.supports(category))
        .cloned()
        .collect();

    if filtered.is_empty() {
        tracing::debug!(category, "no catalog entry matches category, using full catalog");
        entries.to_vec()
    } else {
        filtered
    }
}

// ── Prompt categorisation ──────────────────────────────────────────────

/// Derive a task category from prompt text when the caller declared none.
///
/// | Signal | Category |
/// |--------|----------|
/// | mentions "code" or "function" | `code_generation` |
/// | mentions "analyze" or "analysis" | `analysis` |
/// | under 20 words and contains `?` | `simple_qa` |
/// | anything else | `creative` |
pub fn categorize(prompt: &str) -> &'static str {
    let lower = prompt.to_lowercase();
    if lower.contains("code") || lower.contains("function") {
        "code_generation"
    } else if lower.contains("analyze") || lower.contains("analysis") {
        "analysis"
    } else if prompt.split_whitespace().count() < 20 && prompt.contains('?') {
        "simple_qa"
    } else {
        "creative"
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
