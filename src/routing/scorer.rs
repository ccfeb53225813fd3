//! Candidate ranking.
//!
//! Scores each candidate as a weighted sum of three normalised axes and
//! sorts most-preferred first.
//!
//! | Objective  | cost | quality | latency |
//! |------------|------|---------|---------|
//! | `cost`     | 0.70 | 0.20    | 0.10    |
//! | `quality`  | 0.10 | 0.80    | 0.10    |
//! | `speed`    | 0.10 | 0.10    | 0.80    |
//! | `balanced` | 0.34 | 0.33    | 0.33    |
//!
//! ## Axes
//!
//! 1. **Cost**: `1 - predicted_cost / max_predicted_cost` (cheaper scores higher;
//!    all-free sets score 1.0)
//! 2. **Quality**: the catalog quality score, used directly
//! 3. **Latency**: `1 - ordinal / slowest_ordinal_present`
//!
//! Sorting is stable, so equal scores keep catalog order and identical
//! inputs always produce identical rankings.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::catalog::{CatalogEntry, LatencyClass};
use super::types::Request;

/// Characters per token used by the prompt-length estimate.
const CHARS_PER_TOKEN: usize = 4;

// ── Objective ──────────────────────────────────────────────────────────

/// Caller-declared optimisation axis.
///
/// # Panics
///
/// This type never panics.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Minimise spend.
    Cost,
    /// Maximise answer quality.
    Quality,
    /// Minimise latency.
    Speed,
    /// Roughly equal weight on every axis.
    #[default]
    Balanced,
}

impl Objective {
    /// Axis weights for this objective.
    pub fn weights(self) -> Weights {
        match self {
            Self::Cost => Weights::new(0.7, 0.2, 0.1),
            Self::Quality => Weights::new(0.1, 0.8, 0.1),
            Self::Speed => Weights::new(0.1, 0.1, 0.8),
            Self::Balanced => Weights::new(0.34, 0.33, 0.33),
        }
    }

    /// Lowercase label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cost => "cost",
            Self::Quality => "quality",
            Self::Speed => "speed",
            Self::Balanced => "balanced",
        }
    }
}

impl std::fmt::Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cost" => Ok(Self::Cost),
            "quality" => Ok(Self::Quality),
            "speed" => Ok(Self::Speed),
            "balanced" => Ok(Self::Balanced),
            other => Err(format!("unknown objective '{other}'")),
        }
    }
}

/// Per-axis weights; always sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    /// Weight of the inverse-cost axis.
    pub cost: f64,
    /// Weight of the quality axis.
    pub quality: f64,
    /// Weight of the inverse-latency axis.
    pub latency: f64,
}

impl Weights {
    const fn new(cost: f64, quality: f64, latency: f64) -> Self {
        Self {
            cost,
            quality,
            latency,
        }
    }
}

// ── Ranking output ─────────────────────────────────────────────────────

/// One ranked candidate with its predictions.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// The catalog entry.
    pub entry: CatalogEntry,
    /// Predicted USD cost of the call.
    pub predicted_cost: f64,
    /// Predicted quality (the catalog score).
    pub predicted_quality: f64,
    /// Predicted latency bucket.
    pub predicted_latency: LatencyClass,
    /// Weighted score; higher is better.
    pub score: f64,
}

/// Why [`Scorer::rank`] produced no ranking.
///
/// The two variants are deliberately distinct: the router reports the
/// first as a catalog failure and the second as a budget failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    /// There was nothing to rank.
    #[error("no candidates available")]
    NoCandidates,

    /// Every candidate's predicted cost exceeds the request's ceiling.
    #[error("every candidate exceeds the per-request ceiling of ${ceiling:.6}")]
    ExceedsCeiling {
        /// The request's `max_cost`.
        ceiling: f64,
        /// `(provider, model, predicted_cost)` for each rejected candidate.
        rejected: Vec<(String, String, f64)>,
    },
}

/// Predicted token counts for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    /// Prompt + context tokens.
    pub input_tokens: u64,
    /// Response tokens.
    pub output_tokens: u64,
}

// ── Scorer ─────────────────────────────────────────────────────────────

/// Heuristic multi-objective ranker.
///
/// Stateless apart from the output-length ratio; cheap to clone.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct Scorer {
    /// Predicted output tokens per input token when the request gives no
    /// explicit `max_output_tokens`.
    output_ratio: f64,
}

impl Scorer {
    /// Create a scorer assuming responses half as long as prompts.
    pub fn new() -> Self {
        Self { output_ratio: 0.5 }
    }

    /// Create a scorer with a custom output/input token ratio.
    pub fn with_output_ratio(output_ratio: f64) -> Self {
        Self {
            output_ratio: output_ratio.max(0.0),
        }
    }

    /// Estimate token counts for `request`.
    ///
    /// Input tokens are `ceil(chars / 4)` over prompt plus serialised context.
    pub fn estimate_tokens(&self, request: &Request) -> TokenEstimate {
        let chars = request.payload_chars();
        let input_tokens = chars.div_ceil(CHARS_PER_TOKEN) as u64;
        let output_tokens = request
            .max_output_tokens
            .unwrap_or_else(|| (input_tokens as f64 * self.output_ratio).round() as u64);
        TokenEstimate {
            input_tokens,
            output_tokens,
        }
    }

    /// Rank `candidates` for `request` under `objective`.
    ///
    /// # Returns
    ///
    /// Candidates most-preferred first. Entries whose provider appears in
    /// `request.preferred_providers` are placed ahead of the rest; within
    /// each group ordering is by descending score, ties in catalog order.
    ///
    /// # Errors
    ///
    /// - [`RankError::NoCandidates`] if `candidates` is empty.
    /// - [`RankError::ExceedsCeiling`] if `request.max_cost` is set and every
    ///   candidate's predicted cost is above it.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn rank(
        &self,
        candidates: &[CatalogEntry],
        request: &Request,
        objective: Objective,
    ) -> Result<Vec<ScoredCandidate>, RankError> {
        if candidates.is_empty() {
            return Err(RankError::NoCandidates);
        }

        let estimate = self.estimate_tokens(request);
        let mut priced: Vec<(&CatalogEntry, f64)> = candidates
            .iter()
            .map(|e| (e, e.estimate_cost(estimate.input_tokens, estimate.output_tokens)))
            .collect();

        if let Some(ceiling) = request.max_cost {
            let rejected: Vec<(String, String, f64)> = priced
                .iter()
                .filter(|(_, cost)| *cost > ceiling)
                .map(|(e, cost)| (e.provider.clone(), e.model.clone(), *cost))
                .collect();
            priced.retain(|(_, cost)| *cost <= ceiling);
            if priced.is_empty() {
                return Err(RankError::ExceedsCeiling { ceiling, rejected });
            }
        }

        let max_cost = priced.iter().map(|(_, c)| *c).fold(0.0_f64, f64::max);
        let slowest = priced
            .iter()
            .map(|(e, _)| e.latency.ordinal())
            .max()
            .unwrap_or(1);
        let weights = objective.weights();

        let mut ranked: Vec<ScoredCandidate> = priced
            .into_iter()
            .map(|(entry, cost)| {
                let score = weights.cost * cost_axis(cost, max_cost)
                    + weights.quality * entry.quality.clamp(0.0, 1.0)
                    + weights.latency * latency_axis(entry.latency, slowest);
                ScoredCandidate {
                    entry: entry.clone(),
                    predicted_cost: cost,
                    predicted_quality: entry.quality,
                    predicted_latency: entry.latency,
                    score,
                }
            })
            .collect();

        // Stable: equal keys keep catalog order.
        ranked.sort_by(|a, b| {
            let pa = is_preferred(request, &a.entry);
            let pb = is_preferred(request, &b.entry);
            pb.cmp(&pa).then_with(|| b.score.total_cmp(&a.score))
        });

        Ok(ranked)
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Inverse-normalised cost axis in `[0.0, 1.0]`.
fn cost_axis(cost: f64, max_cost: f64) -> f64 {
    if max_cost <= 0.0 {
        1.0
    } else {
        (1.0 - cost / max_cost).clamp(0.0, 1.0)
    }
}

/// Inverse-normalised latency axis in `[0.0, 1.0)`.
fn latency_axis(latency: LatencyClass, slowest: u8) -> f64 {
    1.0 - f64::from(latency.ordinal()) / f64::from(slowest.max(1))
}

fn is_preferred(request: &Request, entry: &CatalogEntry) -> bool {
    request.preferred_providers.iter().any(|p| *p == entry.provider)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(model: &str, cost: f64, quality: f64, latency: LatencyClass) -> CatalogEntry {
        CatalogEntry::new("p", model, quality, latency).with_per_request_cost(cost)
    }

    fn cheap_and_premium() -> Vec<CatalogEntry> {
        vec![
            flat("cheap", 0.01, 0.6, LatencyClass::Medium),
            flat("premium", 0.05, 0.95, LatencyClass::Medium),
        ]
    }

    fn models(ranked: &[ScoredCandidate]) -> Vec<&str> {
        ranked.iter().map(|c| c.entry.model.as_str()).collect()
    }

    fn rank(entries: &[CatalogEntry], req: &Request, objective: Objective) -> Vec<ScoredCandidate> {
        Scorer::new()
            .rank(entries, req, objective)
            .unwrap_or_else(|e| std::panic::panic_any(format!("test: rank: {e}")))
    }

    // -- weights ---------------------------------------------------------

    #[test]
    fn test_weights_sum_to_one_for_every_objective() {
        for o in [Objective::Cost, Objective::Quality, Objective::Speed, Objective::Balanced] {
            let w = o.weights();
            assert!((w.cost + w.quality + w.latency - 1.0).abs() < 1e-9, "{o}");
        }
    }

    #[test]
    fn test_objective_parse_and_display_agree() {
        for o in [Objective::Cost, Objective::Quality, Objective::Speed, Objective::Balanced] {
            assert_eq!(o.to_string().parse::<Objective>(), Ok(o));
        }
        assert!("fastest".parse::<Objective>().is_err());
    }

    #[test]
    fn test_objective_default_is_balanced() {
        assert_eq!(Objective::default(), Objective::Balanced);
    }

    // -- axes ------------------------------------------------------------

    #[test]
    fn test_cost_axis_all_free_scores_one() {
        assert!((cost_axis(0.0, 0.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cost_axis_most_expensive_scores_zero() {
        assert!(cost_axis(0.05, 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_axis_slowest_scores_zero() {
        assert!(latency_axis(LatencyClass::Slow, 3).abs() < f64::EPSILON);
        assert!(latency_axis(LatencyClass::Fast, 3) > latency_axis(LatencyClass::Medium, 3));
    }

    // -- scenarios -------------------------------------------------------

    #[test]
    fn test_cost_objective_prefers_cheap() {
        let ranked = rank(&cheap_and_premium(), &Request::new("hi"), Objective::Cost);
        assert_eq!(models(&ranked), vec!["cheap", "premium"]);
    }

    #[test]
    fn test_quality_objective_prefers_premium() {
        let ranked = rank(&cheap_and_premium(), &Request::new("hi"), Objective::Quality);
        assert_eq!(models(&ranked), vec!["premium", "cheap"]);
    }

    #[test]
    fn test_speed_objective_prefers_fast() {
        let entries = vec![
            flat("slow", 0.01, 0.9, LatencyClass::Slow),
            flat("fast", 0.02, 0.7, LatencyClass::Fast),
        ];
        let ranked = rank(&entries, &Request::new("hi"), Objective::Speed);
        assert_eq!(models(&ranked)[0], "fast");
    }

    #[test]
    fn test_predictions_carried_into_ranking() {
        let ranked = rank(&cheap_and_premium(), &Request::new("hi"), Objective::Cost);
        assert!((ranked[0].predicted_cost - 0.01).abs() < 1e-12);
        assert!((ranked[0].predicted_quality - 0.6).abs() < f64::EPSILON);
        assert_eq!(ranked[0].predicted_latency, LatencyClass::Medium);
    }

    // -- ordering properties ---------------------------------------------

    #[test]
    fn test_ties_keep_catalog_order() {
        let entries = vec![
            flat("first", 0.01, 0.5, LatencyClass::Fast),
            flat("second", 0.01, 0.5, LatencyClass::Fast),
            flat("third", 0.01, 0.5, LatencyClass::Fast),
        ];
        for o in [Objective::Cost, Objective::Quality, Objective::Speed, Objective::Balanced] {
            let ranked = rank(&entries, &Request::new("hi"), o);
            assert_eq!(models(&ranked), vec!["first", "second", "third"]);
        }
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let entries = cheap_and_premium();
        let req = Request::new("same prompt");
        let a = rank(&entries, &req, Objective::Balanced);
        let b = rank(&entries, &req, Objective::Balanced);
        assert_eq!(a, b);
    }

    #[test]
    fn test_swapping_costs_never_demotes_the_cheaper_entry_under_cost() {
        // a is cheaper; after swap b is cheaper. The cheaper one must rank
        // no worse than the other in both configurations.
        let a = flat("a", 0.01, 0.7, LatencyClass::Medium);
        let b = flat("b", 0.04, 0.7, LatencyClass::Medium);
        let ranked = rank(&[a.clone(), b.clone()], &Request::new("x"), Objective::Cost);
        assert_eq!(models(&ranked)[0], "a");

        let a_swapped = a.with_per_request_cost(0.04);
        let b_swapped = b.with_per_request_cost(0.01);
        let ranked = rank(&[a_swapped, b_swapped], &Request::new("x"), Objective::Cost);
        assert_eq!(models(&ranked)[0], "b");
    }

    #[test]
    fn test_scores_are_sorted_descending() {
        let entries = vec![
            flat("a", 0.03, 0.4, LatencyClass::Slow),
            flat("b", 0.01, 0.9, LatencyClass::Fast),
            flat("c", 0.02, 0.6, LatencyClass::Medium),
        ];
        let ranked = rank(&entries, &Request::new("x"), Objective::Balanced);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_preferred_provider_ranked_first() {
        let entries = vec![
            CatalogEntry::new("openai", "best", 0.99, LatencyClass::Fast),
            CatalogEntry::new("deepseek", "ok", 0.5, LatencyClass::Slow),
        ];
        let req = Request::new("x").with_preferred_providers(["deepseek"]);
        let ranked = rank(&entries, &req, Objective::Quality);
        assert_eq!(models(&ranked), vec!["ok", "best"]);
    }

    // -- errors ----------------------------------------------------------

    #[test]
    fn test_empty_candidates_returns_no_candidates() {
        let result = Scorer::new().rank(&[], &Request::new("x"), Objective::Cost);
        assert_eq!(result, Err(RankError::NoCandidates));
    }

    #[test]
    fn test_ceiling_below_every_cost_returns_exceeds_ceiling() {
        let req = Request::new("x").with_max_cost(0.005);
        let result = Scorer::new().rank(&cheap_and_premium(), &req, Objective::Cost);
        match result {
            Err(RankError::ExceedsCeiling { ceiling, rejected }) => {
                assert!((ceiling - 0.005).abs() < f64::EPSILON);
                assert_eq!(rejected.len(), 2);
            }
            other => std::panic::panic_any(format!("expected ExceedsCeiling, got {other:?}")),
        }
    }

    #[test]
    fn test_ceiling_drops_only_unaffordable_candidates() {
        let req = Request::new("x").with_max_cost(0.02);
        let ranked = rank(&cheap_and_premium(), &req, Objective::Quality);
        assert_eq!(models(&ranked), vec!["cheap"]);
    }

    // -- token estimate --------------------------------------------------

    #[test]
    fn test_estimate_tokens_rounds_up_chars() {
        let est = Scorer::new().estimate_tokens(&Request::new("abcde"));
        assert_eq!(est.input_tokens, 2);
        assert_eq!(est.output_tokens, 1);
    }

    #[test]
    fn test_estimate_tokens_uses_explicit_output_length() {
        let est = Scorer::new().estimate_tokens(&Request::new("abcd").with_max_output_tokens(500));
        assert_eq!(est.output_tokens, 500);
    }

    #[test]
    fn test_token_rates_drive_ranking() {
        let entries = vec![
            CatalogEntry::new("openai", "gpt-4", 0.9, LatencyClass::Medium).with_token_rates(0.03, 0.06),
            CatalogEntry::new("openai", "gpt-3.5-turbo", 0.7, LatencyClass::Medium)
                .with_token_rates(0.0005, 0.0015),
        ];
        let req = Request::new("x".repeat(4000));
        let ranked = rank(&entries, &req, Objective::Cost);
        assert_eq!(models(&ranked)[0], "gpt-3.5-turbo");
        assert!(ranked[1].predicted_cost > ranked[0].predicted_cost);
    }
}
