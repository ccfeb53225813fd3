//! Request and decision records shared by the routing stages.

use serde::{Deserialize, Serialize};

use super::catalog::CatalogEntry;
use super::scorer::Objective;

/// A caller's routing request.
///
/// Built once with [`Request::new`] and the `with_*` helpers, then passed
/// by reference through the whole routing call; nothing downstream
/// mutates it.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique identifier used for trace and telemetry correlation.
    pub request_id: String,
    /// Optional session the request belongs to.
    pub session_id: Option<String>,
    /// Prompt text.
    pub prompt: String,
    /// Optional structured context sent alongside the prompt.
    pub context: Option<serde_json::Value>,
    /// Declared task category (e.g. `"code_generation"`). Derived from the
    /// prompt when `None`.
    pub category: Option<String>,
    /// Optimisation objective. The router's default applies when `None`.
    pub objective: Option<Objective>,
    /// Budget scopes to charge together. The router's default scopes apply
    /// when empty.
    pub budget_scopes: Vec<String>,
    /// Hard USD ceiling for this single call.
    pub max_cost: Option<f64>,
    /// Minimum acceptable quality signal in `[0.0, 1.0]`.
    pub min_quality: Option<f64>,
    /// Expected response length; drives the output-token cost estimate.
    pub max_output_tokens: Option<u64>,
    /// Providers ranked ahead of the rest.
    pub preferred_providers: Vec<String>,
    /// Providers never considered for this call.
    pub excluded_providers: Vec<String>,
}

impl Request {
    /// Create a request with a fresh UUID and no options set.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: None,
            prompt: prompt.into(),
            context: None,
            category: None,
            objective: None,
            budget_scopes: Vec::new(),
            max_cost: None,
            min_quality: None,
            max_output_tokens: None,
            preferred_providers: Vec::new(),
            excluded_providers: Vec::new(),
        }
    }

    /// Override the generated request id.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach structured context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Declare the task category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the optimisation objective.
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = Some(objective);
        self
    }

    /// Add a budget scope to charge.
    pub fn with_budget_scope(mut self, scope: impl Into<String>) -> Self {
        self.budget_scopes.push(scope.into());
        self
    }

    /// Charge every scope in `scopes`, replacing any set earlier.
    pub fn with_budget_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.budget_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Set a hard per-call cost ceiling in USD.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Require a minimum quality signal.
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Set the expected output length in tokens.
    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Prefer these providers when ranking.
    pub fn with_preferred_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Never route to these providers.
    pub fn with_excluded_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Character length of prompt plus serialised context.
    pub fn payload_chars(&self) -> usize {
        let context_len = self
            .context
            .as_ref()
            .map(|c| c.to_string().chars().count())
            .unwrap_or(0);
        self.prompt.chars().count() + context_len
    }
}

/// A ranked candidate that was considered but not chosen.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alternate {
    /// Provider identifier.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Weighted score under the call's objective.
    pub score: f64,
    /// Predicted USD cost.
    pub predicted_cost: f64,
}

/// The routing choice made for one dispatch attempt.
///
/// Created by the router and never mutated afterwards.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    /// Request this decision belongs to.
    pub request_id: String,
    /// The selected catalog entry.
    pub chosen: CatalogEntry,
    /// Predicted USD cost that was reserved.
    pub estimated_cost: f64,
    /// Objective the ranking used.
    pub objective: Objective,
    /// Task category used for candidate listing.
    pub category: String,
    /// Budget scopes charged; empty when the call was not metered.
    #[serde(default)]
    pub budget_scopes: Vec<String>,
    /// Remaining ranked candidates at decision time, most preferred first.
    pub alternates: Vec<Alternate>,
}

impl RoutingDecision {
    /// Highest predicted cost among the chosen entry and its alternates.
    ///
    /// Used as the "no routing" baseline when computing savings.
    pub fn baseline_cost(&self) -> f64 {
        self.alternates
            .iter()
            .map(|a| a.predicted_cost)
            .fold(self.estimated_cost, f64::max)
    }
}

/// What actually happened when a decision was dispatched.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    /// Actual USD cost reported by the adapter (0 on failure before billing).
    pub actual_cost: f64,
    /// Wall-clock dispatch latency in milliseconds.
    pub latency_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Quality signal reported by the adapter, if any.
    pub quality: Option<f64>,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

impl Outcome {
    /// Build a failure outcome with the given message.
    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            actual_cost: 0.0,
            latency_ms,
            success: false,
            quality: None,
            tokens_used: 0,
            error: Some(error.into()),
        }
    }
}
