//! Provider adapter abstraction.
//!
//! The router never talks HTTP itself. Each provider family is reached
//! through a [`ProviderAdapter`] that reports the actual cost, latency and
//! (optionally) a quality signal of a completed call, or a classified
//! [`ProviderError`] the router uses to decide between fallback and
//! immediate failure.
//!
//! [`SimulatedProvider`] is a deterministic in-process adapter for demos
//! and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::routing::Request;

/// Result of a completed provider call.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResult {
    /// Model output.
    pub output: String,
    /// Actual USD cost billed for the call.
    pub actual_cost: f64,
    /// Wall-clock time spent in the provider.
    pub latency: Duration,
    /// Optional quality signal in `[0.0, 1.0]`.
    pub quality: Option<f64>,
    /// Total tokens consumed.
    pub tokens_used: u64,
}

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Worth retrying on another candidate (rate limit, overload, network).
    #[error("transient error from {provider}: {message}")]
    Transient {
        /// Provider family that failed.
        provider: String,
        /// Provider-supplied detail.
        message: String,
    },

    /// Retrying will not help (bad credentials, malformed request).
    #[error("permanent error from {provider}: {message}")]
    Permanent {
        /// Provider family that failed.
        provider: String,
        /// Provider-supplied detail.
        message: String,
    },
}

impl ProviderError {
    /// Build a transient error.
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a permanent error.
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify an HTTP status returned by a provider API.
    ///
    /// Authentication, authorisation, malformed-request and not-found
    /// statuses are permanent. Timeouts, conflicts, rate limits and every
    /// 5xx are transient. Anything else is treated as permanent.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let message = format!("HTTP {status}: {}", body.into());
        match status {
            408 | 409 | 425 | 429 | 500..=599 => Self::transient(provider, message),
            _ => Self::permanent(provider, message),
        }
    }

    /// Whether another candidate is worth trying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Provider-supplied detail.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }
}

/// Connection to one provider family.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe so the router can hold `Arc<dyn ProviderAdapter>`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider family name; must match `CatalogEntry::provider`.
    fn name(&self) -> &str;

    /// Execute `request` on `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transient`] when another candidate may
    /// succeed and [`ProviderError::Permanent`] when the request itself is
    /// unserviceable.
    async fn dispatch(&self, model_id: &str, request: &Request)
        -> Result<DispatchResult, ProviderError>;
}

// ── SimulatedProvider ──────────────────────────────────────────────────

/// In-process adapter that echoes the prompt after a fixed delay.
///
/// Cost is computed from token counts and a per-model rate. The first
/// `n` dispatches can be made to fail transiently to exercise fallback.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct SimulatedProvider {
    name: String,
    delay: Duration,
    quality: Option<f64>,
    default_rate_per_1k: f64,
    model_rates: HashMap<String, f64>,
    fail_first: u32,
    calls: AtomicU32,
}

impl SimulatedProvider {
    /// A provider with a 10ms delay, no quality signal and zero cost.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::from_millis(10),
            quality: None,
            default_rate_per_1k: 0.0,
            model_rates: HashMap::new(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    /// Simulated call latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Quality signal attached to every result.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    /// USD per 1000 tokens for models without a specific rate.
    pub fn with_default_rate(mut self, per_1k: f64) -> Self {
        self.default_rate_per_1k = per_1k;
        self
    }

    /// USD per 1000 tokens for one model.
    pub fn with_model_rate(mut self, model: impl Into<String>, per_1k: f64) -> Self {
        self.model_rates.insert(model.into(), per_1k);
        self
    }

    /// Fail the first `n` dispatches with a transient error.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Number of dispatches received so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(
        &self,
        model_id: &str,
        request: &Request,
    ) -> Result<DispatchResult, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;

        if call < self.fail_first {
            return Err(ProviderError::transient(
                &self.name,
                format!("simulated overload on call {}", call + 1),
            ));
        }

        let output: String = request
            .prompt
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let input_tokens = (request.payload_chars() as u64).div_ceil(4);
        let output_tokens = (output.chars().count() as u64).div_ceil(4);
        let tokens_used = input_tokens + output_tokens;

        let rate = self
            .model_rates
            .get(model_id)
            .copied()
            .unwrap_or(self.default_rate_per_1k);

        Ok(DispatchResult {
            output,
            actual_cost: (tokens_used as f64 / 1000.0) * rate,
            latency: start.elapsed(),
            quality: self.quality,
            tokens_used,
        })
    }
}
