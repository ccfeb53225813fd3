//! Retry delay between fallback candidates.
//!
//! The router moves to the next ranked candidate after a retryable
//! failure. By default it does so immediately; a non-zero base delay turns
//! on exponential backoff so a flapping provider family is not hammered.

use std::time::Duration;

/// Delay strategy applied before each retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay doubles each retry, capped at `max_delay`.
    Exponential {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl BackoffPolicy {
    /// Build from config millisecond values. A zero base disables backoff.
    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        if base_ms == 0 {
            Self::None
        } else {
            Self::Exponential {
                initial_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms.max(base_ms)),
            }
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
            } => {
                let exp = retry.saturating_sub(1).min(31);
                let factor = 1u32 << exp;
                initial_delay
                    .checked_mul(factor)
                    .unwrap_or(*max_delay)
                    .min(*max_delay)
            }
        }
    }

    /// Sleep for the delay before retry `retry`. Returns immediately when
    /// the delay is zero.
    pub async fn wait(&self, retry: u32) {
        let delay = self.delay_for(retry);
        if !delay.is_zero() {
            tracing::debug!(retry, delay_ms = delay.as_millis() as u64, "backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }
}
