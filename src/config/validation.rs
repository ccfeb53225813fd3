//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`RouterConfig`] that cannot
//! be expressed through the type system alone (range checks, duplicate
//! catalog keys, cross-field references).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;
use std::time::Duration;

use super::RouterConfig;

/// Longest accepted reservation lifetime: seven days.
pub const MAX_RESERVATION_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "catalog_entries[0].quality").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn is_valid_cost(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

/// Check that a dispatch attempt always ends before the reservation it
/// runs under can expire.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] on `attempt_timeout_ms` when the
/// attempt timeout is not strictly shorter than the reservation timeout.
///
/// # Panics
///
/// This function never panics.
pub fn check_attempt_within_reservation(
    attempt_timeout: Duration,
    reservation_timeout: Duration,
) -> Result<(), ConfigError> {
    if attempt_timeout >= reservation_timeout {
        return Err(invalid(
            "attempt_timeout_ms",
            attempt_timeout.as_millis(),
            &format!(
                "must be < the reservation timeout ({}ms)",
                reservation_timeout.as_millis()
            ),
        ));
    }
    Ok(())
}

/// Validate all semantic constraints on a [`RouterConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &RouterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Catalog ──────────────────────────────────────────────────────
    if config.catalog_entries.is_empty() {
        errors.push(invalid(
            "catalog_entries",
            "[]",
            "at least one catalog entry is required",
        ));
    }

    let mut seen = HashSet::new();
    for (i, entry) in config.catalog_entries.iter().enumerate() {
        let path = format!("catalog_entries[{i}]");

        if entry.provider.trim().is_empty() {
            errors.push(invalid(format!("{path}.provider"), "", "provider must not be empty"));
        }
        if entry.model.trim().is_empty() {
            errors.push(invalid(format!("{path}.model"), "", "model must not be empty"));
        }
        for (name, value) in [
            ("input_cost_per_1k", entry.input_cost_per_1k),
            ("output_cost_per_1k", entry.output_cost_per_1k),
            ("per_request_cost", entry.per_request_cost),
        ] {
            if !is_valid_cost(value) {
                errors.push(invalid(
                    format!("{path}.{name}"),
                    value,
                    "cost must be finite and \u{2265} 0",
                ));
            }
        }
        if !(0.0..=1.0).contains(&entry.quality) {
            errors.push(invalid(
                format!("{path}.quality"),
                entry.quality,
                "must be between 0.0 and 1.0",
            ));
        }
        if !seen.insert((entry.provider.as_str(), entry.model.as_str())) {
            errors.push(invalid(
                format!("{path}.model"),
                entry.key(),
                "duplicate provider/model pair",
            ));
        }
    }

    // ── Budgets ──────────────────────────────────────────────────────
    for (scope, limit) in &config.budget_limits {
        if !is_valid_cost(limit.limit) {
            errors.push(invalid(
                format!("budget_limits.{scope}.limit"),
                limit.limit,
                "limit must be finite and \u{2265} 0",
            ));
        }
        if !(limit.alert_threshold > 0.0 && limit.alert_threshold <= 1.0) {
            errors.push(invalid(
                format!("budget_limits.{scope}.alert_threshold"),
                limit.alert_threshold,
                "must be in (0.0, 1.0]",
            ));
        }
    }

    if let Some(scope) = &config.default_scope {
        if !config.budget_limits.contains_key(scope) {
            errors.push(invalid(
                "default_scope",
                scope,
                "must name a scope configured in budget_limits",
            ));
        }
    }
    for (i, scope) in config.default_scopes.iter().enumerate() {
        if !config.budget_limits.contains_key(scope) {
            errors.push(invalid(
                format!("default_scopes[{i}]"),
                scope,
                "must name a scope configured in budget_limits",
            ));
        }
    }

    // ── Timing ───────────────────────────────────────────────────────
    if config.reservation_timeout_seconds == 0 {
        errors.push(invalid(
            "reservation_timeout_seconds",
            0,
            "must be at least 1 second",
        ));
    }
    if config.reservation_timeout_seconds > MAX_RESERVATION_TIMEOUT_SECONDS {
        errors.push(invalid(
            "reservation_timeout_seconds",
            config.reservation_timeout_seconds,
            "must be at most 604800 seconds (7 days)",
        ));
    }
    if config.attempt_timeout_ms == 0 {
        errors.push(invalid("attempt_timeout_ms", 0, "must be at least 1ms"));
    }
    if config.attempt_timeout_ms > 0 && config.reservation_timeout_seconds > 0 {
        if let Err(e) = check_attempt_within_reservation(
            config.attempt_timeout(),
            config.reservation_timeout(),
        ) {
            errors.push(e);
        }
    }
    if config.retry_backoff_ms > config.retry_backoff_max_ms {
        errors.push(invalid(
            "retry_backoff_ms",
            config.retry_backoff_ms,
            "must be \u{2264} retry_backoff_max_ms",
        ));
    }

    // ── Estimation ───────────────────────────────────────────────────
    if !is_valid_cost(config.default_output_ratio) {
        errors.push(invalid(
            "default_output_ratio",
            config.default_output_ratio,
            "must be finite and \u{2265} 0",
        ));
    }

    if config.telemetry.capacity == 0 {
        errors.push(invalid("telemetry.capacity", 0, "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
