//! Configuration validation.
//!
//! Semantic checks only; serde handles the syntactic ones. Every problem is
//! reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem with a loaded configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("limiter.requests_per_second must be a positive number, got {0}")]
    RequestsPerSecond(f64),

    #[error("limiter.burst must be at least 1")]
    Burst,

    #[error("limiter.sweep_interval_secs must be greater than zero")]
    SweepInterval,

    #[error("limiter.idle_timeout_secs must be greater than zero")]
    IdleTimeout,

    #[error("shutdown.grace_period_secs must be greater than zero")]
    GracePeriod,

    #[error("timeouts.request_secs must be greater than zero")]
    RequestTimeout,

    #[error("observability.metrics_address '{0}' is not a valid socket address")]
    MetricsAddress(String),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    let limiter = &config.limiter;
    if !(limiter.requests_per_second.is_finite() && limiter.requests_per_second > 0.0) {
        errors.push(ValidationError::RequestsPerSecond(
            limiter.requests_per_second,
        ));
    }
    if limiter.burst == 0 {
        errors.push(ValidationError::Burst);
    }
    if limiter.sweep_interval_secs == 0 {
        errors.push(ValidationError::SweepInterval);
    }
    if limiter.idle_timeout_secs == 0 {
        errors.push(ValidationError::IdleTimeout);
    }

    if config.shutdown.grace_period_secs == 0 {
        errors.push(ValidationError::GracePeriod);
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::RequestTimeout);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.limiter.requests_per_second = 0.0;
        config.limiter.burst = 0;
        config.shutdown.grace_period_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Burst));
        assert!(errors.contains(&ValidationError::GracePeriod));
    }

    #[test]
    fn test_rejects_non_finite_rate() {
        let mut config = AppConfig::default();
        config.limiter.requests_per_second = f64::NAN;
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::RequestsPerSecond(_)));
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = AppConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
