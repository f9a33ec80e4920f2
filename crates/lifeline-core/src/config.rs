//! Retry and circuit breaker configuration.
//!
//! A [`RetryConfig`] is immutable for the duration of one call. Durations are
//! written as human-readable strings ("500ms", "30s") in YAML.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry without waiting
    Immediate,

    /// Always wait `base_delay`
    Fixed,

    /// Wait `base_delay * attempt`
    Linear,

    /// Wait `base_delay * multiplier^(attempt - 1)`
    #[default]
    Exponential,
}

/// Upper bound accepted for any configured delay or recovery window.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Retry, backoff and breaker parameters for one operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    #[serde(with = "duration_human")]
    pub base_delay: Duration,

    #[serde(with = "duration_human")]
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Add a ±10% random perturbation to each delay
    pub jitter: bool,

    pub strategy: BackoffStrategy,

    pub retry_on_timeout: bool,
    pub retry_on_connection_error: bool,
    pub retry_on_parse_error: bool,
    pub retry_on_empty_response: bool,

    /// When false the executor neither consults nor updates the breaker
    pub enable_circuit_breaker: bool,

    /// Failures before opening the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed
    #[serde(with = "duration_human")]
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            strategy: BackoffStrategy::Exponential,
            retry_on_timeout: true,
            retry_on_connection_error: true,
            retry_on_parse_error: true,
            retry_on_empty_response: true,
            enable_circuit_breaker: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl RetryConfig {
    /// A config that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_breaker(
        mut self,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_timeout = recovery_timeout;
        self.success_threshold = success_threshold;
        self
    }

    /// Check the invariants the executor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                format!(
                    "{} is shorter than base_delay {}",
                    humantime::format_duration(self.max_delay),
                    humantime::format_duration(self.base_delay)
                ),
            ));
        }
        for (field, value) in [
            ("max_delay", self.max_delay),
            ("recovery_timeout", self.recovery_timeout),
        ] {
            if value > MAX_CONFIGURED_DURATION {
                return Err(ConfigError::invalid(
                    field,
                    format!(
                        "{} exceeds the limit of {}",
                        humantime::format_duration(value),
                        humantime::format_duration(MAX_CONFIGURED_DURATION)
                    ),
                ));
            }
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                "must be a positive finite number",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be at least 1"));
        }
        Ok(())
    }
}

/// Serde adapter for durations written as "250ms", "30s", "1m 30s".
pub mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.failure_threshold, 5);
    }

    #[test]
    fn test_parse_human_durations() {
        let yaml = r#"
max_attempts: 5
base_delay: 250ms
max_delay: 10s
strategy: linear
jitter: false
recovery_timeout: 1m
"#;
        let config: RetryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.strategy, BackoffStrategy::Linear);
        // Unspecified fields keep their defaults
        assert_eq!(config.success_threshold, 2);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = RetryConfig::default().with_max_attempts(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "max_attempts"
        ));
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let config = RetryConfig::default()
            .with_delays(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_windows() {
        let huge = Duration::from_secs(u64::MAX);

        let config = RetryConfig::default().with_delays(Duration::from_secs(1), huge);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "max_delay"
        ));

        let config = RetryConfig::default().with_breaker(5, huge, 2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "recovery_timeout"
        ));

        let config = RetryConfig::default().with_breaker(5, MAX_CONFIGURED_DURATION, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_roundtrips_durations() {
        let config = RetryConfig::default().with_delays(
            Duration::from_millis(500),
            Duration::from_secs(90),
        );
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("500ms"));
        let back: RetryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
