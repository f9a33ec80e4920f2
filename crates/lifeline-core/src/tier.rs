//! Model tiers and their retry profiles.
//!
//! Larger models are slower and fail differently, so each tier gets its own
//! retry budget and breaker thresholds, and a chain of cheaper tiers to fall
//! back to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{BackoffStrategy, RetryConfig};
use crate::types::FallbackLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Standard,
    Reasoning,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Fast, ModelTier::Standard, ModelTier::Reasoning];

    /// Most capable first.
    pub const BY_CAPABILITY: [ModelTier; 3] =
        [ModelTier::Reasoning, ModelTier::Standard, ModelTier::Fast];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Reasoning => "reasoning",
        }
    }

    /// Breaker key for calls made against this tier.
    pub fn operation_id(&self) -> String {
        format!("model_{}", self.as_str())
    }

    /// Tiers to try, in order, after this one is exhausted.
    pub fn fallback_chain(&self) -> &'static [ModelTier] {
        match self {
            Self::Reasoning => &[ModelTier::Standard, ModelTier::Fast],
            Self::Standard => &[ModelTier::Fast],
            Self::Fast => &[],
        }
    }

    /// Level of service a response from this tier represents when tiers
    /// are walked from most to least capable.
    pub fn service_level(&self) -> FallbackLevel {
        match self {
            Self::Reasoning => FallbackLevel::FullService,
            Self::Standard => FallbackLevel::DegradedService,
            Self::Fast => FallbackLevel::MinimalService,
        }
    }

    /// Retry profile tuned to the tier's latency and failure characteristics.
    pub fn retry_profile(&self) -> RetryConfig {
        let (max_attempts, base, max, failure_threshold, recovery) = match self {
            Self::Fast => (4, Duration::from_millis(500), Duration::from_secs(10), 3, 15),
            Self::Standard => (3, Duration::from_secs(1), Duration::from_secs(30), 4, 30),
            Self::Reasoning => (2, Duration::from_secs(2), Duration::from_secs(60), 2, 45),
        };

        RetryConfig {
            max_attempts,
            base_delay: base,
            max_delay: max,
            strategy: BackoffStrategy::Exponential,
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery),
            ..Default::default()
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            "reasoning" => Ok(Self::Reasoning),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_chains() {
        assert_eq!(
            ModelTier::Reasoning.fallback_chain(),
            &[ModelTier::Standard, ModelTier::Fast]
        );
        assert!(ModelTier::Fast.fallback_chain().is_empty());
    }

    #[test]
    fn test_profiles_are_valid() {
        for tier in ModelTier::ALL {
            assert!(tier.retry_profile().validate().is_ok(), "{tier}");
        }
        assert_eq!(ModelTier::Fast.retry_profile().max_attempts, 4);
        assert_eq!(ModelTier::Reasoning.retry_profile().failure_threshold, 2);
    }

    #[test]
    fn test_service_level_follows_capability() {
        let levels: Vec<FallbackLevel> = ModelTier::BY_CAPABILITY
            .iter()
            .map(ModelTier::service_level)
            .collect();
        assert_eq!(
            levels,
            vec![
                FallbackLevel::FullService,
                FallbackLevel::DegradedService,
                FallbackLevel::MinimalService
            ]
        );
    }

    #[test]
    fn test_operation_id_and_parse() {
        assert_eq!(ModelTier::Standard.operation_id(), "model_standard");
        assert_eq!("Reasoning".parse::<ModelTier>(), Ok(ModelTier::Reasoning));
        assert!("huge".parse::<ModelTier>().is_err());
    }
}
