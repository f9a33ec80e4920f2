//! Runtime configuration loaded from YAML.
//!
//! ```yaml
//! retry:
//!   max_attempts: 4
//!   base_delay: 500ms
//! profiles:
//!   extraction:
//!     max_attempts: 2
//! cache:
//!   path: /var/lib/lifeline/cache.json
//!   confidence_policy: feedback
//! handoff:
//!   path: /var/lib/lifeline/handoff.json
//! fallback:
//!   templates: specific_only
//! ```

use lifeline_core::config::duration_human;
use lifeline_core::{ConfigError, ModelTier, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How caller feedback affects stored confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidencePolicy {
    /// Feedback counters are recorded but never change confidence
    #[default]
    Static,

    /// Confidence is scaled by the smoothed success ratio `(s + 1) / (s + f + 2)`
    Feedback,
}

impl ConfidencePolicy {
    /// Effective confidence of a stored entry under this policy.
    pub fn effective(&self, stored: f64, successes: u64, failures: u64) -> f64 {
        match self {
            Self::Static => stored,
            Self::Feedback => {
                let ratio = (successes as f64 + 1.0) / ((successes + failures) as f64 + 2.0);
                // A fresh entry (0/0) keeps its stored confidence
                stored * (ratio / 0.5).min(1.0)
            }
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// JSON file backing the cache; memory-only when unset
    pub path: Option<PathBuf>,

    /// Exact matches are served only above this confidence
    pub exact_threshold: f64,

    /// Minimum token Jaccard score for a semantic match
    pub semantic_threshold: f64,

    /// Characters of the prompt used for partial (substring) matching
    pub partial_prefix_chars: usize,

    pub partial_penalty: f64,
    pub template_penalty: f64,

    /// Entries kept in the in-memory hot layer in front of exact lookups
    pub hot_capacity: u64,

    #[serde(with = "duration_human")]
    pub hot_ttl: Duration,

    pub confidence_policy: ConfidencePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            exact_threshold: 0.8,
            semantic_threshold: 0.6,
            partial_prefix_chars: 50,
            partial_penalty: 0.7,
            template_penalty: 0.5,
            hot_capacity: 10_000,
            hot_ttl: Duration::from_secs(3600),
            confidence_policy: ConfidencePolicy::Static,
        }
    }
}

/// Human handoff queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HandoffConfig {
    /// JSON file backing the queue; memory-only when unset
    pub path: Option<PathBuf>,
}

/// Which canned templates the cascade may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Every intent, including the generic catch-all
    #[default]
    All,

    /// Only recognized intents; generic prompts go on to human handoff
    SpecificOnly,

    /// Skip template synthesis entirely
    Disabled,
}

/// Fallback cascade settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Try substring matching when the semantic lookup misses
    pub partial_match: bool,

    /// Try tag-based cache lookups before canned templates
    pub cached_templates: bool,

    pub templates: TemplateMode,

    /// Complete failures kept in memory for `fallback_stats`
    pub failure_ledger_capacity: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            partial_match: false,
            cached_templates: false,
            templates: TemplateMode::All,
            failure_ledger_capacity: 1_000,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Retry config used when a caller does not name a profile
    pub retry: RetryConfig,

    /// Named retry configs, e.g. per operation kind
    pub profiles: BTreeMap<String, RetryConfig>,

    pub cache: CacheConfig,
    pub handoff: HandoffConfig,
    pub fallback: FallbackConfig,
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Retry config for `name`: a configured profile, a model tier, or the default.
    pub fn profile(&self, name: &str) -> RetryConfig {
        if let Some(config) = self.profiles.get(name) {
            return config.clone();
        }
        match name.parse::<ModelTier>() {
            Ok(tier) => tier.retry_profile(),
            Err(_) => self.retry.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        for (name, profile) in &self.profiles {
            profile.validate().map_err(|e| ConfigError::InvalidValue {
                field: format!("profiles.{name}"),
                reason: e.to_string(),
            })?;
        }

        for (field, value) in [
            ("cache.exact_threshold", self.cache.exact_threshold),
            ("cache.semantic_threshold", self.cache.semantic_threshold),
            ("cache.partial_penalty", self.cache.partial_penalty),
            ("cache.template_penalty", self.cache.template_penalty),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("must be in (0, 1], got {value}"),
                });
            }
        }

        if self.cache.partial_prefix_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.partial_prefix_chars".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.cache.exact_threshold, 0.8);
        assert_eq!(config.fallback.templates, TemplateMode::All);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
retry:
  max_attempts: 4
  base_delay: 500ms
  max_delay: 20s
profiles:
  extraction:
    max_attempts: 2
    strategy: fixed
cache:
  path: /tmp/lifeline-cache.json
  semantic_threshold: 0.7
  confidence_policy: feedback
  hot_ttl: 5m
handoff:
  path: /tmp/lifeline-handoff.json
fallback:
  partial_match: true
  templates: specific_only
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.profile("extraction").max_attempts, 2);
        assert_eq!(config.cache.semantic_threshold, 0.7);
        assert_eq!(config.cache.confidence_policy, ConfidencePolicy::Feedback);
        assert_eq!(config.cache.hot_ttl, Duration::from_secs(300));
        assert!(config.fallback.partial_match);
        assert_eq!(config.fallback.templates, TemplateMode::SpecificOnly);
        assert!(config.handoff.path.is_some());
    }

    #[test]
    fn test_profile_resolution() {
        let config = RuntimeConfig::default();
        assert_eq!(config.profile("fast"), ModelTier::Fast.retry_profile());
        assert_eq!(config.profile("unknown-kind"), config.retry);
    }

    #[test]
    fn test_invalid_profile_is_named() {
        let yaml = r#"
profiles:
  broken:
    max_attempts: 0
"#;
        match RuntimeConfig::from_yaml(yaml) {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "profiles.broken"),
            other => panic!("expected invalid profile, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_bounds() {
        let yaml = "cache:\n  exact_threshold: 1.5\n";
        assert!(RuntimeConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_feedback_policy() {
        let policy = ConfidencePolicy::Feedback;
        assert_eq!(policy.effective(1.0, 0, 0), 1.0);
        // 1 success, 3 failures -> (2 / 6) / 0.5 = 0.666..
        assert!((policy.effective(1.0, 1, 3) - 2.0 / 3.0).abs() < 1e-9);
        // Successes never push confidence above the stored value
        assert_eq!(policy.effective(0.9, 10, 0), 0.9);
        assert_eq!(ConfidencePolicy::Static.effective(0.9, 0, 10), 0.9);
    }
}
