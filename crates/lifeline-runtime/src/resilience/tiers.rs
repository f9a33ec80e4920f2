//! Tiered model invocation.
//!
//! A call starts at the requested tier and walks down its fallback chain
//! (reasoning → standard → fast). Each tier runs through the retry executor
//! under its own breaker, `model_<tier>`, with the tier's retry profile.

use async_trait::async_trait;
use lifeline_core::{ModelTier, OperationError, RetryConfig};
use std::collections::BTreeMap;
use thiserror::Error;

use super::circuit_breaker::CircuitState;
use super::retry::{RetryError, RetryExecutor};

/// Backend able to run a prompt on a given tier.
#[async_trait]
pub trait TierBackend: Send + Sync {
    async fn invoke(&self, tier: ModelTier, prompt: &str) -> Result<String, OperationError>;

    /// Model name reported for a tier, used as the cache source tag.
    fn model_name(&self, tier: ModelTier) -> String {
        tier.as_str().to_string()
    }
}

/// Response from the first tier that succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TierResponse {
    pub tier: ModelTier,
    pub model: String,
    pub response: String,
    /// Tiers tried before `tier`, with their errors
    pub failed_tiers: Vec<(ModelTier, RetryError)>,
}

impl TierResponse {
    pub fn degraded(&self) -> bool {
        !self.failed_tiers.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierError {
    /// Every tier in the chain failed, in the order tried
    #[error("All {} model tiers failed", .failed_tiers.len())]
    Exhausted {
        failed_tiers: Vec<(ModelTier, RetryError)>,
    },
}

impl TierError {
    /// The last tier tried and its error.
    pub fn last(&self) -> Option<&(ModelTier, RetryError)> {
        match self {
            Self::Exhausted { failed_tiers } => failed_tiers.last(),
        }
    }
}

/// Walks a tier's fallback chain through the retry executor.
#[derive(Clone)]
pub struct TieredInvoker {
    executor: RetryExecutor,
    profiles: BTreeMap<ModelTier, RetryConfig>,
}

impl TieredInvoker {
    /// Invoker using each tier's built-in retry profile.
    pub fn new(executor: RetryExecutor) -> Self {
        let profiles = ModelTier::ALL
            .iter()
            .map(|tier| (*tier, tier.retry_profile()))
            .collect();
        Self { executor, profiles }
    }

    pub fn with_profile(mut self, tier: ModelTier, config: RetryConfig) -> Self {
        self.profiles.insert(tier, config);
        self
    }

    pub fn profile(&self, tier: ModelTier) -> RetryConfig {
        self.profiles
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| tier.retry_profile())
    }

    /// Run `tier` alone, under its breaker and retry profile.
    pub async fn invoke_single(
        &self,
        backend: &dyn TierBackend,
        tier: ModelTier,
        prompt: &str,
    ) -> Result<String, RetryError> {
        let config = self.profile(tier);
        self.executor
            .execute_with_retry(&tier.operation_id(), &config, || backend.invoke(tier, prompt))
            .await
    }

    /// Whether `tier`'s breaker currently lets calls through.
    pub fn is_available(&self, tier: ModelTier) -> bool {
        self.executor
            .breakers()
            .status(&tier.operation_id())
            .map_or(true, |status| status.state != CircuitState::Open)
    }

    pub async fn invoke(
        &self,
        backend: &dyn TierBackend,
        tier: ModelTier,
        prompt: &str,
    ) -> Result<TierResponse, TierError> {
        let chain = std::iter::once(tier).chain(tier.fallback_chain().iter().copied());
        let mut failed_tiers: Vec<(ModelTier, RetryError)> = Vec::new();

        for current in chain {
            match self.invoke_single(backend, current, prompt).await {
                Ok(response) => {
                    if current != tier {
                        tracing::info!(
                            requested = %tier,
                            served_by = %current,
                            "Served by fallback model tier"
                        );
                    }
                    return Ok(TierResponse {
                        tier: current,
                        model: backend.model_name(current),
                        response,
                        failed_tiers,
                    });
                }
                Err(error) => {
                    tracing::warn!(tier = %current, error = %error, "Model tier failed");
                    failed_tiers.push((current, error));
                }
            }
        }

        Err(TierError::Exhausted { failed_tiers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    struct ScriptedBackend {
        healthy: HashSet<ModelTier>,
        calls: Mutex<Vec<ModelTier>>,
    }

    impl ScriptedBackend {
        fn healthy(tiers: &[ModelTier]) -> Self {
            Self {
                healthy: tiers.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TierBackend for ScriptedBackend {
        async fn invoke(&self, tier: ModelTier, prompt: &str) -> Result<String, OperationError> {
            self.calls.lock().push(tier);
            if self.healthy.contains(&tier) {
                Ok(format!("{tier}: {prompt}"))
            } else {
                Err(OperationError::connection(format!("{tier} offline")))
            }
        }

        fn model_name(&self, tier: ModelTier) -> String {
            format!("model-{tier}")
        }
    }

    fn invoker() -> TieredInvoker {
        let once = |tier: ModelTier| RetryConfig {
            max_attempts: 1,
            ..tier.retry_profile()
        };
        TieredInvoker::new(RetryExecutor::default())
            .with_profile(ModelTier::Reasoning, once(ModelTier::Reasoning))
            .with_profile(ModelTier::Standard, once(ModelTier::Standard))
            .with_profile(ModelTier::Fast, once(ModelTier::Fast))
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_tier_serves() {
        let backend = ScriptedBackend::healthy(&ModelTier::ALL);
        let response = invoker()
            .invoke(&backend, ModelTier::Reasoning, "hi")
            .await
            .unwrap();

        assert_eq!(response.tier, ModelTier::Reasoning);
        assert_eq!(response.model, "model-reasoning");
        assert!(!response.degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_chain_in_order() {
        let backend = ScriptedBackend::healthy(&[ModelTier::Fast]);
        let response = invoker()
            .invoke(&backend, ModelTier::Reasoning, "hi")
            .await
            .unwrap();

        assert_eq!(response.tier, ModelTier::Fast);
        assert_eq!(response.response, "fast: hi");
        assert_eq!(
            *backend.calls.lock(),
            vec![ModelTier::Reasoning, ModelTier::Standard, ModelTier::Fast]
        );
        assert_eq!(response.failed_tiers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_last_tier() {
        let backend = ScriptedBackend::healthy(&[]);
        let err = invoker()
            .invoke(&backend, ModelTier::Standard, "hi")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "All 2 model tiers failed");
        assert_eq!(err.last().map(|(tier, _)| *tier), Some(ModelTier::Fast));

        let TierError::Exhausted { failed_tiers } = err;
        assert_eq!(failed_tiers[0].0, ModelTier::Standard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tier_does_not_walk_chain() {
        let backend = ScriptedBackend::healthy(&[ModelTier::Fast]);
        let invoker = invoker();

        assert!(invoker
            .invoke_single(&backend, ModelTier::Reasoning, "hi")
            .await
            .is_err());
        assert_eq!(*backend.calls.lock(), vec![ModelTier::Reasoning]);
        assert!(invoker.is_available(ModelTier::Reasoning));

        let _ = invoker.invoke_single(&backend, ModelTier::Reasoning, "hi").await;
        assert!(!invoker.is_available(ModelTier::Reasoning));
        assert!(invoker.is_available(ModelTier::Fast));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiers_have_separate_breakers() {
        let backend = ScriptedBackend::healthy(&[ModelTier::Fast]);
        let invoker = invoker();

        // Reasoning opens after two failures; fast stays closed
        for _ in 0..2 {
            invoker.invoke(&backend, ModelTier::Reasoning, "hi").await.unwrap();
        }
        backend.calls.lock().clear();
        invoker.invoke(&backend, ModelTier::Reasoning, "hi").await.unwrap();

        // Reasoning is skipped without a call; standard (threshold 4) still runs
        assert_eq!(*backend.calls.lock(), vec![ModelTier::Standard, ModelTier::Fast]);
    }
}
