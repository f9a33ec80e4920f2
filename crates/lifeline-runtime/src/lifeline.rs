//! The resilience layer as a single object.
//!
//! `Lifeline` owns the breaker registry, attempt ledger, response cache,
//! handoff queue and fallback manager, and wires them from one
//! [`RuntimeConfig`].

use lifeline_core::{
    FallbackLevel, FallbackResult, FallbackSource, HandoffRequest, ModelTier, OperationError,
    RequestContext, RetryConfig,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::handoff::{HandoffError, HandoffQueue, HandoffSink};
use crate::resilience::{
    CircuitBreakerRegistry, CircuitStatus, FallbackStats, FallbackStrategyManager, OutcomeLedger,
    RetryError, RetryExecutor, RetryStats, TierBackend, TierError, TierResponse, TieredInvoker,
};
use crate::RuntimeError;

/// Point-in-time view of the whole layer.
#[derive(Debug, Clone, Serialize)]
pub struct LifelineStatus {
    pub service_level: FallbackLevel,
    pub circuits: BTreeMap<String, CircuitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStats>,
    pub fallback: FallbackStats,
    pub cached_responses: usize,
}

/// One tier's answer in a voting round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierVote {
    pub tier: ModelTier,
    pub result: FallbackResult,
}

/// Outcome of [`Lifeline::invoke_with_voting`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingOutcome {
    /// The winning answer, or the single-tier fallback when no tier succeeded
    pub result: FallbackResult,
    pub winner: Option<ModelTier>,
    /// Number of tiers that produced a successful answer
    pub total_votes: usize,
    pub votes: Vec<TierVote>,
    /// Tier used after every vote failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_tier: Option<ModelTier>,
}

/// What happened at one level of a progressive degradation walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LevelOutcome {
    Success,
    /// The tier's circuit was open
    Unavailable,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelAttempt {
    pub tier: ModelTier,
    pub level: FallbackLevel,
    #[serde(flatten)]
    pub outcome: LevelOutcome,
}

/// Outcome of [`Lifeline::invoke_with_progressive_degradation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationOutcome {
    pub result: FallbackResult,
    /// Level of the tier that answered; `None` when the cascade took over
    pub degradation_level: Option<FallbackLevel>,
    pub attempted_levels: Vec<LevelAttempt>,
}

/// Builder for [`Lifeline`].
pub struct LifelineBuilder {
    config: RuntimeConfig,
    cache: Option<Arc<ResponseCache>>,
    handoff: Option<Arc<dyn HandoffSink>>,
}

impl LifelineBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            cache: None,
            handoff: None,
        }
    }

    /// Use an already opened cache instead of the configured one.
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Send escalations somewhere other than the configured queue.
    pub fn handoff_sink(mut self, sink: Arc<dyn HandoffSink>) -> Self {
        self.handoff = Some(sink);
        self
    }

    /// Validate the config and open the configured stores.
    pub async fn build(self) -> Result<Lifeline, RuntimeError> {
        self.config.validate()?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(ResponseCache::open(self.config.cache.clone()).await?),
        };
        let handoff: Arc<dyn HandoffSink> = match self.handoff {
            Some(sink) => sink,
            None => Arc::new(HandoffQueue::open(&self.config.handoff).await?),
        };

        let executor = RetryExecutor::new(
            Arc::new(CircuitBreakerRegistry::new()),
            Arc::new(OutcomeLedger::new()),
        );

        let mut tiers = TieredInvoker::new(executor.clone());
        for tier in ModelTier::ALL {
            tiers = tiers.with_profile(tier, self.config.profile(tier.as_str()));
        }

        let fallback = FallbackStrategyManager::new(
            executor.clone(),
            Arc::clone(&cache),
            Arc::clone(&handoff),
            self.config.fallback.clone(),
        );

        tracing::debug!(
            cache = ?cache.path(),
            cached_responses = cache.len(),
            "Lifeline ready"
        );

        Ok(Lifeline {
            config: self.config,
            executor,
            cache,
            handoff,
            fallback,
            tiers,
        })
    }
}

/// Retry, circuit breaking and fallback for unreliable operations.
pub struct Lifeline {
    config: RuntimeConfig,
    executor: RetryExecutor,
    cache: Arc<ResponseCache>,
    handoff: Arc<dyn HandoffSink>,
    fallback: FallbackStrategyManager,
    tiers: TieredInvoker,
}

impl Lifeline {
    pub fn builder(config: RuntimeConfig) -> LifelineBuilder {
        LifelineBuilder::new(config)
    }

    /// Build from `config` with the stores it names.
    pub async fn open(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        LifelineBuilder::new(config).build().await
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Run `operation` with the retry profile named after `operation_id`.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let config = self.config.profile(operation_id);
        self.executor
            .execute_with_retry(operation_id, &config, operation)
            .await
    }

    /// Run `operation` with an explicit retry config.
    pub async fn execute_with_retry_config<T, F, Fut>(
        &self,
        operation_id: &str,
        config: &RetryConfig,
        operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.executor
            .execute_with_retry(operation_id, config, operation)
            .await
    }

    /// Run `primary` with retries, then fall back through cache, templates
    /// and human handoff.
    pub async fn execute_with_fallbacks<F, Fut>(
        &self,
        operation_id: &str,
        prompt: &str,
        context: &RequestContext,
        primary: F,
    ) -> FallbackResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, OperationError>>,
    {
        let config = self.config.profile(operation_id);
        self.fallback
            .execute_with_fallbacks(operation_id, prompt, context, &config, primary)
            .await
    }

    /// Try `tier` and then each cheaper tier of its chain.
    pub async fn invoke_tiered(
        &self,
        backend: &dyn TierBackend,
        tier: ModelTier,
        prompt: &str,
    ) -> Result<TierResponse, TierError> {
        self.tiers.invoke(backend, tier, prompt).await
    }

    /// Tiered invocation as the primary of a fallback cascade.
    ///
    /// A successful response is cached under the model that produced it.
    pub async fn invoke_tiered_with_fallbacks(
        &self,
        backend: &dyn TierBackend,
        tier: ModelTier,
        prompt: &str,
        context: &RequestContext,
    ) -> FallbackResult {
        let (context, outcome) = match self.tiers.invoke(backend, tier, prompt).await {
            Ok(served) => (context.clone().with_model(served.model), Ok(served.response)),
            Err(e) => (context.clone(), Err(e.to_string())),
        };
        self.fallback
            .resolve(&tier.operation_id(), prompt, &context, outcome)
            .await
    }

    /// Ask every tier in `tiers` and keep the most confident successful answer.
    ///
    /// Each tier runs its own fallback cascade. Ties go to the earlier tier.
    /// When no tier succeeds, the most capable tier whose circuit is not open
    /// runs the cascade once more on its own.
    pub async fn invoke_with_voting(
        &self,
        backend: &dyn TierBackend,
        tiers: &[ModelTier],
        prompt: &str,
        context: &RequestContext,
    ) -> VotingOutcome {
        let mut votes = Vec::with_capacity(tiers.len());
        for &tier in tiers {
            let result = self
                .invoke_tiered_with_fallbacks(backend, tier, prompt, context)
                .await;
            votes.push(TierVote { tier, result });
        }

        let mut best: Option<&TierVote> = None;
        for vote in votes.iter().filter(|v| v.result.success) {
            if best.map_or(true, |b| vote.result.confidence > b.result.confidence) {
                best = Some(vote);
            }
        }
        let winner = best.map(|vote| (vote.tier, vote.result.clone()));
        let total_votes = votes.iter().filter(|v| v.result.success).count();

        if let Some((tier, result)) = winner {
            tracing::info!(
                winner = %tier,
                confidence = result.confidence,
                total_votes,
                "Model vote decided"
            );
            return VotingOutcome {
                result,
                winner: Some(tier),
                total_votes,
                votes,
                fallback_tier: None,
            };
        }

        tracing::warn!("All models failed in voting, falling back to a single tier");
        let fallback_tier = ModelTier::BY_CAPABILITY
            .into_iter()
            .find(|tier| self.tiers.is_available(*tier));

        let result = match fallback_tier {
            Some(tier) => {
                self.invoke_tiered_with_fallbacks(backend, tier, prompt, context)
                    .await
            }
            None => votes
                .last()
                .map(|vote| vote.result.clone())
                .unwrap_or_else(|| FallbackResult {
                    success: false,
                    result: "No model tiers were available".to_string(),
                    fallback_level: FallbackLevel::ServiceDown,
                    source: FallbackSource::Failure,
                    confidence: 0.0,
                    handoff_id: None,
                    attempted_fallbacks: Vec::new(),
                }),
        };

        VotingOutcome {
            result,
            winner: None,
            total_votes: 0,
            votes,
            fallback_tier,
        }
    }

    /// Walk the tiers from most to least capable, each alone, and report the
    /// level of service of the one that answered.
    ///
    /// Tiers whose circuit is open are skipped. When every tier fails the
    /// regular fallback cascade runs on the prompt.
    pub async fn invoke_with_progressive_degradation(
        &self,
        backend: &dyn TierBackend,
        prompt: &str,
        context: &RequestContext,
    ) -> DegradationOutcome {
        let mut attempted_levels = Vec::new();

        for tier in ModelTier::BY_CAPABILITY {
            let level = tier.service_level();
            if !self.tiers.is_available(tier) {
                attempted_levels.push(LevelAttempt {
                    tier,
                    level,
                    outcome: LevelOutcome::Unavailable,
                });
                continue;
            }

            match self.tiers.invoke_single(backend, tier, prompt).await {
                Ok(response) => {
                    attempted_levels.push(LevelAttempt {
                        tier,
                        level,
                        outcome: LevelOutcome::Success,
                    });
                    let context = context.clone().with_model(backend.model_name(tier));
                    let result = self
                        .fallback
                        .resolve(&tier.operation_id(), prompt, &context, Ok(response))
                        .await;
                    return DegradationOutcome {
                        result,
                        degradation_level: Some(level),
                        attempted_levels,
                    };
                }
                Err(RetryError::CircuitOpen { .. }) => attempted_levels.push(LevelAttempt {
                    tier,
                    level,
                    outcome: LevelOutcome::Unavailable,
                }),
                Err(e) => {
                    tracing::warn!(
                        tier = %tier,
                        service_level = %level,
                        error = %e,
                        "Degradation level failed"
                    );
                    attempted_levels.push(LevelAttempt {
                        tier,
                        level,
                        outcome: LevelOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        tracing::warn!("All degradation levels failed, using fallback cascade");
        let result = self
            .fallback
            .resolve(
                "progressive_degradation",
                prompt,
                context,
                Err("All degradation levels failed".to_string()),
            )
            .await;

        DegradationOutcome {
            result,
            degradation_level: None,
            attempted_levels,
        }
    }

    /// Breaker state for `operation_id`, if it was ever called.
    pub fn get_circuit_status(&self, operation_id: &str) -> Option<CircuitStatus> {
        self.executor.breakers().status(operation_id)
    }

    pub fn get_retry_stats(&self, operation_id: Option<&str>) -> Option<RetryStats> {
        self.executor.ledger().stats(operation_id)
    }

    pub async fn get_pending_handoff_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<HandoffRequest>, HandoffError> {
        self.handoff.list_pending(limit).await
    }

    pub fn get_fallback_stats(&self) -> FallbackStats {
        self.fallback.get_fallback_stats()
    }

    pub fn service_level(&self) -> FallbackLevel {
        self.fallback.service_level()
    }

    pub fn status(&self) -> LifelineStatus {
        LifelineStatus {
            service_level: self.service_level(),
            circuits: self.executor.breakers().all().into_iter().collect(),
            retry: self.get_retry_stats(None),
            fallback: self.get_fallback_stats(),
            cached_responses: self.cache.len(),
        }
    }
}
