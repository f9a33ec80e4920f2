//! Fallback cascade when the primary operation fails.
//!
//! Stages run in a fixed order and the first one to produce a result wins.
//! Every stage that did not produce the result leaves a line in
//! `attempted_fallbacks`, so an operator picking up a handoff sees
//! everything that was tried.

use chrono::{DateTime, Utc};
use lifeline_core::{
    FallbackLevel, FallbackResult, FallbackSource, HandoffRequest, HandoffStatus, Intent,
    OperationError, RequestContext, RetryConfig,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::retry::RetryExecutor;
use crate::cache::ResponseCache;
use crate::config::{FallbackConfig, TemplateMode};
use crate::handoff::HandoffSink;

/// Confidence of a canned template response
pub const TEMPLATE_CONFIDENCE: f64 = 0.3;

/// Prefix marking a response served for a similar prompt
pub const SIMILAR_PREFIX: &str = "[Similar response] ";

const FAILURE_PROMPT_CHARS: usize = 100;
const RECENT_FAILURES: usize = 10;

/// One stage of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    Primary,
    ExactCache,
    SemanticCache,
    PartialCache,
    CachedTemplate,
    Template,
    HumanHandoff,
}

impl FallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::ExactCache => "exact_cache",
            Self::SemanticCache => "semantic_cache",
            Self::PartialCache => "partial_cache",
            Self::CachedTemplate => "cached_template",
            Self::Template => "template",
            Self::HumanHandoff => "human_handoff",
        }
    }

    /// Stages enabled by `config`, in cascade order.
    pub fn plan(config: &FallbackConfig) -> Vec<FallbackStage> {
        let mut stages = vec![Self::Primary, Self::ExactCache, Self::SemanticCache];
        if config.partial_match {
            stages.push(Self::PartialCache);
        }
        if config.cached_templates {
            stages.push(Self::CachedTemplate);
        }
        if config.templates != TemplateMode::Disabled {
            stages.push(Self::Template);
        }
        stages.push(Self::HumanHandoff);
        stages
    }
}

impl fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for which every fallback, including handoff, failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub operation_id: String,
    /// First 100 characters of the prompt
    pub prompt: String,
    pub attempted_fallbacks: Vec<String>,
}

/// Counters for `get_fallback_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackStats {
    pub service_level: FallbackLevel,
    pub total_requests: u64,
    pub by_level: BTreeMap<FallbackLevel, u64>,
    pub complete_failures: usize,
    /// Most recent complete failures, oldest first
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Default)]
struct Counters {
    service_level: Option<FallbackLevel>,
    by_level: BTreeMap<FallbackLevel, u64>,
}

/// Runs the primary operation and, when it fails, the fallback cascade.
pub struct FallbackStrategyManager {
    executor: RetryExecutor,
    cache: Arc<ResponseCache>,
    handoff: Arc<dyn HandoffSink>,
    config: FallbackConfig,
    counters: Mutex<Counters>,
    failures: Mutex<VecDeque<FailureRecord>>,
}

impl FallbackStrategyManager {
    pub fn new(
        executor: RetryExecutor,
        cache: Arc<ResponseCache>,
        handoff: Arc<dyn HandoffSink>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            executor,
            cache,
            handoff,
            config,
            counters: Mutex::new(Counters::default()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Run `primary` through the retry executor, then fall back as needed.
    ///
    /// Never fails: total failure is reported as a `SERVICE_DOWN` result.
    pub async fn execute_with_fallbacks<F, Fut>(
        &self,
        operation_id: &str,
        prompt: &str,
        context: &RequestContext,
        retry: &RetryConfig,
        primary: F,
    ) -> FallbackResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, OperationError>>,
    {
        let outcome = self
            .executor
            .execute_with_retry(operation_id, retry, primary)
            .await
            .map_err(|e| e.to_string());
        self.resolve(operation_id, prompt, context, outcome).await
    }

    /// Continue the cascade from an already known primary outcome.
    ///
    /// A successful response is cached under the context's model name.
    pub async fn resolve(
        &self,
        operation_id: &str,
        prompt: &str,
        context: &RequestContext,
        primary: Result<String, String>,
    ) -> FallbackResult {
        let mut attempted = Vec::new();

        match primary {
            Ok(response) => {
                if let Err(e) = self
                    .cache
                    .put(prompt, &response, context.source_tag(), Vec::new())
                    .await
                {
                    tracing::warn!(operation_id, error = %e, "Failed to cache primary response");
                }
                return self.finish(
                    operation_id,
                    FallbackResult {
                        success: true,
                        result: response,
                        fallback_level: FallbackLevel::FullService,
                        source: FallbackSource::Primary,
                        confidence: 1.0,
                        handoff_id: None,
                        attempted_fallbacks: attempted,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(operation_id, error = %e, "Primary operation failed, falling back");
                attempted.push(format!("{}: {e}", FallbackStage::Primary));
            }
        }

        if let Some(result) = self.try_cache(prompt, &mut attempted).await {
            return self.finish(operation_id, result);
        }

        if let Some(result) = self.try_templates(prompt, &mut attempted).await {
            return self.finish(operation_id, result);
        }

        let result = self
            .hand_off(operation_id, prompt, context, &mut attempted)
            .await;
        self.finish(operation_id, result)
    }

    async fn try_cache(&self, prompt: &str, attempted: &mut Vec<String>) -> Option<FallbackResult> {
        let stage = FallbackStage::ExactCache;
        match self.cache.get_exact(prompt).await {
            Ok(Some(entry)) if entry.confidence_score > self.cache.config().exact_threshold => {
                return Some(served(
                    entry.response,
                    FallbackLevel::DegradedService,
                    FallbackSource::CacheExact,
                    entry.confidence_score,
                    attempted,
                ));
            }
            Ok(Some(entry)) => attempted.push(format!(
                "{stage}: confidence {:.2} below threshold",
                entry.confidence_score
            )),
            Ok(None) => attempted.push(format!("{stage}: miss")),
            Err(e) => attempted.push(format!("{stage}: {e}")),
        }

        let stage = FallbackStage::SemanticCache;
        match self.cache.get_semantic(prompt).await {
            Ok(Some(entry)) => {
                return Some(served(
                    format!("{SIMILAR_PREFIX}{}", entry.response),
                    FallbackLevel::MinimalService,
                    FallbackSource::CacheSemantic,
                    entry.confidence_score,
                    attempted,
                ));
            }
            Ok(None) => attempted.push(format!("{stage}: miss")),
            Err(e) => attempted.push(format!("{stage}: {e}")),
        }

        if self.config.partial_match {
            let stage = FallbackStage::PartialCache;
            match self.cache.get_partial(prompt).await {
                Ok(Some(entry)) => {
                    return Some(served(
                        format!("{SIMILAR_PREFIX}{}", entry.response),
                        FallbackLevel::MinimalService,
                        FallbackSource::CachePartial,
                        entry.confidence_score,
                        attempted,
                    ));
                }
                Ok(None) => attempted.push(format!("{stage}: miss")),
                Err(e) => attempted.push(format!("{stage}: {e}")),
            }
        }

        None
    }

    async fn try_templates(
        &self,
        prompt: &str,
        attempted: &mut Vec<String>,
    ) -> Option<FallbackResult> {
        if self.config.cached_templates {
            let stage = FallbackStage::CachedTemplate;
            match self.cache.get_template(prompt).await {
                Ok(Some(entry)) => {
                    return Some(served(
                        entry.response,
                        FallbackLevel::MinimalService,
                        FallbackSource::CacheTemplate,
                        entry.confidence_score,
                        attempted,
                    ));
                }
                Ok(None) => attempted.push(format!("{stage}: miss")),
                Err(e) => attempted.push(format!("{stage}: {e}")),
            }
        }

        let stage = FallbackStage::Template;
        let intent = Intent::classify(prompt);
        match self.config.templates {
            TemplateMode::Disabled => None,
            TemplateMode::SpecificOnly if intent.is_generic() => {
                attempted.push(format!("{stage}: no specific template"));
                None
            }
            _ => Some(served(
                intent.canned_response().to_string(),
                FallbackLevel::MinimalService,
                FallbackSource::Template,
                TEMPLATE_CONFIDENCE,
                attempted,
            )),
        }
    }

    async fn hand_off(
        &self,
        operation_id: &str,
        prompt: &str,
        context: &RequestContext,
        attempted: &mut Vec<String>,
    ) -> FallbackResult {
        let request = HandoffRequest {
            request_id: format!("{operation_id}-{}", uuid::Uuid::new_v4()),
            original_prompt: prompt.to_string(),
            failure_reason: "All automated fallbacks failed".to_string(),
            attempted_fallbacks: attempted.clone(),
            timestamp: Utc::now(),
            priority: context.priority(),
            context: context.clone(),
            status: HandoffStatus::Pending,
        };
        let priority = request.priority;

        match self.handoff.enqueue(request).await {
            Ok(handoff_id) => FallbackResult {
                success: false,
                result: format!(
                    "Your request has been forwarded to a human agent (reference {handoff_id}). \
                     You will be contacted shortly."
                ),
                fallback_level: FallbackLevel::HumanHandoff,
                source: FallbackSource::HumanQueue,
                confidence: 0.0,
                handoff_id: Some(handoff_id),
                attempted_fallbacks: std::mem::take(attempted),
            },
            Err(e) => {
                attempted.push(format!("{}: {e}", FallbackStage::HumanHandoff));
                tracing::error!(
                    operation_id,
                    priority = %priority,
                    error = %e,
                    "All fallbacks failed, service down"
                );
                self.record_failure(operation_id, prompt, attempted);

                FallbackResult {
                    success: false,
                    result: "Service is temporarily unavailable. Please try again later."
                        .to_string(),
                    fallback_level: FallbackLevel::ServiceDown,
                    source: FallbackSource::Failure,
                    confidence: 0.0,
                    handoff_id: None,
                    attempted_fallbacks: std::mem::take(attempted),
                }
            }
        }
    }

    fn record_failure(&self, operation_id: &str, prompt: &str, attempted: &[String]) {
        let mut failures = self.failures.lock();
        if self.config.failure_ledger_capacity == 0 {
            return;
        }
        while failures.len() >= self.config.failure_ledger_capacity {
            failures.pop_front();
        }
        failures.push_back(FailureRecord {
            timestamp: Utc::now(),
            operation_id: operation_id.to_string(),
            prompt: truncate(prompt, FAILURE_PROMPT_CHARS),
            attempted_fallbacks: attempted.to_vec(),
        });
    }

    fn finish(&self, operation_id: &str, result: FallbackResult) -> FallbackResult {
        {
            let mut counters = self.counters.lock();
            counters.service_level = Some(result.fallback_level);
            *counters.by_level.entry(result.fallback_level).or_insert(0) += 1;
        }

        match result.fallback_level {
            FallbackLevel::FullService => {
                tracing::debug!(operation_id, "Served by primary operation");
            }
            FallbackLevel::ServiceDown => {}
            level => tracing::info!(
                operation_id,
                fallback_level = %level,
                source = %result.source,
                confidence = result.confidence,
                "Served by fallback"
            ),
        }
        result
    }

    /// Level of the most recent result; full service before any request.
    pub fn service_level(&self) -> FallbackLevel {
        self.counters
            .lock()
            .service_level
            .unwrap_or(FallbackLevel::FullService)
    }

    pub fn get_fallback_stats(&self) -> FallbackStats {
        let (service_level, by_level) = {
            let counters = self.counters.lock();
            (
                counters.service_level.unwrap_or(FallbackLevel::FullService),
                counters.by_level.clone(),
            )
        };
        let failures = self.failures.lock();

        FallbackStats {
            service_level,
            total_requests: by_level.values().sum(),
            by_level,
            complete_failures: failures.len(),
            recent_failures: failures
                .iter()
                .skip(failures.len().saturating_sub(RECENT_FAILURES))
                .cloned()
                .collect(),
        }
    }
}

fn served(
    result: String,
    fallback_level: FallbackLevel,
    source: FallbackSource,
    confidence: f64,
    attempted: &mut Vec<String>,
) -> FallbackResult {
    FallbackResult {
        success: true,
        result,
        fallback_level,
        source,
        confidence,
        handoff_id: None,
        attempted_fallbacks: std::mem::take(attempted),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
