//! Records shared between the cache, the handoff queue and the fallback manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::context::{Priority, RequestContext};
use crate::fingerprint::fingerprint;

/// Service level reached by a fallback cascade.
///
/// Variants are declared in cascade order, so `a < b` means `a` is the
/// better level of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackLevel {
    FullService,
    DegradedService,
    MinimalService,
    CacheOnly,
    HumanHandoff,
    ServiceDown,
}

impl FallbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullService => "FULL_SERVICE",
            Self::DegradedService => "DEGRADED_SERVICE",
            Self::MinimalService => "MINIMAL_SERVICE",
            Self::CacheOnly => "CACHE_ONLY",
            Self::HumanHandoff => "HUMAN_HANDOFF",
            Self::ServiceDown => "SERVICE_DOWN",
        }
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a fallback result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    Primary,
    CacheExact,
    CacheSemantic,
    CachePartial,
    CacheTemplate,
    Template,
    HumanQueue,
    Failure,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::CacheExact => "cache_exact",
            Self::CacheSemantic => "cache_semantic",
            Self::CachePartial => "cache_partial",
            Self::CacheTemplate => "cache_template",
            Self::Template => "template",
            Self::HumanQueue => "human_queue",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for FallbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fallback cascade. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub success: bool,
    pub result: String,
    pub fallback_level: FallbackLevel,
    pub source: FallbackSource,
    /// Confidence in the result (0.0 - 1.0)
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_id: Option<String>,
    /// Description of every stage that did not produce the result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_fallbacks: Vec<String>,
}

/// A previously successful response, keyed by prompt fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub prompt_hash: String,
    pub original_prompt: String,
    pub response: String,
    /// Model or service that produced the response
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub success_count: u64,
    pub failure_count: u64,
    pub confidence_score: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CachedResponse {
    /// A fresh entry with baseline confidence 1.0.
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        source: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        let original_prompt = prompt.into();
        Self {
            prompt_hash: fingerprint(&original_prompt),
            original_prompt,
            response: response.into(),
            source: source.into(),
            created_at: Utc::now(),
            success_count: 0,
            failure_count: 0,
            confidence_score: 1.0,
            tags: tags.into_iter().collect(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Lifecycle of a handoff request. Only `Pending` is set by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    #[default]
    Pending,
    Assigned,
    Completed,
    Cancelled,
}

/// Request escalated to a human operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub request_id: String,
    pub original_prompt: String,
    pub failure_reason: String,
    pub attempted_fallbacks: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub context: RequestContext,
    #[serde(default)]
    pub status: HandoffStatus,
}

impl HandoffRequest {
    pub fn is_pending(&self) -> bool {
        self.status == HandoffStatus::Pending
    }
}
