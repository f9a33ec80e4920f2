//! # lifeline-runtime
//!
//! Async resilience engine built on `lifeline-core`.
//!
//! An unreliable operation (typically a model inference call) runs through
//! a retry executor guarded by a per-operation circuit breaker. When the
//! operation and its retries are exhausted, a fallback cascade tries, in
//! order:
//!
//! 1. an exact response cache hit
//! 2. a similar cached prompt
//! 3. a canned template for the prompt's intent
//! 4. escalation to a durable human handoff queue
//!
//! and reports `SERVICE_DOWN` only when even the handoff cannot be queued.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lifeline_core::{OperationError, RequestContext};
//! use lifeline_runtime::{Lifeline, RuntimeConfig};
//!
//! # async fn run() -> Result<(), lifeline_runtime::RuntimeError> {
//! let lifeline = Lifeline::open(RuntimeConfig::default()).await?;
//!
//! let result = lifeline
//!     .execute_with_fallbacks("qa", "What is 2+2?", &RequestContext::new(), || async {
//!         Err::<String, _>(OperationError::timeout("model did not answer"))
//!     })
//!     .await;
//!
//! println!("{} via {}", result.fallback_level, result.source);
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod cache;
pub mod config;
pub mod handoff;
mod lifeline;
pub mod resilience;
pub mod storage;

pub use cache::ResponseCache;
pub use config::{
    CacheConfig, ConfidencePolicy, FallbackConfig, HandoffConfig, RuntimeConfig, TemplateMode,
};
pub use handoff::{HandoffError, HandoffQueue, HandoffSink};
pub use lifeline::{
    DegradationOutcome, LevelAttempt, LevelOutcome, Lifeline, LifelineBuilder, LifelineStatus,
    TierVote, VotingOutcome,
};
pub use resilience::{
    CircuitState, CircuitStatus, FallbackStats, RetryError, RetryExecutor, RetryStats,
    TierBackend, TierError, TierResponse,
};
pub use storage::StoreError;

/// Errors from setting up the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] lifeline_core::ConfigError),

    #[error("Response cache unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Handoff queue unavailable: {0}")]
    Handoff(#[from] HandoffError),
}
