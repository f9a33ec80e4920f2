//! Resilience patterns for lifeline-runtime.
//!
//! This module provides:
//! - Circuit breakers keyed by operation id
//! - Retry with backoff
//! - An attempt ledger for retry statistics
//! - The fallback cascade
//! - Tiered model invocation

mod circuit_breaker;
mod fallback;
mod ledger;
mod retry;
mod tiers;

pub use circuit_breaker::{Admission, CircuitBreakerRegistry, CircuitState, CircuitStatus};
pub use fallback::{
    FailureRecord, FallbackStage, FallbackStats, FallbackStrategyManager, SIMILAR_PREFIX,
    TEMPLATE_CONFIDENCE,
};
pub use ledger::{AttemptOutcome, OutcomeLedger, RetryOutcomeRecord, RetryStats};
pub use retry::{RetryError, RetryExecutor};
pub use tiers::{TierBackend, TierError, TierResponse, TieredInvoker};
