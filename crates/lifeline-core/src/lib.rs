//! # lifeline-core
//!
//! Deterministic building blocks for the Lifeline resilience layer.
//!
//! Nothing in this crate performs I/O or waits on time. It answers:
//! - How long should the next retry wait?
//! - May this failure be retried?
//! - Which cached prompt is closest to this one?
//! - Which canned response fits this prompt?
//! - How urgently does a human need to see this request?
//!
//! The async engine that uses these pieces lives in `lifeline-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use lifeline_core::{backoff, BackoffStrategy, RetryConfig};
//! use std::time::Duration;
//!
//! let config = RetryConfig::default()
//!     .with_strategy(BackoffStrategy::Exponential)
//!     .with_jitter(false);
//!
//! assert_eq!(backoff::base_delay(3, &config), Duration::from_secs(4));
//! ```

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod intent;
pub mod similarity;
pub mod tier;
pub mod types;

// Re-export main types at crate root
pub use config::{BackoffStrategy, ConfigError, RetryConfig};
pub use context::{Priority, RequestContext, UserTier};
pub use error::{ErrorKind, OperationError};
pub use fingerprint::fingerprint;
pub use intent::{Intent, TemplateTag};
pub use similarity::jaccard;
pub use tier::ModelTier;
pub use types::{
    CachedResponse, FallbackLevel, FallbackResult, FallbackSource, HandoffRequest, HandoffStatus,
};
