//! Durable queue of requests escalated to human operators.
//!
//! The fallback manager only enqueues and lists; assigning and completing
//! requests belongs to whatever tool the operators use.

use async_trait::async_trait;
use lifeline_core::HandoffRequest;
use thiserror::Error;

use crate::config::HandoffConfig;
use crate::storage::{RecordStore, StoreError};

/// Errors from the handoff queue.
#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Handoff request {0} is already queued")]
    Duplicate(String),

    #[error("Failed to persist handoff request: {0}")]
    Store(#[from] StoreError),
}

/// Destination for escalated requests.
#[async_trait]
pub trait HandoffSink: Send + Sync {
    /// Durably record a request. Returns its id.
    async fn enqueue(&self, request: HandoffRequest) -> Result<String, HandoffError>;

    /// Pending requests, highest priority first, oldest first within a priority.
    async fn list_pending(&self, limit: usize) -> Result<Vec<HandoffRequest>, HandoffError>;
}

/// Handoff queue backed by a [`RecordStore`].
pub struct HandoffQueue {
    store: RecordStore<HandoffRequest>,
}

impl HandoffQueue {
    pub async fn open(config: &HandoffConfig) -> Result<Self, HandoffError> {
        let store = match &config.path {
            Some(path) => RecordStore::open(path.clone()).await?,
            None => RecordStore::in_memory(),
        };
        Ok(Self { store })
    }

    pub fn in_memory() -> Self {
        Self {
            store: RecordStore::in_memory(),
        }
    }

    pub fn get(&self, request_id: &str) -> Option<HandoffRequest> {
        self.store.get(request_id)
    }

    /// Number of requests in any status.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl HandoffSink for HandoffQueue {
    async fn enqueue(&self, request: HandoffRequest) -> Result<String, HandoffError> {
        let id = request.request_id.clone();
        let priority = request.priority;
        if !self.store.insert_new(id.clone(), request).await? {
            return Err(HandoffError::Duplicate(id));
        }

        tracing::info!(request_id = %id, priority = %priority, "Queued request for human handoff");
        Ok(id)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<HandoffRequest>, HandoffError> {
        let mut pending: Vec<HandoffRequest> = self
            .store
            .values()
            .into_iter()
            .filter(HandoffRequest::is_pending)
            .collect();

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        pending.truncate(limit);
        Ok(pending)
    }
}
