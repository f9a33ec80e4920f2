//! Append-only record of every attempt made by the retry executor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One attempt. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryOutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub operation_id: String,
    pub outcome: AttemptOutcome,
    /// 1-indexed attempt number within its call
    pub attempt: u32,
    #[serde(with = "lifeline_core::config::duration_human")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

/// Aggregated attempt statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryStats {
    /// `None` when aggregated over every operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub success_rate: f64,
    #[serde(with = "lifeline_core::config::duration_human")]
    pub average_execution_time: Duration,
    /// Records per attempt number, for attempts after the first
    pub retry_distribution: BTreeMap<u32, usize>,
}

#[derive(Default)]
pub struct OutcomeLedger {
    records: Mutex<Vec<RetryOutcomeRecord>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: RetryOutcomeRecord) {
        self.records.lock().push(record);
    }

    /// Statistics for one operation, or for all when `operation_id` is `None`.
    ///
    /// Returns `None` when no matching records exist.
    pub fn stats(&self, operation_id: Option<&str>) -> Option<RetryStats> {
        let records = self.records.lock();
        let matching: Vec<&RetryOutcomeRecord> = records
            .iter()
            .filter(|r| operation_id.map_or(true, |id| r.operation_id == id))
            .collect();

        if matching.is_empty() {
            return None;
        }

        let total = matching.len();
        let successes = matching
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Success)
            .count();
        let elapsed: Duration = matching.iter().map(|r| r.execution_time).sum();

        let mut retry_distribution = BTreeMap::new();
        for record in matching.iter().filter(|r| r.attempt > 1) {
            *retry_distribution.entry(record.attempt).or_insert(0) += 1;
        }

        Some(RetryStats {
            operation_id: operation_id.map(str::to_string),
            total_operations: total,
            successful_operations: successes,
            failed_operations: total - successes,
            success_rate: successes as f64 / total as f64,
            average_execution_time: average(elapsed, total),
            retry_distribution,
        })
    }
}

fn average(elapsed: Duration, count: usize) -> Duration {
    let nanos = elapsed.as_nanos() / (count.max(1) as u128);
    u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
}
