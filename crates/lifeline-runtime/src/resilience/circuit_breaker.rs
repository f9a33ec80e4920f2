//! Circuit breakers keyed by operation id.
//!
//! When an operation fails repeatedly its circuit opens and further calls
//! are rejected without running the operation until the recovery window
//! passes. The first call after that is let through as a probe.

use chrono::{DateTime, Utc};
use lifeline_core::RetryConfig;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected until the recovery window passes
    Open,

    /// Probing whether the operation recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Consecutive probe successes; only meaningful while half-open
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Earliest time an open circuit admits a probe
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Outcome of asking a circuit for permission to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_at: DateTime<Utc> },
}

/// Thirty years; the same horizon tokio uses for unbounded timers.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
    /// Monotonic deadline used for gating
    reopen_at: Option<Instant>,
    /// Wall-clock copy of `reopen_at` for reporting
    next_attempt: Option<DateTime<Utc>>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            reopen_at: None,
            next_attempt: None,
        }
    }

    fn open(&mut self, config: &RetryConfig) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        let now = Instant::now();
        // An unrepresentable deadline keeps the circuit open indefinitely
        self.reopen_at = Some(
            now.checked_add(config.recovery_timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
        );
        self.next_attempt = chrono::Duration::from_std(config.recovery_timeout)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
    }

    fn status(&self) -> CircuitStatus {
        CircuitStatus {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure: self.last_failure,
            next_attempt: self.next_attempt,
        }
    }
}

/// Registry of per-operation circuits.
///
/// Each circuit has its own lock; the map lock is only held to look up or
/// create an entry, so different operations never contend.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    circuits: RwLock<HashMap<String, Arc<Mutex<Circuit>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn circuit(&self, operation_id: &str) -> Arc<Mutex<Circuit>> {
        if let Some(circuit) = self.circuits.read().get(operation_id) {
            return Arc::clone(circuit);
        }
        let mut circuits = self.circuits.write();
        Arc::clone(
            circuits
                .entry(operation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Circuit::new()))),
        )
    }

    /// Ask whether a call to `operation_id` may run.
    ///
    /// An open circuit whose recovery window has passed moves to half-open
    /// and admits the caller as a probe.
    pub fn try_acquire(&self, operation_id: &str) -> Admission {
        let circuit = self.circuit(operation_id);
        let mut circuit = circuit.lock();

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed,
            CircuitState::Open => {
                let ready = circuit.reopen_at.map_or(true, |at| Instant::now() >= at);
                if ready {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.success_count = 0;
                    tracing::info!(
                        operation_id,
                        state = %circuit.state,
                        "Circuit transitioning to half-open for recovery test"
                    );
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        retry_at: circuit.next_attempt.unwrap_or_else(Utc::now),
                    }
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self, operation_id: &str, config: &RetryConfig) {
        let circuit = self.circuit(operation_id);
        let mut circuit = circuit.lock();

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.success_count += 1;
                if circuit.success_count >= config.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.failure_count = 0;
                    circuit.success_count = 0;
                    circuit.reopen_at = None;
                    circuit.next_attempt = None;
                    tracing::info!(operation_id, "Circuit closed after successful recovery");
                }
            }
            CircuitState::Closed => circuit.failure_count = 0,
            // A call admitted before the circuit opened finished late
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self, operation_id: &str, config: &RetryConfig) {
        let circuit = self.circuit(operation_id);
        let mut circuit = circuit.lock();

        circuit.failure_count += 1;
        circuit.last_failure = Some(Utc::now());

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.open(config);
                tracing::warn!(
                    operation_id,
                    failures = circuit.failure_count,
                    "Circuit reopened after failed recovery attempt"
                );
            }
            CircuitState::Closed if circuit.failure_count >= config.failure_threshold => {
                circuit.open(config);
                tracing::warn!(
                    operation_id,
                    failures = circuit.failure_count,
                    recovery_ms = config.recovery_timeout.as_millis() as u64,
                    "Circuit opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    /// Current status, or `None` if the operation was never seen.
    pub fn status(&self, operation_id: &str) -> Option<CircuitStatus> {
        self.circuits
            .read()
            .get(operation_id)
            .map(|circuit| circuit.lock().status())
    }

    /// Status of every known circuit, sorted by operation id.
    pub fn all(&self) -> Vec<(String, CircuitStatus)> {
        let mut all: Vec<(String, CircuitStatus)> = self
            .circuits
            .read()
            .iter()
            .map(|(id, circuit)| (id.clone(), circuit.lock().status()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
