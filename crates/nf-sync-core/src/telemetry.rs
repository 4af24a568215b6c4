//! Telemetry hooks for the registration and synchronization tasks.
//!
//! Embedders implement [`SyncTelemetry`] to observe registry exchanges,
//! poll cycles and stream activity. [`CountingTelemetry`] keeps relaxed
//! atomic counters that can be exported to any metric backend or logged via
//! [`TelemetrySnapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a registration attempt, as reported to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    /// Registry created a new resource (201).
    Created,
    /// Registry replaced an existing resource (200).
    Replaced,
    /// Exchange failed.
    Failed,
}

/// Telemetry hook invoked on significant synchronization events.
pub trait SyncTelemetry: Send + Sync {
    /// Called after every registration attempt.
    fn on_registration(&self, _result: RegistrationResult) {}
    /// Called after every heartbeat, `acknowledged` being false when registration was lost.
    fn on_heartbeat(&self, _acknowledged: bool) {}
    /// Called after the shutdown deregistration attempt.
    fn on_deregistration(&self, _success: bool) {}
    /// Called after a successful poll, `changed` being true when the list was delivered.
    fn on_poll_success(&self, _changed: bool) {}
    /// Called when a poll fails, with the interval before the next attempt.
    fn on_poll_error(&self, _next_interval: Duration) {}
    /// Called when a slice stream is established.
    fn on_stream_connected(&self) {}
    /// Called when a connect/subscribe attempt fails or an established stream breaks.
    fn on_stream_disconnected(&self) {}
    /// Called for every stream message, `delivered` being true when a snapshot was forwarded.
    fn on_stream_message(&self, _delivered: bool) {}
    /// Called after the data sink processed an update.
    fn on_policy_update(&self, _success: bool) {}
}

/// Default telemetry implementation that performs no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl SyncTelemetry for NoopTelemetry {}

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    registration_success: AtomicU64,
    registration_failure: AtomicU64,
    heartbeat_success: AtomicU64,
    heartbeat_failure: AtomicU64,
    deregistration_success: AtomicU64,
    deregistration_failure: AtomicU64,
    poll_success: AtomicU64,
    poll_error: AtomicU64,
    poll_delivered: AtomicU64,
    stream_connected: AtomicU64,
    stream_disconnected: AtomicU64,
    stream_delivered: AtomicU64,
    stream_dropped: AtomicU64,
    policy_update_success: AtomicU64,
    policy_update_failure: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            registration_success: self.registration_success.load(Ordering::Relaxed),
            registration_failure: self.registration_failure.load(Ordering::Relaxed),
            heartbeat_success: self.heartbeat_success.load(Ordering::Relaxed),
            heartbeat_failure: self.heartbeat_failure.load(Ordering::Relaxed),
            deregistration_success: self.deregistration_success.load(Ordering::Relaxed),
            deregistration_failure: self.deregistration_failure.load(Ordering::Relaxed),
            poll_success: self.poll_success.load(Ordering::Relaxed),
            poll_error: self.poll_error.load(Ordering::Relaxed),
            poll_delivered: self.poll_delivered.load(Ordering::Relaxed),
            stream_connected: self.stream_connected.load(Ordering::Relaxed),
            stream_disconnected: self.stream_disconnected.load(Ordering::Relaxed),
            stream_delivered: self.stream_delivered.load(Ordering::Relaxed),
            stream_dropped: self.stream_dropped.load(Ordering::Relaxed),
            policy_update_success: self.policy_update_success.load(Ordering::Relaxed),
            policy_update_failure: self.policy_update_failure.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub registration_success: u64,
    pub registration_failure: u64,
    pub heartbeat_success: u64,
    pub heartbeat_failure: u64,
    pub deregistration_success: u64,
    pub deregistration_failure: u64,
    pub poll_success: u64,
    pub poll_error: u64,
    /// Poll results that differed from the previous list and were forwarded.
    pub poll_delivered: u64,
    pub stream_connected: u64,
    pub stream_disconnected: u64,
    pub stream_delivered: u64,
    /// Stream messages that were received but not forwarded.
    pub stream_dropped: u64,
    pub policy_update_success: u64,
    pub policy_update_failure: u64,
}

impl fmt::Display for TelemetrySnapshot {
    /// Formats the snapshot metrics into a comma-separated list for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "registration_success={}, registration_failure={}, heartbeat_success={}, heartbeat_failure={}, deregistration_success={}, deregistration_failure={}, poll_success={}, poll_error={}, poll_delivered={}, stream_connected={}, stream_disconnected={}, stream_delivered={}, stream_dropped={}, policy_update_success={}, policy_update_failure={}",
            self.registration_success,
            self.registration_failure,
            self.heartbeat_success,
            self.heartbeat_failure,
            self.deregistration_success,
            self.deregistration_failure,
            self.poll_success,
            self.poll_error,
            self.poll_delivered,
            self.stream_connected,
            self.stream_disconnected,
            self.stream_delivered,
            self.stream_dropped,
            self.policy_update_success,
            self.policy_update_failure
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    /// Creates a new telemetry instance backed by the provided counter set.
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

/// Increments `success` or `failure` depending on `ok`.
fn bump(ok: bool, success: &AtomicU64, failure: &AtomicU64) {
    if ok {
        success.fetch_add(1, Ordering::Relaxed);
    } else {
        failure.fetch_add(1, Ordering::Relaxed);
    }
}

impl SyncTelemetry for CountingTelemetry {
    fn on_registration(&self, result: RegistrationResult) {
        bump(
            result != RegistrationResult::Failed,
            &self.counters.registration_success,
            &self.counters.registration_failure,
        );
    }

    fn on_heartbeat(&self, acknowledged: bool) {
        bump(
            acknowledged,
            &self.counters.heartbeat_success,
            &self.counters.heartbeat_failure,
        );
    }

    fn on_deregistration(&self, success: bool) {
        bump(
            success,
            &self.counters.deregistration_success,
            &self.counters.deregistration_failure,
        );
    }

    fn on_poll_success(&self, changed: bool) {
        self.counters.poll_success.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.counters.poll_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_poll_error(&self, _next_interval: Duration) {
        self.counters.poll_error.fetch_add(1, Ordering::Relaxed);
    }

    fn on_stream_connected(&self) {
        self.counters
            .stream_connected
            .fetch_add(1, Ordering::Relaxed);
    }

    fn on_stream_disconnected(&self) {
        self.counters
            .stream_disconnected
            .fetch_add(1, Ordering::Relaxed);
    }

    fn on_stream_message(&self, delivered: bool) {
        bump(
            delivered,
            &self.counters.stream_delivered,
            &self.counters.stream_dropped,
        );
    }

    fn on_policy_update(&self, success: bool) {
        bump(
            success,
            &self.counters.policy_update_success,
            &self.counters.policy_update_failure,
        );
    }
}
