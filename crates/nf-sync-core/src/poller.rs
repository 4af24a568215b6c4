//! Pull-based synchronization of the served PLMN list.
//!
//! The poller fetches `{base}/nfconfig/plmn` one request at a time. Failures
//! stretch the interval multiplicatively up to a cap, any success resets it,
//! and a list is only forwarded when it differs from the last one forwarded.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backoff::{BackoffConfig, BackoffState};
use crate::models::PlmnId;
use crate::telemetry::SyncTelemetry;

/// Path of the PLMN configuration resource.
pub const POLLING_PATH: &str = "/nfconfig/plmn";
/// Interval between polls while the endpoint is healthy.
pub const INITIAL_POLLING_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound of the interval while the endpoint keeps failing.
pub const MAX_POLLING_INTERVAL: Duration = Duration::from_secs(40);
pub const POLLING_BACKOFF_FACTOR: f64 = 2.0;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base URI of the configuration endpoint (e.g. `http://webui:5001`).
    pub base_uri: String,
    /// Interval policy.
    pub backoff: BackoffConfig,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_uri: "http://webui:5001".to_string(),
            backoff: BackoffConfig {
                initial: INITIAL_POLLING_INTERVAL,
                max: MAX_POLLING_INTERVAL,
                factor: POLLING_BACKOFF_FACTOR,
            },
            request_timeout: INITIAL_POLLING_INTERVAL,
        }
    }
}

/// Failures of a single poll cycle. None of them stops the poller.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Checked before the status code.
    #[error("unexpected Content-Type: got {0:?}, want application/json")]
    UnexpectedContentType(String),
    #[error("configuration endpoint returned status {0}")]
    Status(u16),
    #[error("failed to parse PLMN list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result of a successful poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// List differs from the last forwarded one and was sent downstream.
    Delivered,
    Unchanged,
    /// Cancellation fired while the list was waiting for the consumer.
    Cancelled,
}

/// Periodic fetcher of the served PLMN list.
pub struct PlmnPoller {
    client: Client,
    endpoint: String,
    backoff: BackoffState,
    current: Vec<PlmnId>,
    tx: mpsc::Sender<Vec<PlmnId>>,
    telemetry: Arc<dyn SyncTelemetry>,
}

impl PlmnPoller {
    pub fn new(
        config: &PollerConfig,
        tx: mpsc::Sender<Vec<PlmnId>>,
        telemetry: Arc<dyn SyncTelemetry>,
    ) -> Result<Self, PollError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_uri.trim_end_matches('/'), POLLING_PATH),
            backoff: BackoffState::new(config.backoff),
            current: Vec::new(),
            tx,
            telemetry,
        })
    }

    /// Polls until `cancel` fires. Each cycle sleeps first, then fetches.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            endpoint = %self.endpoint,
            interval = ?self.backoff.current(),
            "started PLMN polling"
        );
        loop {
            let interval = self.backoff.current();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.fetch() => result,
            };
            match result {
                Ok(plmns) => {
                    self.backoff.register_success();
                    if self.deliver_if_changed(plmns, &cancel).await == PollOutcome::Cancelled {
                        break;
                    }
                }
                Err(err) => {
                    let next = self.backoff.register_error();
                    self.telemetry.on_poll_error(next);
                    error!(error = %err, retry_in = ?next, "PLMN polling error");
                }
            }
        }
        info!("PLMN polling shutting down");
    }

    /// Runs one fetch and forwards the result when it changed.
    ///
    /// Leaves the interval untouched; [`PlmnPoller::run`] owns the backoff.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<PollOutcome, PollError> {
        let plmns = self.fetch().await?;
        Ok(self.deliver_if_changed(plmns, cancel).await)
    }

    /// Interval the poller will wait before its next attempt.
    pub fn next_interval(&self) -> Duration {
        self.backoff.current()
    }

    async fn fetch(&self) -> Result<Vec<PlmnId>, PollError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .send()
            .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains(JSON_CONTENT_TYPE) {
            return Err(PollError::UnexpectedContentType(content_type));
        }

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                Ok(serde_json::from_slice(&body)?)
            }
            other => Err(PollError::Status(other.as_u16())),
        }
    }

    async fn deliver_if_changed(
        &mut self,
        plmns: Vec<PlmnId>,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        if plmns == self.current {
            debug!(plmns = ?plmns, "PLMN config did not change");
            self.telemetry.on_poll_success(false);
            return PollOutcome::Unchanged;
        }
        info!(plmns = ?plmns, "PLMN config changed");
        self.current = plmns.clone();
        self.telemetry.on_poll_success(true);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => PollOutcome::Cancelled,
            sent = self.tx.send(plmns) => match sent {
                Ok(()) => PollOutcome::Delivered,
                Err(_) => {
                    debug!("PLMN consumer is gone");
                    PollOutcome::Cancelled
                }
            },
        }
    }
}
