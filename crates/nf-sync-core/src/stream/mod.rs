//! Push-based synchronization from the network-slice configuration service.
//!
//! [`StreamingConfigClient`] keeps one subscription open, reconnecting after a
//! fixed delay whenever the connection or the stream fails. Every message is
//! passed through a [`RestartTracker`] that decides, based on the
//! distributor's restart counter, whether the snapshot is forwarded.

mod transport;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use nf_sync_proto::{NetworkSlice, NetworkSliceRequest, NetworkSliceResponse};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffConfig, BackoffState};
use crate::models::PlmnId;
use crate::telemetry::SyncTelemetry;

pub use transport::{ConfigConnection, ConfigTransport, GrpcTransport, SliceStream};

/// Delay before reconnecting after a connection or stream failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Pause after each received message.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid configuration service endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("configuration service returned status: {0}")]
    Status(#[from] tonic::Status),
}

/// Streaming client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// URI of the configuration distributor (e.g. `http://webui:9876`).
    pub endpoint: String,
    /// Identity sent with the subscription.
    pub node_id: String,
    pub metadata_requested: bool,
    /// Restart counter of this process, randomized at start.
    pub self_restart_counter: u32,
    pub reconnect_delay: Duration,
    pub quiescence: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://webui:9876".to_string(),
            node_id: String::new(),
            metadata_requested: false,
            self_restart_counter: fastrand::u32(..),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            quiescence: DEFAULT_QUIESCENCE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Connectivity of the streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Subscribed and receiving.
    Ready,
}

/// Full configuration snapshot received from the distributor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SliceSnapshot {
    pub slices: Vec<NetworkSlice>,
    /// Restart counter of the distributor that produced the snapshot.
    pub restart_counter: u32,
}

impl SliceSnapshot {
    /// Site PLMNs of all slices, de-duplicated in order of first appearance.
    pub fn plmns(&self) -> Vec<PlmnId> {
        let mut plmns: Vec<PlmnId> = Vec::new();
        for plmn in self
            .slices
            .iter()
            .filter_map(|slice| slice.site.as_ref())
            .filter_map(|site| site.plmn.clone())
            .map(PlmnId::from)
        {
            if !plmns.contains(&plmn) {
                plmns.push(plmn);
            }
        }
        plmns
    }
}

/// Decision taken for one stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Same distributor (or first message) with slices: forward.
    Snapshot(SliceSnapshot),
    /// Same distributor reported that every slice was deleted: forward the empty snapshot.
    Cleared(SliceSnapshot),
    /// Distributor restarted and sent a fresh configuration: forward and adopt the counter.
    PeerRestarted(SliceSnapshot),
    /// Distributor restarted without configuration: drop.
    RestartWithoutData { restart_counter: u32 },
    /// Same distributor, no slices and no update flag: nothing to do.
    Idle,
}

impl Observation {
    /// Snapshot to forward, if any.
    pub fn into_snapshot(self) -> Option<SliceSnapshot> {
        match self {
            Observation::Snapshot(snapshot)
            | Observation::Cleared(snapshot)
            | Observation::PeerRestarted(snapshot) => Some(snapshot),
            Observation::RestartWithoutData { .. } | Observation::Idle => None,
        }
    }
}

/// Last-seen restart counter of the distributor.
#[derive(Debug, Default, Clone)]
pub struct RestartTracker {
    peer: Option<u32>,
}

impl RestartTracker {
    pub fn peer(&self) -> Option<u32> {
        self.peer
    }

    /// Classifies `response` and updates the last-seen counter.
    pub fn observe(&mut self, response: NetworkSliceResponse) -> Observation {
        let counter = response.restart_counter;
        let snapshot = SliceSnapshot {
            slices: response.network_slice,
            restart_counter: counter,
        };

        let same_peer = self.peer.map_or(true, |peer| peer == counter);
        if same_peer {
            self.peer = Some(counter);
            if !snapshot.slices.is_empty() {
                Observation::Snapshot(snapshot)
            } else if response.config_updated == 1 {
                Observation::Cleared(snapshot)
            } else {
                Observation::Idle
            }
        } else if !snapshot.slices.is_empty() {
            self.peer = Some(counter);
            Observation::PeerRestarted(snapshot)
        } else {
            Observation::RestartWithoutData {
                restart_counter: counter,
            }
        }
    }
}

/// Long-lived subscriber of the configuration distributor.
pub struct StreamingConfigClient {
    config: StreamConfig,
    transport: Arc<dyn ConfigTransport>,
    tracker: RestartTracker,
    reconnect: BackoffState,
    tx: mpsc::Sender<SliceSnapshot>,
    state: watch::Sender<ConnectionState>,
    telemetry: Arc<dyn SyncTelemetry>,
}

impl StreamingConfigClient {
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn ConfigTransport>,
        tx: mpsc::Sender<SliceSnapshot>,
        telemetry: Arc<dyn SyncTelemetry>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let reconnect = BackoffState::new(BackoffConfig::fixed(config.reconnect_delay));
        Self {
            config,
            transport,
            tracker: RestartTracker::default(),
            reconnect,
            tx,
            state,
            telemetry,
        }
    }

    /// Subscribes to connectivity changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connects, subscribes and forwards snapshots until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            endpoint = %self.config.endpoint,
            node_id = %self.config.node_id,
            restart_counter = self.config.self_restart_counter,
            "started configuration stream client"
        );
        loop {
            let session = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.open_stream() => result,
            };

            let finished = match session {
                Ok(stream) => {
                    self.reconnect.register_success();
                    self.set_state(ConnectionState::Ready);
                    self.telemetry.on_stream_connected();
                    self.consume(stream, &cancel).await
                }
                Err(err) => {
                    warn!(error = %err, "configuration stream unavailable");
                    false
                }
            };
            if finished {
                break;
            }

            self.set_state(ConnectionState::Disconnected);
            self.telemetry.on_stream_disconnected();
            let delay = self.reconnect.register_error();
            debug!(delay = ?delay, "reconnecting configuration stream");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("configuration stream client shutting down");
    }

    async fn open_stream(&self) -> Result<SliceStream, StreamError> {
        self.set_state(ConnectionState::Connecting);
        let mut connection = self.transport.connect().await?;
        let request = NetworkSliceRequest {
            restart_counter: self.config.self_restart_counter,
            client_id: self.config.node_id.clone(),
            metadata_requested: self.config.metadata_requested,
        };
        connection.subscribe(request).await
    }

    /// Drains `stream`. Returns `true` when the client must stop.
    async fn consume(&mut self, mut stream: SliceStream, cancel: &CancellationToken) -> bool {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                message = stream.next() => message,
            };
            let response = match message {
                Some(Ok(response)) => response,
                Some(Err(err)) => {
                    warn!(error = %err, "configuration stream broken");
                    return false;
                }
                None => {
                    warn!("configuration stream closed by the distributor");
                    return false;
                }
            };

            info!(
                slices = response.network_slice.len(),
                restart_counter = response.restart_counter,
                "received network slice configuration"
            );
            let observation = self.tracker.observe(response);
            if let Observation::RestartWithoutData { restart_counter } = &observation {
                info!(
                    restart_counter = *restart_counter,
                    "configuration service restarted and has no configuration"
                );
            }
            match observation.into_snapshot() {
                Some(snapshot) => {
                    self.telemetry.on_stream_message(true);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return true,
                        sent = self.tx.send(snapshot) => {
                            if sent.is_err() {
                                debug!("snapshot consumer is gone");
                                return true;
                            }
                        }
                    }
                }
                None => self.telemetry.on_stream_message(false),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                _ = sleep(self.config.quiescence) => {}
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}
