// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wiring of the synchronization path, the registration manager and the data sink.
//!
//! The orchestrator owns the two shared signals: the served PLMN list
//! (`watch`) and the "minimum configuration available" trigger (`mpsc<bool>`).
//! Exactly one synchronization path feeds them, selected once by [`SyncMode`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::models::PlmnId;
use crate::poller::{PlmnPoller, PollerConfig};
use crate::registration::{RegistrationManager, RegistrationSettings, RegistrationState};
use crate::sink::{
    policy_updates, run_sink, InMemoryDocumentStore, PolicyDataSink, SmPolicySink, SmPolicyUpdate,
};
use crate::stream::{
    ConfigTransport, ConnectionState, GrpcTransport, SliceSnapshot, StreamConfig,
    StreamingConfigClient,
};
use crate::telemetry::{NoopTelemetry, SyncTelemetry};

/// Slack added on top of the registry exchanges a shutdown may wait for.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

/// Grace period for deregistration given the registry request timeout.
///
/// Covers an in-flight heartbeat and its fallback registration, which hold
/// the identity lock, followed by the `DELETE` itself.
pub fn shutdown_grace_for(request_timeout: Duration) -> Duration {
    request_timeout * 3 + SHUTDOWN_MARGIN
}

/// Source of the served PLMN list.
#[derive(Debug, Clone)]
pub enum SyncMode {
    /// Subscribe to the configuration distributor.
    Streaming(StreamConfig),
    /// Poll the configuration endpoint.
    Polling(PollerConfig),
    /// Fixed list; minimum configuration is available immediately.
    Static(Vec<PlmnId>),
}

impl SyncMode {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::Streaming(_) => "streaming",
            SyncMode::Polling(_) => "polling",
            SyncMode::Static(_) => "static",
        }
    }
}

/// Tracks whether minimum configuration is available and decides which trigger to emit.
#[derive(Debug, Default, Clone)]
pub struct MinConfigGate {
    ready: bool,
}

impl MinConfigGate {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Trigger to emit for a new served list, if any.
    pub fn observe(&mut self, plmns: &[PlmnId]) -> Option<bool> {
        if !plmns.is_empty() {
            self.ready = true;
            Some(true)
        } else if self.ready {
            self.ready = false;
            Some(false)
        } else {
            None
        }
    }
}

/// Sole writer of the served list and the trigger channel.
struct ServedListPublisher {
    served: watch::Sender<Vec<PlmnId>>,
    trigger: mpsc::Sender<bool>,
    gate: MinConfigGate,
}

impl ServedListPublisher {
    /// Publishes `plmns`, then emits the trigger. Returns `false` once the pipeline must stop.
    async fn publish(&mut self, plmns: Vec<PlmnId>, cancel: &CancellationToken) -> bool {
        let trigger = self.gate.observe(&plmns);
        info!(plmns = ?plmns, "served PLMN list updated");
        self.served.send_replace(plmns);

        let Some(ready) = trigger else {
            return true;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.trigger.send(ready) => sent.is_ok(),
        }
    }
}

async fn consume_plmn_lists(
    mut publisher: ServedListPublisher,
    mut rx: mpsc::Receiver<Vec<PlmnId>>,
    cancel: CancellationToken,
) {
    loop {
        let plmns = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            plmns = rx.recv() => match plmns {
                Some(plmns) => plmns,
                None => break,
            },
        };
        if !publisher.publish(plmns, &cancel).await {
            break;
        }
    }
    debug!("PLMN list consumer stopped");
}

async fn consume_snapshots(
    mut publisher: ServedListPublisher,
    mut rx: mpsc::Receiver<SliceSnapshot>,
    updates: mpsc::Sender<SmPolicyUpdate>,
    cancel: CancellationToken,
) {
    'snapshots: loop {
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => break,
            },
        };

        for update in policy_updates(&snapshot) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'snapshots,
                sent = updates.send(update) => {
                    if sent.is_err() {
                        warn!("SM policy sink is gone; dropping policy updates");
                        break;
                    }
                }
            }
        }

        if !publisher.publish(snapshot.plmns(), &cancel).await {
            break;
        }
    }
    debug!("slice snapshot consumer stopped");
}

/// Builder of the running subsystem.
pub struct Orchestrator {
    registration: RegistrationSettings,
    mode: SyncMode,
    transport: Option<Arc<dyn ConfigTransport>>,
    sink: Option<Arc<dyn PolicyDataSink>>,
    telemetry: Arc<dyn SyncTelemetry>,
    shutdown_grace: Option<Duration>,
}

impl Orchestrator {
    pub fn new(registration: RegistrationSettings, mode: SyncMode) -> Self {
        Self {
            registration,
            mode,
            transport: None,
            sink: None,
            telemetry: Arc::new(NoopTelemetry),
            shutdown_grace: None,
        }
    }

    /// Overrides the gRPC transport used in streaming mode.
    pub fn with_transport(mut self, transport: Arc<dyn ConfigTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the policy sink used in streaming mode (in-memory store by default).
    pub fn with_sink(mut self, sink: Arc<dyn PolicyDataSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn SyncTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Overrides the grace period derived from the registry request timeout.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Spawns every task on the current runtime.
    pub fn start(self) -> Result<OrchestratorHandle, SyncError> {
        if let SyncMode::Static(plmns) = &self.mode {
            if plmns.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "static mode requires at least one PLMN".to_string(),
                ));
            }
        }

        let cancel = CancellationToken::new();
        let (served_tx, served_rx) = watch::channel(Vec::new());
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let shutdown_grace = self
            .shutdown_grace
            .unwrap_or_else(|| shutdown_grace_for(self.registration.client.timeout));
        let manager = RegistrationManager::new(
            self.registration,
            served_rx.clone(),
            self.telemetry.clone(),
        )?;
        let registration_state = manager.subscribe_state();

        info!(mode = self.mode.name(), "starting configuration synchronization");
        let mut tasks = Vec::new();
        let mut stream_state = None;
        let mut static_served = None;
        let publisher = ServedListPublisher {
            served: served_tx,
            trigger: trigger_tx,
            gate: MinConfigGate::default(),
        };

        match self.mode {
            SyncMode::Polling(config) => {
                let (tx, rx) = mpsc::channel(1);
                let poller = PlmnPoller::new(&config, tx, self.telemetry.clone())?;
                tasks.push(tokio::spawn(poller.run(cancel.clone())));
                tasks.push(tokio::spawn(consume_plmn_lists(
                    publisher,
                    rx,
                    cancel.clone(),
                )));
            }
            SyncMode::Streaming(config) => {
                let transport: Arc<dyn ConfigTransport> = match self.transport {
                    Some(transport) => transport,
                    None => Arc::new(GrpcTransport::new(&config)?),
                };
                let sink: Arc<dyn PolicyDataSink> = self.sink.unwrap_or_else(|| {
                    Arc::new(SmPolicySink::new(Arc::new(InMemoryDocumentStore::new())))
                });

                let (tx, rx) = mpsc::channel(1);
                let client =
                    StreamingConfigClient::new(config, transport, tx, self.telemetry.clone());
                stream_state = Some(client.subscribe_state());
                tasks.push(tokio::spawn(client.run(cancel.clone())));

                let (updates_tx, updates_rx) = mpsc::channel(1);
                tasks.push(tokio::spawn(run_sink(
                    sink,
                    updates_rx,
                    cancel.clone(),
                    self.telemetry.clone(),
                )));
                tasks.push(tokio::spawn(consume_snapshots(
                    publisher,
                    rx,
                    updates_tx,
                    cancel.clone(),
                )));
            }
            SyncMode::Static(plmns) => {
                let ServedListPublisher {
                    served, trigger, ..
                } = publisher;
                info!(plmns = ?plmns, "using static PLMN list");
                served.send_replace(plmns);
                // Fresh channel with spare capacity.
                if trigger.try_send(true).is_err() {
                    warn!("registration manager did not accept the initial trigger");
                }
                static_served = Some(served);
            }
        }

        // Spawned after every fallible step.
        let registration = tokio::spawn(manager.run(trigger_rx, cancel.clone()));

        Ok(OrchestratorHandle {
            cancel,
            registration,
            tasks,
            served: served_rx,
            registration_state,
            stream_state,
            _static_served: static_served,
            shutdown_grace,
        })
    }
}

/// Running subsystem.
pub struct OrchestratorHandle {
    cancel: CancellationToken,
    registration: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    served: watch::Receiver<Vec<PlmnId>>,
    registration_state: watch::Receiver<RegistrationState>,
    stream_state: Option<watch::Receiver<ConnectionState>>,
    // Keeps the static list observable through `served`.
    _static_served: Option<watch::Sender<Vec<PlmnId>>>,
    shutdown_grace: Duration,
}

impl OrchestratorHandle {
    /// Receiver of the served PLMN list.
    pub fn served(&self) -> watch::Receiver<Vec<PlmnId>> {
        self.served.clone()
    }

    pub fn registration_state(&self) -> watch::Receiver<RegistrationState> {
        self.registration_state.clone()
    }

    /// Connectivity of the streaming client; `None` outside streaming mode.
    pub fn stream_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.stream_state.clone()
    }

    /// Token cancelled by [`OrchestratorHandle::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every task and waits for deregistration within the grace period.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let deadline = Instant::now() + self.shutdown_grace;

        let mut registration = self.registration;
        if timeout_at(deadline, &mut registration).await.is_err() {
            warn!(grace = ?self.shutdown_grace, "deregistration did not finish in time");
            registration.abort();
        }

        for mut task in self.tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("configuration synchronization stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plmn(mcc: &str, mnc: &str) -> PlmnId {
        PlmnId::new(mcc, mnc)
    }

    #[test]
    fn gate_transitions() {
        let mut gate = MinConfigGate::default();
        assert_eq!(gate.observe(&[]), None);
        assert_eq!(gate.observe(&[plmn("001", "01")]), Some(true));
        assert_eq!(gate.observe(&[plmn("001", "01"), plmn("002", "02")]), Some(true));
        assert!(gate.is_ready());
        assert_eq!(gate.observe(&[]), Some(false));
        assert_eq!(gate.observe(&[]), None);
        assert!(!gate.is_ready());
        assert_eq!(gate.observe(&[plmn("001", "01")]), Some(true));
    }

    /// The served list must already reflect the delivery when its trigger arrives.
    #[tokio::test]
    async fn served_list_is_published_before_trigger() {
        let (served_tx, served_rx) = watch::channel(Vec::new());
        let (trigger_tx, mut trigger_rx) = mpsc::channel(1);
        let (plmn_tx, plmn_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let publisher = ServedListPublisher {
            served: served_tx,
            trigger: trigger_tx,
            gate: MinConfigGate::default(),
        };
        let task = tokio::spawn(consume_plmn_lists(publisher, plmn_rx, cancel.clone()));

        plmn_tx.send(vec![]).await.unwrap();
        plmn_tx.send(vec![plmn("001", "01")]).await.unwrap();
        assert_eq!(trigger_rx.recv().await, Some(true));
        assert_eq!(*served_rx.borrow(), vec![plmn("001", "01")]);

        plmn_tx.send(vec![]).await.unwrap();
        assert_eq!(trigger_rx.recv().await, Some(false));
        assert!(served_rx.borrow().is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn shutdown_grace_outlasts_registry_exchanges() {
        let timeout = RegistrationSettings::default().client.timeout;
        assert!(shutdown_grace_for(timeout) > timeout * 3);
    }

    /// Shutdown waits for a slow in-flight registration, then deregisters.
    #[tokio::test]
    async fn shutdown_deregisters_after_slow_registration() {
        use crate::nrf::RegistryClientOptions;
        use httptest::matchers::request;
        use httptest::responders::{delay_and_then, status_code};
        use httptest::{Expectation, Server};

        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        server.expect(
            Expectation::matching(request::method_path(
                "PUT",
                "/nnrf-nfm/v1/nf-instances/proposed",
            ))
            .respond_with(delay_and_then(
                Duration::from_millis(800),
                status_code(201).append_header(
                    "Location",
                    format!("{root}/nnrf-nfm/v1/nf-instances/id-1"),
                ),
            )),
        );
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/nnrf-nfm/v1/nf-instances/id-1"))
                .times(1)
                .respond_with(status_code(204)),
        );

        let handle = Orchestrator::new(
            RegistrationSettings {
                registry_uri: root,
                proposed_instance_id: "proposed".to_string(),
                client: RegistryClientOptions {
                    timeout: Duration::from_secs(2),
                    ..Default::default()
                },
                ..Default::default()
            },
            SyncMode::Static(vec![plmn("001", "01")]),
        )
        .start()
        .unwrap();
        let mut state = handle.registration_state();
        state
            .wait_for(|s| *s == RegistrationState::Registering)
            .await
            .unwrap();

        handle.shutdown().await;
        assert_eq!(*state.borrow(), RegistrationState::Terminated);
    }

    #[tokio::test]
    async fn static_mode_requires_plmns() {
        let result = Orchestrator::new(
            RegistrationSettings {
                registry_uri: "http://127.0.0.1:1".to_string(),
                ..Default::default()
            },
            SyncMode::Static(Vec::new()),
        )
        .start();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
