//! NF registration lifecycle and heartbeat timer.
//!
//! [`RegistrationManager`] owns the registered identity. It registers on every
//! "minimum configuration ready" trigger, keeps the registration alive through
//! a self-rescheduling heartbeat, falls back to a full registration whenever a
//! heartbeat is not acknowledged, and deregisters on shutdown.
//!
//! Two pieces of state are shared between the manager loop and heartbeat
//! firings:
//!
//! * the [`NfIdentity`], guarded by an async mutex that is held for the whole
//!   registry exchange so registrations, heartbeats and the deregistration
//!   never interleave;
//! * the heartbeat timer, guarded by a plain mutex that is never held across
//!   an await point.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{
    DataSetId, IpEndPoint, NfProfile, NfService, NfServiceVersion, NfStatus, NfType, PatchItem,
    PlmnId, TransportProtocol, UdrInfo, UriScheme,
};
use crate::nrf::{RegisterOutcome, RegistryClient, RegistryClientOptions, RegistryError};
use crate::telemetry::{RegistrationResult, SyncTelemetry};

/// Heartbeat interval used until the registry negotiates one.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
/// Default version advertised for the data repository service.
pub const DEFAULT_API_VERSION: &str = "1.0.0";

const DATA_REPOSITORY_SERVICE_NAME: &str = "nudr-dr";
const DATA_REPOSITORY_SERVICE_INSTANCE: &str = "datarepository";

/// Static inputs of the registration manager.
#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// Registry base URI (scheme, host and port).
    pub registry_uri: String,
    /// Scheme advertised for the service-based interface.
    pub scheme: UriScheme,
    /// Address advertised to the registry.
    pub register_ipv4: String,
    /// Port advertised to the registry.
    pub sbi_port: u16,
    /// Full API version of the advertised service (e.g. `1.0.0`).
    pub api_version: String,
    /// Heartbeat interval used until the registry returns one.
    pub heartbeat_interval: Duration,
    /// Instance id proposed on the first `PUT`; replaced by the registry-assigned id on 201.
    pub proposed_instance_id: String,
    /// HTTP client options for the registry exchanges.
    pub client: RegistryClientOptions,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            registry_uri: String::new(),
            scheme: UriScheme::Http,
            register_ipv4: "127.0.0.4".to_string(),
            sbi_port: 8000,
            api_version: DEFAULT_API_VERSION.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            proposed_instance_id: uuid::Uuid::new_v4().to_string(),
            client: RegistryClientOptions::default(),
        }
    }
}

/// Registered identity of this network function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfIdentity {
    /// Registry-assigned id, empty until the first successful registration.
    pub instance_id: Option<String>,
    /// Registry root used for every exchange.
    pub registry_uri: String,
    pub bind_address: String,
    pub scheme: UriScheme,
    pub sbi_port: u16,
    /// Interval between heartbeats, as negotiated with the registry.
    pub heartbeat_interval: Duration,
}

/// Lifecycle of the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    /// Heartbeat was not acknowledged and a full registration is in flight.
    ReRegistering,
    Deregistering,
    Terminated,
}

/// Result of one heartbeat firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Registry acknowledged the heartbeat.
    Acknowledged,
    /// Heartbeat failed and the fallback registration succeeded.
    ReRegistered,
    /// Heartbeat failed and so did the fallback registration.
    Lost,
    /// Heartbeats were stopped before the firing could proceed.
    Skipped,
}

/// Builds the profile sent on every registration attempt.
pub fn build_profile(
    identity: &NfIdentity,
    instance_id: &str,
    api_version: &str,
    plmns: &[PlmnId],
) -> NfProfile {
    let major = api_version.split('.').next().unwrap_or("1");
    let api_prefix = format!(
        "{}://{}:{}",
        identity.scheme.as_str(),
        identity.bind_address,
        identity.sbi_port
    );
    let service = NfService {
        service_instance_id: DATA_REPOSITORY_SERVICE_INSTANCE.to_string(),
        service_name: DATA_REPOSITORY_SERVICE_NAME.to_string(),
        versions: vec![NfServiceVersion {
            api_version_in_uri: format!("v{major}"),
            api_full_version: api_version.to_string(),
        }],
        scheme: identity.scheme,
        nf_service_status: NfStatus::Registered,
        api_prefix: Some(api_prefix),
        ip_end_points: vec![IpEndPoint {
            ipv4_address: Some(identity.bind_address.clone()),
            transport: TransportProtocol::Tcp,
            port: Some(identity.sbi_port),
        }],
    };

    NfProfile {
        nf_instance_id: instance_id.to_string(),
        nf_type: NfType::Udr,
        nf_status: NfStatus::Registered,
        plmn_list: plmns.to_vec(),
        heart_beat_timer: None,
        nf_services: vec![service],
        udr_info: Some(UdrInfo {
            supported_data_sets: vec![DataSetId::Subscription],
        }),
    }
}

/// Single shared heartbeat timer.
#[derive(Debug, Default)]
struct HeartbeatTimer {
    /// Pending timer task, if any.
    handle: Option<JoinHandle<()>>,
    /// Set once on shutdown; no timer is armed afterwards.
    stopped: bool,
}

struct RegistrationShared {
    client: RegistryClient,
    api_version: String,
    proposed_instance_id: String,
    identity: Mutex<NfIdentity>,
    heartbeat: StdMutex<HeartbeatTimer>,
    served: watch::Receiver<Vec<PlmnId>>,
    state: watch::Sender<RegistrationState>,
    telemetry: Arc<dyn SyncTelemetry>,
}

/// Owner of the NF registration; cheap to clone.
#[derive(Clone)]
pub struct RegistrationManager {
    shared: Arc<RegistrationShared>,
}

impl std::fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

impl RegistrationManager {
    /// Creates a manager reading the served PLMN list from `served`.
    pub fn new(
        settings: RegistrationSettings,
        served: watch::Receiver<Vec<PlmnId>>,
        telemetry: Arc<dyn SyncTelemetry>,
    ) -> Result<Self, RegistryError> {
        let client = RegistryClient::new(settings.client)?;
        let identity = NfIdentity {
            instance_id: None,
            registry_uri: settings.registry_uri.trim_end_matches('/').to_string(),
            bind_address: settings.register_ipv4,
            scheme: settings.scheme,
            sbi_port: settings.sbi_port,
            heartbeat_interval: settings.heartbeat_interval,
        };
        let (state, _) = watch::channel(RegistrationState::Unregistered);

        Ok(Self {
            shared: Arc::new(RegistrationShared {
                client,
                api_version: settings.api_version,
                proposed_instance_id: settings.proposed_instance_id,
                identity: Mutex::new(identity),
                heartbeat: StdMutex::new(HeartbeatTimer::default()),
                served,
                state,
                telemetry,
            }),
        })
    }

    /// Returns a copy of the current identity.
    pub async fn identity(&self) -> NfIdentity {
        self.shared.identity.lock().await.clone()
    }

    pub fn state(&self) -> RegistrationState {
        *self.shared.state.borrow()
    }

    /// Subscribes to registration state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RegistrationState> {
        self.shared.state.subscribe()
    }

    /// Performs one full registration (`PUT` of a freshly built profile).
    ///
    /// No retry happens here; callers decide when to try again.
    pub async fn register(&self) -> Result<RegisterOutcome, RegistryError> {
        let mut identity = self.shared.identity.lock().await;
        self.register_locked(&mut identity, RegistrationState::Registering)
            .await
    }

    /// Sends one heartbeat and re-arms the timer.
    ///
    /// Any failure is treated as "registration lost" and answered with a full
    /// registration before the timer is re-armed.
    pub async fn heartbeat(&self) -> HeartbeatOutcome {
        let outcome = {
            let mut identity = self.shared.identity.lock().await;
            // Checked under the identity lock: shutdown flips the flag before taking it.
            if self.heartbeat_stopped() {
                debug!("heartbeat skipped; registration manager is shutting down");
                return HeartbeatOutcome::Skipped;
            }
            self.heartbeat_locked(&mut identity).await
        };

        let interval = self.heartbeat_interval().await;
        self.schedule_heartbeat(interval);
        outcome
    }

    /// Best-effort removal of the registration.
    pub async fn deregister(&self) -> Result<(), RegistryError> {
        let identity = self.shared.identity.lock().await;
        let Some(instance_id) = identity.instance_id.as_deref() else {
            debug!("no registration to remove");
            return Ok(());
        };
        self.set_state(RegistrationState::Deregistering);
        let result = self
            .shared
            .client
            .deregister(&identity.registry_uri, instance_id)
            .await;
        self.shared.telemetry.on_deregistration(result.is_ok());
        match &result {
            Ok(()) => info!(instance_id = %instance_id, "NF deregistered"),
            Err(err) => warn!(instance_id = %instance_id, error = %err, "NF deregistration failed"),
        }
        result
    }

    /// Cancels the pending heartbeat and prevents any further one from being armed.
    pub fn stop_heartbeat(&self) {
        let mut timer = self
            .shared
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        timer.stopped = true;
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
    }

    /// Drives registrations from `trigger_rx` until `cancel` fires, then deregisters.
    pub async fn run(self, mut trigger_rx: mpsc::Receiver<bool>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("registration manager shutting down");
                    break;
                }
                trigger = trigger_rx.recv() => match trigger {
                    Some(true) => self.handle_trigger().await,
                    Some(false) => {
                        info!("minimum configuration no longer available; keeping current registration");
                    }
                    None => {
                        // Producers are gone; heartbeats keep running until shutdown.
                        cancel.cancelled().await;
                        break;
                    }
                }
            }
        }

        self.stop_heartbeat();
        // Deregistration failures are already logged and must not block shutdown.
        let _ = self.deregister().await;
        self.set_state(RegistrationState::Terminated);
    }

    async fn handle_trigger(&self) {
        match self.register().await {
            Ok(_) => debug!("registration triggered by configuration succeeded"),
            Err(err) => {
                error!(error = %err, "NF registration failed; next heartbeat will retry");
            }
        }
        // Armed even on failure so a heartbeat firing retries the registration.
        let interval = self.heartbeat_interval().await;
        self.schedule_heartbeat(interval);
    }

    async fn heartbeat_locked(&self, identity: &mut NfIdentity) -> HeartbeatOutcome {
        let telemetry = &self.shared.telemetry;
        let Some(instance_id) = identity.instance_id.clone() else {
            telemetry.on_heartbeat(false);
            warn!("heartbeat without a registered instance; registering");
            return self.reregister_locked(identity).await;
        };

        let patch = [PatchItem::replace(
            "/nfStatus",
            json!(NfStatus::Registered),
        )];
        match self
            .shared
            .client
            .update(&identity.registry_uri, &instance_id, &patch)
            .await
        {
            Ok(profile) => {
                if let Some(interval) = negotiated_interval(profile.as_ref()) {
                    identity.heartbeat_interval = interval;
                }
                telemetry.on_heartbeat(true);
                // A failed PUT may have left the state behind while the id stayed valid.
                self.set_state(RegistrationState::Registered);
                debug!(instance_id = %instance_id, "heartbeat acknowledged");
                HeartbeatOutcome::Acknowledged
            }
            Err(err) => {
                telemetry.on_heartbeat(false);
                warn!(
                    instance_id = %instance_id,
                    error = %err,
                    "heartbeat not acknowledged; registration lost, re-registering"
                );
                self.reregister_locked(identity).await
            }
        }
    }

    async fn reregister_locked(&self, identity: &mut NfIdentity) -> HeartbeatOutcome {
        match self
            .register_locked(identity, RegistrationState::ReRegistering)
            .await
        {
            Ok(_) => HeartbeatOutcome::ReRegistered,
            Err(err) => {
                error!(error = %err, "re-registration after lost heartbeat failed");
                HeartbeatOutcome::Lost
            }
        }
    }

    async fn register_locked(
        &self,
        identity: &mut NfIdentity,
        phase: RegistrationState,
    ) -> Result<RegisterOutcome, RegistryError> {
        self.set_state(phase);
        let instance_id = identity
            .instance_id
            .clone()
            .unwrap_or_else(|| self.shared.proposed_instance_id.clone());
        let plmns = self.shared.served.borrow().clone();
        let profile = build_profile(identity, &instance_id, &self.shared.api_version, &plmns);

        let outcome = match self
            .shared
            .client
            .register(&identity.registry_uri, &profile)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.shared
                    .telemetry
                    .on_registration(RegistrationResult::Failed);
                self.set_state(RegistrationState::Unregistered);
                return Err(err);
            }
        };

        match &outcome {
            RegisterOutcome::Created { location, .. } => {
                info!(
                    registry = %location.registry_root,
                    instance_id = %location.instance_id,
                    "NF registered"
                );
                identity.registry_uri = location.registry_root.clone();
                identity.instance_id = Some(location.instance_id.clone());
                self.shared
                    .telemetry
                    .on_registration(RegistrationResult::Created);
            }
            RegisterOutcome::Replaced { profile } => {
                // Keep whatever root and id are stored; only fill the id when none exists yet.
                if identity.instance_id.is_none() {
                    let returned = profile
                        .as_ref()
                        .map(|p| p.nf_instance_id.clone())
                        .filter(|id| !id.is_empty());
                    identity.instance_id = Some(returned.unwrap_or(instance_id));
                }
                info!(registry = %identity.registry_uri, "NF registration replaced");
                self.shared
                    .telemetry
                    .on_registration(RegistrationResult::Replaced);
            }
        }
        if let Some(interval) = negotiated_interval(outcome.profile()) {
            identity.heartbeat_interval = interval;
        }
        self.set_state(RegistrationState::Registered);
        Ok(outcome)
    }

    async fn heartbeat_interval(&self) -> Duration {
        self.shared.identity.lock().await.heartbeat_interval
    }

    fn heartbeat_stopped(&self) -> bool {
        self.shared
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
    }

    /// Replaces the pending timer with one firing after `delay`.
    fn schedule_heartbeat(&self, delay: Duration) {
        let mut timer = self
            .shared
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if timer.stopped {
            return;
        }
        if let Some(previous) = timer.handle.take() {
            previous.abort();
        }
        let manager = self.clone();
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The firing runs detached so re-arming the timer cannot abort it.
            tokio::spawn(async move {
                manager.heartbeat().await;
            });
        }));
        debug!(delay = ?delay, "heartbeat scheduled");
    }

    fn set_state(&self, state: RegistrationState) {
        self.shared.state.send_replace(state);
    }
}

fn negotiated_interval(profile: Option<&NfProfile>) -> Option<Duration> {
    profile
        .and_then(|p| p.heart_beat_timer)
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(u64::from(secs)))
}
