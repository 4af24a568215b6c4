//! Registration and configuration synchronization for a subscriber data repository NF.
//!
//! The crate keeps the network function registered with the NRF (heartbeats,
//! re-registration, deregistration on shutdown) and keeps its served PLMN list
//! in sync with the cluster configuration, either by polling the configuration
//! endpoint or by subscribing to the configuration distributor. Start with
//! [`config::SyncConfig`] and [`orchestrator::Orchestrator`].

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod backoff;
pub mod config;
pub mod error;
pub mod models;
pub mod nrf;
pub mod orchestrator;
pub mod poller;
pub mod registration;
pub mod sink;
pub mod stream;
pub mod telemetry;

pub use config::{SyncConfig, SyncModeKind};
pub use error::SyncError;
pub use models::{NfProfile, PlmnId};
pub use orchestrator::{MinConfigGate, Orchestrator, OrchestratorHandle, SyncMode};
pub use registration::{RegistrationManager, RegistrationSettings, RegistrationState};
pub use telemetry::{CountingTelemetry, NoopTelemetry, SyncTelemetry, TelemetrySnapshot};
