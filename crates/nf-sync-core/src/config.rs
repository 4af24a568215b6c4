// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::error::SyncError;
use crate::models::{PlmnId, UriScheme};
use crate::nrf::RegistryClientOptions;
use crate::orchestrator::SyncMode;
use crate::poller::PollerConfig;
use crate::registration::{RegistrationSettings, DEFAULT_API_VERSION};
use crate::stream::StreamConfig;

const ENV_REGISTRY_URI: &str = "NF_REGISTRY_URI";
const ENV_SBI_SCHEME: &str = "NF_SBI_SCHEME";
const ENV_SBI_REGISTER_IPV4: &str = "NF_SBI_REGISTER_IPV4";
const ENV_SBI_BINDING_IPV4: &str = "NF_SBI_BINDING_IPV4";
const ENV_SBI_PORT: &str = "NF_SBI_PORT";
const ENV_API_VERSION: &str = "NF_API_VERSION";
const ENV_SYNC_MODE: &str = "NF_SYNC_MODE";
const ENV_WEBUI_URI: &str = "NF_WEBUI_URI";
const ENV_CONFIG_POD_URI: &str = "NF_CONFIG_POD_URI";
const ENV_PLMN_SUPPORT_LIST: &str = "NF_PLMN_SUPPORT_LIST";
const ENV_METADATA_REQUESTED: &str = "NF_METADATA_REQUESTED";
const ENV_HOSTNAME: &str = "HOSTNAME";
const ENV_REGISTRY_NO_TLS_VALIDATION: &str = "NF_REGISTRY_NO_TLS_VALIDATION";
const ENV_LOG_LEVEL: &str = "NF_LOG_LEVEL";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which synchronization path feeds the served PLMN list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncModeKind {
    #[default]
    Polling,
    Streaming,
    Static,
}

impl FromStr for SyncModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" => Ok(Self::Polling),
            "streaming" => Ok(Self::Streaming),
            "static" => Ok(Self::Static),
            other => Err(format!(
                "Invalid sync mode '{other}'. Must be one of: polling, streaming, static"
            )),
        }
    }
}

/// Process configuration, read from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Registry base URI, required
    pub registry_uri: String,
    /// Scheme of the service-based interface
    pub sbi_scheme: UriScheme,
    /// Address advertised to the registry
    pub register_ipv4: String,
    /// Address the service-based interface listens on. Only reported at
    /// startup: the listener is owned by the hosting NF, not by this crate.
    pub binding_ipv4: String,
    pub sbi_port: u16,
    pub api_version: String,
    pub mode: SyncModeKind,
    /// Polling endpoint base URI
    pub webui_uri: String,
    /// Configuration distributor URI
    pub config_pod_uri: String,
    /// PLMNs served in static mode
    pub plmn_support_list: Vec<PlmnId>,
    pub metadata_requested: bool,
    /// Node identity sent with the stream subscription
    pub node_id: String,
    /// Accept invalid registry certificates
    pub registry_no_tls_validation: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            registry_uri: String::new(),
            sbi_scheme: UriScheme::Http,
            register_ipv4: "127.0.0.4".to_string(),
            binding_ipv4: "0.0.0.0".to_string(),
            sbi_port: 8000,
            api_version: DEFAULT_API_VERSION.to_string(),
            mode: SyncModeKind::Polling,
            webui_uri: "http://webui:5001".to_string(),
            config_pod_uri: "http://webui:9876".to_string(),
            plmn_support_list: Vec::new(),
            metadata_requested: false,
            node_id: String::new(),
            registry_no_tls_validation: false,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Create configuration from the process environment
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds and validates the configuration from key/value pairs.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| non_empty(value));
        let defaults = Self::default();

        let sbi_scheme = match get(ENV_SBI_SCHEME) {
            Some(value) => UriScheme::from_str(&value).map_err(SyncError::InvalidConfig)?,
            None => defaults.sbi_scheme,
        };
        let sbi_port = match get(ENV_SBI_PORT) {
            Some(value) => value.parse::<u16>().map_err(|_| {
                SyncError::InvalidConfig(format!("{ENV_SBI_PORT} is not a valid port: {value}"))
            })?,
            None => defaults.sbi_port,
        };
        let mode = match get(ENV_SYNC_MODE) {
            Some(value) => value.parse().map_err(SyncError::InvalidConfig)?,
            None => defaults.mode,
        };
        let plmn_support_list = match get(ENV_PLMN_SUPPORT_LIST) {
            Some(value) => parse_plmn_list(&value)?,
            None => Vec::new(),
        };

        let config = Self {
            registry_uri: get(ENV_REGISTRY_URI).unwrap_or_default(),
            sbi_scheme,
            register_ipv4: get(ENV_SBI_REGISTER_IPV4).unwrap_or(defaults.register_ipv4),
            binding_ipv4: get(ENV_SBI_BINDING_IPV4).unwrap_or(defaults.binding_ipv4),
            sbi_port,
            api_version: get(ENV_API_VERSION).unwrap_or(defaults.api_version),
            mode,
            webui_uri: get(ENV_WEBUI_URI).unwrap_or(defaults.webui_uri),
            config_pod_uri: get(ENV_CONFIG_POD_URI).unwrap_or(defaults.config_pod_uri),
            plmn_support_list,
            metadata_requested: parse_bool(get(ENV_METADATA_REQUESTED).as_deref(), false),
            node_id: get(ENV_HOSTNAME).unwrap_or_default(),
            registry_no_tls_validation: parse_bool(
                get(ENV_REGISTRY_NO_TLS_VALIDATION).as_deref(),
                false,
            ),
            log_level: get(ENV_LOG_LEVEL)
                .map(|value| value.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        let registry_uri = self.registry_uri.trim();
        if registry_uri.is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "{ENV_REGISTRY_URI} cannot be empty"
            )));
        }
        if !(registry_uri.starts_with("http://") || registry_uri.starts_with("https://")) {
            return Err(SyncError::InvalidConfig(format!(
                "{ENV_REGISTRY_URI} must be an http or https URI: {registry_uri}"
            )));
        }

        if self.sbi_port == 0 {
            return Err(SyncError::InvalidConfig(
                "SBI port must be greater than 0".to_string(),
            ));
        }

        if self.api_version.split('.').next().map_or(true, str::is_empty) {
            return Err(SyncError::InvalidConfig(format!(
                "Invalid API version '{}'",
                self.api_version
            )));
        }

        if self.mode == SyncModeKind::Static && self.plmn_support_list.is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "static sync mode requires {ENV_PLMN_SUPPORT_LIST}"
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Settings of the registration manager.
    pub fn registration_settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            registry_uri: self.registry_uri.trim().to_string(),
            scheme: self.sbi_scheme,
            register_ipv4: self.register_ipv4.clone(),
            sbi_port: self.sbi_port,
            api_version: self.api_version.clone(),
            client: RegistryClientOptions {
                accept_invalid_certs: self.registry_no_tls_validation,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Synchronization path selected by [`SyncConfig::mode`].
    pub fn sync_mode(&self) -> SyncMode {
        match self.mode {
            SyncModeKind::Polling => SyncMode::Polling(PollerConfig {
                base_uri: self.webui_uri.clone(),
                ..Default::default()
            }),
            SyncModeKind::Streaming => SyncMode::Streaming(StreamConfig {
                endpoint: self.config_pod_uri.clone(),
                node_id: self.node_id.clone(),
                metadata_requested: self.metadata_requested,
                ..Default::default()
            }),
            SyncModeKind::Static => SyncMode::Static(self.plmn_support_list.clone()),
        }
    }
}

/// Parses `mcc-mnc[,mcc-mnc...]`.
fn parse_plmn_list(value: &str) -> Result<Vec<PlmnId>, SyncError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || {
                SyncError::InvalidConfig(format!(
                    "Invalid PLMN '{entry}' in {ENV_PLMN_SUPPORT_LIST}, expected mcc-mnc"
                ))
            };
            let (mcc, mnc) = entry.split_once('-').ok_or_else(invalid)?;
            let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
            if mcc.len() != 3 || !digits(mcc) || !(2..=3).contains(&mnc.len()) || !digits(mnc) {
                return Err(invalid());
            }
            Ok(PlmnId::new(mcc, mnc))
        })
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
