//! JSON models exchanged with the NF registry and the configuration endpoint.
//!
//! Field names follow the 3GPP TS 29.510 camel-case conventions. Every
//! response-side field is optional or defaulted so partial registry payloads
//! still decode.

use serde::{Deserialize, Serialize};

/// Served network identifier (PLMN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlmnId {
    /// Mobile country code.
    pub mcc: String,
    /// Mobile network code.
    pub mnc: String,
}

impl PlmnId {
    pub fn new(mcc: impl Into<String>, mnc: impl Into<String>) -> Self {
        Self {
            mcc: mcc.into(),
            mnc: mnc.into(),
        }
    }
}

impl std::fmt::Display for PlmnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.mcc, self.mnc)
    }
}

impl From<nf_sync_proto::PlmnId> for PlmnId {
    fn from(value: nf_sync_proto::PlmnId) -> Self {
        Self {
            mcc: value.mcc,
            mnc: value.mnc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NfType {
    #[default]
    #[serde(rename = "UDR")]
    Udr,
    #[serde(rename = "UDM")]
    Udm,
    #[serde(rename = "PCF")]
    Pcf,
    #[serde(rename = "NRF")]
    Nrf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NfStatus {
    #[default]
    Registered,
    Suspended,
    Undiscoverable,
}

/// URI scheme advertised for the service-based interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriScheme {
    #[default]
    Http,
    Https,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Http => "http",
            UriScheme::Https => "https",
        }
    }
}

impl std::str::FromStr for UriScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(UriScheme::Http),
            "https" => Ok(UriScheme::Https),
            other => Err(format!("unsupported URI scheme '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfServiceVersion {
    pub api_version_in_uri: String,
    pub api_full_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportProtocol {
    #[default]
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpEndPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub transport: TransportProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// One service instance advertised inside an [`NfProfile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfService {
    pub service_instance_id: String,
    pub service_name: String,
    #[serde(default)]
    pub versions: Vec<NfServiceVersion>,
    #[serde(default)]
    pub scheme: UriScheme,
    #[serde(default)]
    pub nf_service_status: NfStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_end_points: Vec<IpEndPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdrInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_data_sets: Vec<DataSetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSetId {
    Subscription,
    Policy,
    Exposure,
    Application,
}

/// NF profile registered with (and returned by) the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfProfile {
    #[serde(default)]
    pub nf_instance_id: String,
    #[serde(default)]
    pub nf_type: NfType,
    #[serde(default)]
    pub nf_status: NfStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plmn_list: Vec<PlmnId>,
    /// Heartbeat interval in seconds, as negotiated by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_beat_timer: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nf_services: Vec<NfService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udr_info: Option<UdrInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    Add,
    Remove,
    Replace,
}

/// RFC 6902 patch item used for heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchItem {
    pub op: PatchOperation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchItem {
    pub fn replace(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOperation::Replace,
            path: path.into(),
            value: Some(value),
        }
    }
}
