//! HTTP client for the NF management API of the registry (NRF).
//!
//! The client performs single request/response exchanges only. Retry and
//! re-registration policy lives in [`crate::registration`].

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::models::{NfProfile, PatchItem};

/// Path segment that separates the registry root from the resource path.
const NF_MANAGEMENT_PREFIX: &str = "/nnrf-nfm/";
/// Collection holding NF instance resources.
const NF_INSTANCES_PATH: &str = "/nnrf-nfm/v1/nf-instances";
const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Additional options governing how the HTTP client is constructed.
#[derive(Debug, Clone, Copy)]
pub struct RegistryClientOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether TLS certificate validation should be skipped.
    pub accept_invalid_certs: bool,
}

impl Default for RegistryClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
        }
    }
}

/// Error taxonomy for registry exchanges.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry rejected the request (4xx).
    #[error("registry rejected request: status {0}")]
    Rejected(u16),
    /// Registry reported a server-side failure (5xx).
    #[error("registry unavailable: status {0}")]
    Unavailable(u16),
    /// Any other status the exchange does not expect (e.g. 1xx/3xx or a non-matching 2xx).
    #[error("unexpected status code returned by the registry: {0}")]
    UnexpectedStatus(u16),
    /// 201 response without a usable `Location` header.
    #[error("invalid Location header in registry response: {0}")]
    InvalidLocation(String),
    /// Transport-level issue (DNS, TLS, socket, timeout, etc.).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response payload could not be decoded as an NF profile.
    #[error("failed to decode registry payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Registry root and instance id extracted from a `Location` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub registry_root: String,
    pub instance_id: String,
}

/// Result of a successful `PUT` of the NF profile.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// 201: a new resource was created at `location`.
    Created {
        location: ResourceLocation,
        profile: Option<NfProfile>,
    },
    /// 200: an existing resource was replaced.
    Replaced { profile: Option<NfProfile> },
}

impl RegisterOutcome {
    /// Profile echoed back by the registry, if any.
    pub fn profile(&self) -> Option<&NfProfile> {
        match self {
            RegisterOutcome::Created { profile, .. } | RegisterOutcome::Replaced { profile } => {
                profile.as_ref()
            }
        }
    }
}

/// HTTP client encapsulating a reusable `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new(options: RegistryClientOptions) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;
        Ok(Self { client })
    }

    /// Creates or replaces the NF instance resource (`PUT`).
    pub async fn register(
        &self,
        registry_uri: &str,
        profile: &NfProfile,
    ) -> Result<RegisterOutcome, RegistryError> {
        let url = instance_url(registry_uri, &profile.nf_instance_id);
        let body = serde_json::to_vec(profile)?;
        let response = self
            .send_request(Method::PUT, &url, "application/json", body)
            .await?;
        let status = response.status();

        match status {
            StatusCode::CREATED => {
                // The Location header is authoritative for both the registry root and the id.
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
                    .ok_or_else(|| RegistryError::InvalidLocation("<missing>".to_string()))?;
                let location = parse_location(&location)?;
                let profile = decode_profile(response).await?;
                Ok(RegisterOutcome::Created { location, profile })
            }
            StatusCode::OK => {
                let profile = decode_profile(response).await?;
                Ok(RegisterOutcome::Replaced { profile })
            }
            other => Err(classify_status(other)),
        }
    }

    /// Applies a JSON patch to the NF instance resource (`PATCH`), used for heartbeats.
    pub async fn update(
        &self,
        registry_uri: &str,
        instance_id: &str,
        patch: &[PatchItem],
    ) -> Result<Option<NfProfile>, RegistryError> {
        let url = instance_url(registry_uri, instance_id);
        let body = serde_json::to_vec(patch)?;
        let response = self
            .send_request(Method::PATCH, &url, JSON_PATCH_CONTENT_TYPE, body)
            .await?;

        match response.status() {
            StatusCode::OK => decode_profile(response).await,
            StatusCode::NO_CONTENT => Ok(None),
            other => Err(classify_status(other)),
        }
    }

    /// Removes the NF instance resource (`DELETE`).
    pub async fn deregister(
        &self,
        registry_uri: &str,
        instance_id: &str,
    ) -> Result<(), RegistryError> {
        let url = instance_url(registry_uri, instance_id);
        debug!(method = "DELETE", url = %url, "registry HTTP request");
        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        debug!(method = "DELETE", url = %url, status = %status, "registry HTTP response");

        match status {
            StatusCode::NO_CONTENT => Ok(()),
            other => Err(classify_status(other)),
        }
    }

    async fn send_request(
        &self,
        method: Method,
        url: &str,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, RegistryError> {
        debug!(
            method = %method,
            url = %url,
            body_len = body.len(),
            "registry HTTP request"
        );
        let response = self
            .client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(body)
            .send()
            .await?;
        debug!(
            method = %method,
            url = %url,
            status = %response.status(),
            "registry HTTP response"
        );
        Ok(response)
    }
}

fn instance_url(registry_uri: &str, instance_id: &str) -> String {
    format!(
        "{}{}/{}",
        registry_uri.trim_end_matches('/'),
        NF_INSTANCES_PATH,
        instance_id
    )
}

/// Splits `{root}/nnrf-nfm/v1/nf-instances/{id}` into its root and id.
pub fn parse_location(location: &str) -> Result<ResourceLocation, RegistryError> {
    let invalid = || RegistryError::InvalidLocation(location.to_string());
    let root_end = location.find(NF_MANAGEMENT_PREFIX).ok_or_else(invalid)?;
    let registry_root = &location[..root_end];
    let instance_id = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if registry_root.is_empty() || instance_id.is_empty() || instance_id == "nf-instances" {
        return Err(invalid());
    }
    Ok(ResourceLocation {
        registry_root: registry_root.to_string(),
        instance_id: instance_id.to_string(),
    })
}

/// Maps an unexpected HTTP status to the registry error taxonomy.
fn classify_status(status: StatusCode) -> RegistryError {
    if status.is_client_error() {
        return RegistryError::Rejected(status.as_u16());
    }
    if status.is_server_error() {
        return RegistryError::Unavailable(status.as_u16());
    }
    RegistryError::UnexpectedStatus(status.as_u16())
}

async fn decode_profile(response: reqwest::Response) -> Result<Option<NfProfile>, RegistryError> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlmnId, UdrInfo};
    use httptest::matchers::{all_of, contains, eq, json_decoded, request};
    use httptest::{responders::status_code, Expectation, Server};
    use serde_json::json;

    fn client() -> RegistryClient {
        RegistryClient::new(RegistryClientOptions::default()).unwrap()
    }

    fn profile(id: &str) -> NfProfile {
        NfProfile {
            nf_instance_id: id.to_string(),
            plmn_list: vec![PlmnId::new("208", "93")],
            udr_info: Some(UdrInfo::default()),
            ..Default::default()
        }
    }

    #[test]
    fn parse_location_splits_root_and_id() {
        let location =
            parse_location("https://nrf.example/nnrf-nfm/v1/nf-instances/abc123").unwrap();
        assert_eq!(location.registry_root, "https://nrf.example");
        assert_eq!(location.instance_id, "abc123");

        let location =
            parse_location("http://10.0.0.1:29510/nnrf-nfm/v1/nf-instances/id-1/").unwrap();
        assert_eq!(location.registry_root, "http://10.0.0.1:29510");
        assert_eq!(location.instance_id, "id-1");
    }

    #[test]
    fn parse_location_rejects_malformed_values() {
        for value in [
            "",
            "https://nrf.example/v1/nf-instances/abc",
            "/nnrf-nfm/v1/nf-instances/abc",
            "https://nrf.example/nnrf-nfm/v1/nf-instances/",
        ] {
            assert!(
                matches!(parse_location(value), Err(RegistryError::InvalidLocation(_))),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn classify_status_maps_expected_errors() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            RegistryError::Rejected(404)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            RegistryError::Rejected(400)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RegistryError::Unavailable(503)
        ));
        assert!(matches!(
            classify_status(StatusCode::ACCEPTED),
            RegistryError::UnexpectedStatus(202)
        ));
    }

    /// Ensures a 201 yields the location parsed from the header.
    #[tokio::test]
    async fn register_created_parses_location() {
        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        let location = "https://nrf.example/nnrf-nfm/v1/nf-instances/assigned-1";
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/nnrf-nfm/v1/nf-instances/proposed"),
                request::headers(contains(("content-type", "application/json"))),
            ])
            .respond_with(
                status_code(201)
                    .append_header("Location", location)
                    .append_header("Content-Type", "application/json")
                    .body(json!({ "nfInstanceId": "assigned-1", "heartBeatTimer": 15 }).to_string()),
            ),
        );

        let outcome = client().register(&root, &profile("proposed")).await.unwrap();
        match outcome {
            RegisterOutcome::Created { location, profile } => {
                assert_eq!(location.registry_root, "https://nrf.example");
                assert_eq!(location.instance_id, "assigned-1");
                assert_eq!(profile.and_then(|p| p.heart_beat_timer), Some(15));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_created_without_location_is_an_error() {
        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/nnrf-nfm/v1/nf-instances/p"))
                .respond_with(status_code(201)),
        );

        let result = client().register(&root, &profile("p")).await;
        assert!(matches!(result, Err(RegistryError::InvalidLocation(_))));
    }

    #[tokio::test]
    async fn register_replaced_and_rejected() {
        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        server.expect(
            Expectation::matching(request::method_path("PUT", "/nnrf-nfm/v1/nf-instances/a"))
                .respond_with(status_code(200).body(r#"{"heartBeatTimer":20}"#)),
        );
        server.expect(
            Expectation::matching(request::method_path("PUT", "/nnrf-nfm/v1/nf-instances/b"))
                .respond_with(status_code(400)),
        );

        let outcome = client().register(&root, &profile("a")).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Replaced { .. }));
        assert_eq!(outcome.profile().and_then(|p| p.heart_beat_timer), Some(20));

        let err = client().register(&root, &profile("b")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Rejected(400)));
    }

    /// Heartbeats are JSON patches replacing the NF status.
    #[tokio::test]
    async fn update_sends_json_patch() {
        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PATCH", "/nnrf-nfm/v1/nf-instances/id-1"),
                request::headers(contains(("content-type", "application/json-patch+json"))),
                request::body(json_decoded(eq(json!([
                    { "op": "replace", "path": "/nfStatus", "value": "REGISTERED" }
                ])))),
            ])
            .respond_with(status_code(204)),
        );
        server.expect(
            Expectation::matching(request::method_path("PATCH", "/nnrf-nfm/v1/nf-instances/gone"))
                .respond_with(status_code(404)),
        );

        let patch = vec![PatchItem::replace("/nfStatus", json!("REGISTERED"))];
        assert_eq!(client().update(&root, "id-1", &patch).await.unwrap(), None);
        assert!(matches!(
            client().update(&root, "gone", &patch).await,
            Err(RegistryError::Rejected(404))
        ));
    }

    #[tokio::test]
    async fn deregister_accepts_only_no_content() {
        let server = Server::run();
        let root = server.url_str("").trim_end_matches('/').to_string();
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/nnrf-nfm/v1/nf-instances/ok"))
                .respond_with(status_code(204)),
        );
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/nnrf-nfm/v1/nf-instances/bad"))
                .respond_with(status_code(500)),
        );

        assert!(client().deregister(&root, "ok").await.is_ok());
        assert!(matches!(
            client().deregister(&root, "bad").await,
            Err(RegistryError::Unavailable(500))
        ));
    }
}
