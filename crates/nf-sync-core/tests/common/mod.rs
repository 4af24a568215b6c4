//! Scripted peers shared by the end-to-end tests.
//!
//! [`MockNrf`] and [`MockWebui`] are real HTTP servers (axum) bound to an
//! ephemeral port; [`ChannelTransport`] feeds stream messages from a channel.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header::LOCATION, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use nf_sync_core::stream::{ConfigConnection, ConfigTransport, SliceStream, StreamError};
use nf_sync_proto::{NetworkSliceRequest, NetworkSliceResponse};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Request captured by a mock server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub instance_id: String,
    pub body: Value,
}

impl Recorded {
    /// `"<METHOD> <instance id>"`, convenient for sequence assertions.
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.instance_id)
    }
}

struct NrfState {
    base: String,
    assigned_id: String,
    heartbeat_timer: u32,
    patch_status: AtomicU16,
    requests: Mutex<Vec<Recorded>>,
}

impl NrfState {
    fn record(&self, method: &'static str, instance_id: String, body: &Bytes) {
        let body = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.requests.lock().unwrap().push(Recorded {
            method,
            instance_id,
            body,
        });
    }
}

/// Registry that creates `assigned_id` on the first `PUT` and replaces it afterwards.
#[derive(Clone)]
pub struct MockNrf {
    state: Arc<NrfState>,
}

impl MockNrf {
    pub async fn start(assigned_id: &str, heartbeat_timer: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock registry");
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(NrfState {
            base,
            assigned_id: assigned_id.to_string(),
            heartbeat_timer,
            patch_status: AtomicU16::new(StatusCode::NO_CONTENT.as_u16()),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route(
                "/nnrf-nfm/v1/nf-instances/:id",
                put(put_instance).patch(patch_instance).delete(delete_instance),
            )
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock registry server failed");
        });
        Self { state }
    }

    pub fn base(&self) -> String {
        self.state.base.clone()
    }

    /// Status returned to subsequent heartbeats.
    pub fn set_patch_status(&self, status: StatusCode) {
        self.state
            .patch_status
            .store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.requests().iter().map(Recorded::line).collect()
    }

    /// Polls until `condition` holds on the captured requests.
    pub async fn wait_for<F>(&self, what: &str, condition: F) -> Vec<Recorded>
    where
        F: Fn(&[Recorded]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let requests = self.requests();
            if condition(&requests) {
                return requests;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}; captured {:?}", self.lines());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn put_instance(
    State(state): State<Arc<NrfState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    state.record("PUT", id.clone(), &body);
    let mut profile: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
    profile["heartBeatTimer"] = json!(state.heartbeat_timer);

    if id == state.assigned_id {
        (StatusCode::OK, Json(profile)).into_response()
    } else {
        let location = format!(
            "{}/nnrf-nfm/v1/nf-instances/{}",
            state.base, state.assigned_id
        );
        (StatusCode::CREATED, [(LOCATION, location)], Json(profile)).into_response()
    }
}

async fn patch_instance(
    State(state): State<Arc<NrfState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> StatusCode {
    state.record("PATCH", id, &body);
    StatusCode::from_u16(state.patch_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn delete_instance(
    State(state): State<Arc<NrfState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.record("DELETE", id, &Bytes::new());
    StatusCode::NO_CONTENT
}

/// Configuration endpoint serving a mutable PLMN list.
#[derive(Clone)]
pub struct MockWebui {
    base: String,
    plmns: Arc<Mutex<Value>>,
}

impl MockWebui {
    pub async fn start(initial: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock webui");
        let base = format!("http://{}", listener.local_addr().unwrap());
        let plmns = Arc::new(Mutex::new(initial));

        let app = Router::new()
            .route("/nfconfig/plmn", get(get_plmns))
            .with_state(plmns.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock webui server failed");
        });
        Self { base, plmns }
    }

    pub fn base(&self) -> String {
        self.base.clone()
    }

    pub fn set_plmns(&self, plmns: Value) {
        *self.plmns.lock().unwrap() = plmns;
    }
}

async fn get_plmns(State(plmns): State<Arc<Mutex<Value>>>) -> Json<Value> {
    Json(plmns.lock().unwrap().clone())
}

/// Transport whose single subscription yields whatever is pushed into the sender.
pub struct ChannelTransport {
    rx: Mutex<Option<mpsc::Receiver<NetworkSliceResponse>>>,
    pub requests: Arc<Mutex<Vec<NetworkSliceRequest>>>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::Sender<NetworkSliceResponse>) {
        let (tx, rx) = mpsc::channel(8);
        let transport = Arc::new(Self {
            rx: Mutex::new(Some(rx)),
            requests: Arc::new(Mutex::new(Vec::new())),
        });
        (transport, tx)
    }
}

struct ChannelConnection {
    rx: Option<mpsc::Receiver<NetworkSliceResponse>>,
    requests: Arc<Mutex<Vec<NetworkSliceRequest>>>,
}

#[async_trait]
impl ConfigTransport for ChannelTransport {
    async fn connect(&self) -> Result<Box<dyn ConfigConnection>, StreamError> {
        Ok(Box::new(ChannelConnection {
            rx: self.rx.lock().unwrap().take(),
            requests: self.requests.clone(),
        }))
    }
}

#[async_trait]
impl ConfigConnection for ChannelConnection {
    async fn subscribe(
        &mut self,
        request: NetworkSliceRequest,
    ) -> Result<SliceStream, StreamError> {
        self.requests.lock().unwrap().push(request);
        match self.rx.take() {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (Ok(message), rx))
            })
            .boxed()),
            None => Err(StreamError::Status(tonic::Status::unavailable(
                "subscription already consumed",
            ))),
        }
    }
}
