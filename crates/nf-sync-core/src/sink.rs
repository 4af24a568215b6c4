//! Subscriber policy updates derived from slice snapshots.
//!
//! Every IMSI of every device group in a snapshot becomes one
//! [`SmPolicyUpdate`]. [`SmPolicySink`] turns updates into writes against a
//! generic [`DocumentStore`], so the database behind it stays pluggable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::SliceSnapshot;
use crate::telemetry::SyncTelemetry;

/// Collection holding per-subscriber session management policy data.
pub const SM_POLICY_COLLECTION: &str = "policyData.ues.smData";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid slice/service type {0:?}")]
    InvalidSst(String),
    #[error("no document in {collection} matches {filter}")]
    NotFound { collection: String, filter: Value },
    #[error("document is not a JSON object")]
    InvalidDocument,
    #[error("store error: {0}")]
    Store(String),
}

/// Slice identifier as carried by the configuration distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snssai {
    /// Decimal slice/service type.
    pub sst: String,
    pub sd: String,
}

impl Snssai {
    /// Document key of the slice: two hex digits of the sst followed by the sd.
    pub fn key(&self) -> Result<String, SinkError> {
        let sst = self.sst_value()?;
        Ok(format!("{:02x}{}", sst, self.sd))
    }

    fn sst_value(&self) -> Result<u32, SinkError> {
        self.sst
            .trim()
            .parse()
            .map_err(|_| SinkError::InvalidSst(self.sst.clone()))
    }
}

/// Session management policy entry for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmPolicyUpdate {
    /// Digits only, without the `imsi-` prefix.
    pub imsi: String,
    pub dnn: String,
    pub snssai: Snssai,
}

impl SmPolicyUpdate {
    pub fn ue_id(&self) -> String {
        format!("imsi-{}", self.imsi)
    }
}

/// Fans `snapshot` out into one update per IMSI, in snapshot order.
///
/// Slices without an S-NSSAI and device groups without IP domain details
/// carry no policy and are skipped.
pub fn policy_updates(snapshot: &SliceSnapshot) -> Vec<SmPolicyUpdate> {
    let mut updates = Vec::new();
    for slice in &snapshot.slices {
        let Some(nssai) = slice.nssai.as_ref() else {
            debug!(slice = %slice.name, "slice has no S-NSSAI; skipping policy data");
            continue;
        };
        for group in &slice.device_group {
            let Some(domain) = group.ip_domain_details.as_ref() else {
                debug!(slice = %slice.name, group = %group.name, "device group has no IP domain");
                continue;
            };
            updates.extend(group.imsi.iter().map(|imsi| SmPolicyUpdate {
                imsi: imsi.clone(),
                dnn: domain.dnn_name.clone(),
                snssai: Snssai {
                    sst: nssai.sst.clone(),
                    sd: nssai.sd.clone(),
                },
            }));
        }
    }
    updates
}

/// Consumer of subscriber policy updates.
#[async_trait]
pub trait PolicyDataSink: Send + Sync {
    async fn apply(&self, update: &SmPolicyUpdate) -> Result<(), SinkError>;
}

/// Generic document database addressed by collection and equality filter.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document of `collection` matching `filter`.
    async fn get(&self, collection: &str, filter: &Value) -> Result<Option<Value>, SinkError>;

    /// Replaces the matching document or inserts `document`. Returns `true` when it existed.
    async fn put(&self, collection: &str, filter: &Value, document: Value)
        -> Result<bool, SinkError>;

    /// Applies an RFC 7386 merge patch to the matching document.
    async fn patch(&self, collection: &str, filter: &Value, patch: &Value)
        -> Result<(), SinkError>;

    /// Removes the matching document. Returns `true` when one was removed.
    async fn delete(&self, collection: &str, filter: &Value) -> Result<bool, SinkError>;
}

/// Process-local [`DocumentStore`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Every field of `filter` is present in `document` with an equal value.
fn matches(document: &Value, filter: &Value) -> bool {
    match (document.as_object(), filter.as_object()) {
        (Some(document), Some(filter)) => filter
            .iter()
            .all(|(key, value)| document.get(key) == Some(value)),
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, filter: &Value) -> Result<Option<Value>, SinkError> {
        Ok(self
            .lock()
            .get(collection)
            .and_then(|documents| documents.iter().find(|d| matches(d, filter)))
            .cloned())
    }

    async fn put(
        &self,
        collection: &str,
        filter: &Value,
        document: Value,
    ) -> Result<bool, SinkError> {
        if !document.is_object() {
            return Err(SinkError::InvalidDocument);
        }
        let mut collections = self.lock();
        let documents = collections.entry(collection.to_string()).or_default();
        match documents.iter_mut().find(|d| matches(d, filter)) {
            Some(existing) => {
                *existing = document;
                Ok(true)
            }
            None => {
                documents.push(document);
                Ok(false)
            }
        }
    }

    async fn patch(
        &self,
        collection: &str,
        filter: &Value,
        patch: &Value,
    ) -> Result<(), SinkError> {
        let mut collections = self.lock();
        let existing = collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|d| matches(d, filter)))
            .ok_or_else(|| SinkError::NotFound {
                collection: collection.to_string(),
                filter: filter.clone(),
            })?;
        json_patch::merge(existing, patch);
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &Value) -> Result<bool, SinkError> {
        let mut collections = self.lock();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = documents.len();
        documents.retain(|d| !matches(d, filter));
        Ok(documents.len() != before)
    }
}

/// Writes session management policy documents for subscribers.
pub struct SmPolicySink<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> SmPolicySink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: DocumentStore> PolicyDataSink for SmPolicySink<S> {
    async fn apply(&self, update: &SmPolicyUpdate) -> Result<(), SinkError> {
        let key = update.snssai.key()?;
        let ue_id = update.ue_id();
        let filter = json!({ "ueId": ue_id });

        let mut dnn_data = Map::new();
        dnn_data.insert(update.dnn.clone(), json!({ "dnn": update.dnn }));
        let entry = json!({
            "snssai": {
                "sst": update.snssai.sst_value()?,
                "sd": update.snssai.sd,
            },
            "smPolicyDnnData": dnn_data,
        });
        let mut snssai_data = Map::new();
        snssai_data.insert(key.clone(), entry);

        if let Some(mut document) = self.store.get(SM_POLICY_COLLECTION, &filter).await? {
            // The slice entry is replaced as a whole, other slices are kept.
            let fields = document
                .as_object_mut()
                .ok_or(SinkError::InvalidDocument)?;
            match fields
                .get_mut("smPolicySnssaiData")
                .and_then(Value::as_object_mut)
            {
                Some(existing) => existing.extend(snssai_data),
                None => {
                    fields.insert("smPolicySnssaiData".to_string(), Value::Object(snssai_data));
                }
            }
            self.store
                .put(SM_POLICY_COLLECTION, &filter, document)
                .await?;
            debug!(ue_id = %ue_id, snssai = %key, dnn = %update.dnn, "updated SM policy data");
        } else {
            let document = json!({ "ueId": ue_id, "smPolicySnssaiData": snssai_data });
            self.store
                .put(SM_POLICY_COLLECTION, &filter, document)
                .await?;
            debug!(ue_id = %ue_id, snssai = %key, dnn = %update.dnn, "created SM policy data");
        }
        Ok(())
    }
}

/// Applies updates from `rx` in arrival order until `cancel` fires or the channel closes.
pub async fn run_sink(
    sink: Arc<dyn PolicyDataSink>,
    mut rx: mpsc::Receiver<SmPolicyUpdate>,
    cancel: CancellationToken,
    telemetry: Arc<dyn SyncTelemetry>,
) {
    loop {
        let update = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            update = rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };
        let result = sink.apply(&update).await;
        telemetry.on_policy_update(result.is_ok());
        if let Err(err) = result {
            warn!(imsi = %update.imsi, dnn = %update.dnn, error = %err, "failed to apply SM policy update");
        }
    }
    info!("SM policy sink shutting down");
}
