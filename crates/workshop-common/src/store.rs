//! Resource store abstraction
//!
//! The reconcilers only ever talk to the cluster through [`ResourceStore`].
//! Production code uses [`KubeStore`], which moves [`ResourceRecord`]s through
//! the API server as `DynamicObject`s; tests use a mock or the in-memory store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::TypeMeta;
use kube::{Client, Config};
use serde_json::{Map, Value};
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::error::StoreError;
use crate::resource::{ResourceKind, ResourceRecord, ResourceRef};
use crate::{Error, FIELD_MANAGER};

/// Point-in-time health of a rollout-style object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObservedState {
    /// Declared replica count
    pub desired: i32,
    /// Replicas reported available
    pub available: i32,
}

impl ObservedState {
    /// Read `spec.replicas` (default 1) and `status.availableReplicas` (default 0)
    pub fn from_body(body: &Value) -> Self {
        let read = |ptr: &str| {
            body.pointer(ptr)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
        };
        Self {
            desired: read("/spec/replicas").unwrap_or(1),
            available: read("/status/availableReplicas").unwrap_or(0),
        }
    }
}

/// Typed CRUD access to the cluster
///
/// Every method reports a classified [`StoreError`]; interpreting the benign
/// classes is left to the caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a new object; `AlreadyExists` if one with the same identity exists
    async fn create(&self, record: &ResourceRecord) -> Result<(), StoreError>;

    /// Fetch an object; `NotFound` if absent
    async fn get(&self, reference: &ResourceRef) -> Result<ResourceRecord, StoreError>;

    /// Replace an object previously read with [`ResourceStore::get`]
    async fn update(&self, record: &ResourceRecord) -> Result<(), StoreError>;

    /// Delete an object; `NotFound` if absent
    async fn delete(&self, reference: &ResourceRef) -> Result<(), StoreError>;

    /// List objects of a kind, optionally restricted to a namespace
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<String>,
    ) -> Result<Vec<ResourceRecord>, StoreError>;

    /// Apply a JSON merge patch to an object
    async fn patch_merge(&self, reference: &ResourceRef, patch: &Value) -> Result<(), StoreError>;

    /// Read the declared and available replica counts of an object
    async fn query_health(&self, reference: &ResourceRef) -> Result<ObservedState, StoreError>;
}

// =============================================================================
// KubeStore
// =============================================================================

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn create(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        trace!(kind = %record.kind, name = %record.name(), "create");
        let api = self.api(record.kind, record.namespace());
        api.create(&PostParams::default(), &to_dynamic(record))
            .await?;
        Ok(())
    }

    async fn get(&self, reference: &ResourceRef) -> Result<ResourceRecord, StoreError> {
        let api = self.api(reference.kind, reference.namespace.as_deref());
        let obj = api.get(&reference.name).await?;
        Ok(from_dynamic(reference.kind, obj))
    }

    async fn update(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        trace!(kind = %record.kind, name = %record.name(), "update");
        let api = self.api(record.kind, record.namespace());
        api.replace(record.name(), &PostParams::default(), &to_dynamic(record))
            .await?;
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<(), StoreError> {
        trace!(%reference, "delete");
        let api = self.api(reference.kind, reference.namespace.as_deref());
        api.delete(&reference.name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<String>,
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        let api = self.api(kind, namespace.as_deref());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| from_dynamic(kind, obj))
            .collect())
    }

    async fn patch_merge(&self, reference: &ResourceRef, patch: &Value) -> Result<(), StoreError> {
        trace!(%reference, "merge patch");
        let api = self.api(reference.kind, reference.namespace.as_deref());
        api.patch(
            &reference.name,
            &PatchParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PatchParams::default() },
            &Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }

    async fn query_health(&self, reference: &ResourceRef) -> Result<ObservedState, StoreError> {
        let record = self.get(reference).await?;
        Ok(ObservedState::from_body(&record.body))
    }
}

/// Convert a record into a dynamic object for the API
pub fn to_dynamic(record: &ResourceRecord) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: record.kind.api_version(),
            kind: record.kind.kind().to_string(),
        }),
        metadata: record.metadata.clone(),
        data: record.body.clone(),
    }
}

/// Convert a dynamic object from the API into a record.
///
/// Secret `data` values that decode to UTF-8 are moved into `stringData` so
/// they compare against what the operator writes.
pub fn from_dynamic(kind: ResourceKind, obj: DynamicObject) -> ResourceRecord {
    let mut body = obj.data;
    if kind == ResourceKind::Secret {
        project_secret_data(&mut body);
    }
    ResourceRecord {
        kind,
        metadata: obj.metadata,
        body,
    }
}

fn project_secret_data(body: &mut Value) {
    let Some(Value::Object(data)) = body.get_mut("data") else {
        return;
    };

    let mut projected = Map::new();
    data.retain(|key, value| {
        let decoded = value
            .as_str()
            .and_then(|encoded| STANDARD.decode(encoded).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match decoded {
            Some(text) => {
                projected.insert(key.clone(), Value::String(text));
                false
            }
            None => true,
        }
    });
    let data_empty = data.is_empty();

    if let Value::Object(root) = body {
        if data_empty {
            root.remove("data");
        }
        if !projected.is_empty() {
            let string_data = root
                .entry("stringData")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(existing) = string_data {
                for (k, v) in projected {
                    existing.entry(k).or_insert(v);
                }
            }
        }
    }
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
