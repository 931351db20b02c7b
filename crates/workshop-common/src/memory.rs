//! In-memory [`ResourceStore`] for tests
//!
//! Records every call in order, assigns resource versions and UIDs, applies
//! JSON merge patches, and supports failure injection and health overrides.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StoreError;
use crate::resource::{ResourceKind, ResourceRecord, ResourceRef};
use crate::store::{ObservedState, ResourceStore};

/// Store operation, as recorded in the call log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// `create`
    Create,
    /// `get`
    Get,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `list`
    List,
    /// `patch_merge`
    Patch,
    /// `query_health`
    Health,
}

/// One recorded store call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    /// Operation
    pub op: StoreOp,
    /// Kind targeted
    pub kind: ResourceKind,
    /// Object name (empty for list)
    pub name: String,
}

type Key = (ResourceKind, Option<String>, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, ResourceRecord>,
    health: BTreeMap<ResourceRef, ObservedState>,
    failures: Vec<(StoreOp, ResourceKind, String, StoreError)>,
    calls: Vec<StoreCall>,
    counter: u64,
}

impl Inner {
    fn record(&mut self, op: StoreOp, kind: ResourceKind, name: &str) -> Result<(), StoreError> {
        self.calls.push(StoreCall {
            op,
            kind,
            name: name.to_string(),
        });
        match self
            .failures
            .iter()
            .find(|(o, k, n, _)| *o == op && *k == kind && (n.is_empty() || n == name))
        {
            Some((_, _, _, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

fn key_of(reference: &ResourceRef) -> Key {
    (
        reference.kind,
        reference.namespace.clone(),
        reference.name.clone(),
    )
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, without logging a call
    pub fn seed(&self, mut record: ResourceRecord) {
        let mut inner = self.inner.lock();
        let n = inner.next();
        record.metadata.resource_version = Some(n.to_string());
        record.metadata.uid.get_or_insert_with(|| format!("uid-{n}"));
        inner.objects.insert(key_of(&record.reference()), record);
    }

    /// Current copy of an object
    pub fn object(&self, reference: &ResourceRef) -> Option<ResourceRecord> {
        self.inner.lock().objects.get(&key_of(reference)).cloned()
    }

    /// Whether an object exists
    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.inner.lock().objects.contains_key(&key_of(reference))
    }

    /// All stored objects of one kind
    pub fn objects_of(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        self.inner
            .lock()
            .objects
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Override the health reported for a handle
    pub fn set_health(&self, reference: ResourceRef, desired: i32, available: i32) {
        self.inner
            .lock()
            .health
            .insert(reference, ObservedState { desired, available });
    }

    /// Make `op` on `kind`/`name` fail; an empty name matches every object
    pub fn fail_on(&self, op: StoreOp, kind: ResourceKind, name: &str, err: StoreError) {
        self.inner
            .lock()
            .failures
            .push((op, kind, name.to_string(), err));
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Call log in order
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    /// Calls of one operation, in order
    pub fn calls_of(&self, op: StoreOp) -> Vec<StoreCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Number of calls of one operation
    pub fn count(&self, op: StoreOp) -> usize {
        self.calls_of(op).len()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Create, record.kind, record.name())?;
        let key = key_of(&record.reference());
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let n = inner.next();
        let mut stored = record.clone();
        stored.metadata.resource_version = Some(n.to_string());
        stored.metadata.uid = Some(format!("uid-{n}"));
        inner.objects.insert(key, stored);
        Ok(())
    }

    async fn get(&self, reference: &ResourceRef) -> Result<ResourceRecord, StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Get, reference.kind, &reference.name)?;
        inner
            .objects
            .get(&key_of(reference))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Update, record.kind, record.name())?;
        let key = key_of(&record.reference());
        let current_version = match inner.objects.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(StoreError::NotFound),
        };
        if record.metadata.resource_version.is_some()
            && record.metadata.resource_version != current_version
        {
            return Err(StoreError::Conflict(format!(
                "resourceVersion {:?} is stale",
                record.metadata.resource_version
            )));
        }
        let n = inner.next();
        let mut stored = record.clone();
        stored.metadata.resource_version = Some(n.to_string());
        inner.objects.insert(key, stored);
        Ok(())
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Delete, reference.kind, &reference.name)?;
        inner
            .objects
            .remove(&key_of(reference))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<String>,
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::List, kind, "")?;
        Ok(inner
            .objects
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| namespace.is_none() || r.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn patch_merge(&self, reference: &ResourceRef, patch: &Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Patch, reference.kind, &reference.name)?;
        let n = inner.next();
        let Some(record) = inner.objects.get_mut(&key_of(reference)) else {
            return Err(StoreError::NotFound);
        };

        let mut body = patch.clone();
        if let Some(meta_patch) = body.as_object_mut().and_then(|m| m.remove("metadata")) {
            let mut meta = serde_json::to_value(&record.metadata)
                .map_err(|e| StoreError::Other(e.to_string()))?;
            merge_patch(&mut meta, &meta_patch);
            record.metadata =
                serde_json::from_value(meta).map_err(|e| StoreError::Other(e.to_string()))?;
        }
        merge_patch(&mut record.body, &body);
        record.metadata.resource_version = Some(n.to_string());
        Ok(())
    }

    async fn query_health(&self, reference: &ResourceRef) -> Result<ObservedState, StoreError> {
        let mut inner = self.inner.lock();
        inner.record(StoreOp::Health, reference.kind, &reference.name)?;
        if let Some(state) = inner.health.get(reference) {
            return Ok(*state);
        }
        inner
            .objects
            .get(&key_of(reference))
            .map(|r| ObservedState::from_body(&r.body))
            .ok_or(StoreError::NotFound)
    }
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str) -> ResourceRecord {
        ResourceRecord::new(
            ResourceKind::User,
            name,
            None,
            BTreeMap::new(),
            json!({ "fullName": name }),
        )
    }

    #[tokio::test]
    async fn create_then_duplicate() {
        let store = MemoryStore::new();
        store.create(&user("user1")).await.unwrap();
        assert_eq!(
            store.create(&user("user1")).await,
            Err(StoreError::AlreadyExists)
        );
        let got = store
            .get(&ResourceRef::cluster(ResourceKind::User, "user1"))
            .await
            .unwrap();
        assert!(got.metadata.uid.is_some());
        assert_eq!(store.count(StoreOp::Create), 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        store.create(&user("user1")).await.unwrap();
        let r = ResourceRef::cluster(ResourceKind::User, "user1");
        let first = store.get(&r).await.unwrap();
        let second = store.get(&r).await.unwrap();

        store.update(&first).await.unwrap();
        assert!(matches!(
            store.update(&second).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn injected_failure_is_returned_and_logged() {
        let store = MemoryStore::new();
        store.fail_on(
            StoreOp::Create,
            ResourceKind::User,
            "",
            StoreError::Other("boom".into()),
        );
        assert!(matches!(
            store.create(&user("user1")).await,
            Err(StoreError::Other(_))
        ));
        assert_eq!(store.calls().len(), 1);
        assert!(!store.contains(&ResourceRef::cluster(ResourceKind::User, "user1")));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let r = ResourceRef::cluster(ResourceKind::User, "ghost");
        assert_eq!(store.delete(&r).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn health_override_wins_over_body() {
        let store = MemoryStore::new();
        let r = ResourceRef::namespaced(ResourceKind::Deployment, "argocd-server", "argocd");
        assert_eq!(store.query_health(&r).await, Err(StoreError::NotFound));
        store.set_health(r.clone(), 1, 1);
        assert_eq!(
            store.query_health(&r).await.unwrap(),
            ObservedState {
                desired: 1,
                available: 1
            }
        );
    }

    #[tokio::test]
    async fn merge_patch_replaces_lists_and_labels() {
        let store = MemoryStore::new();
        store.seed(ResourceRecord::new(
            ResourceKind::OAuth,
            "cluster",
            None,
            BTreeMap::new(),
            json!({ "spec": { "identityProviders": [{ "name": "a" }], "tokenConfig": {} } }),
        ));
        let r = ResourceRef::cluster(ResourceKind::OAuth, "cluster");
        store
            .patch_merge(
                &r,
                &json!({
                    "metadata": { "labels": { "x": "y" } },
                    "spec": { "identityProviders": [{ "name": "b" }, { "name": "a" }] }
                }),
            )
            .await
            .unwrap();
        let got = store.object(&r).unwrap();
        assert_eq!(
            got.field("/spec/identityProviders"),
            Some(&json!([{ "name": "b" }, { "name": "a" }]))
        );
        assert_eq!(got.field("/spec/tokenConfig"), Some(&json!({})));
        assert_eq!(got.labels().get("x").map(String::as_str), Some("y"));
    }

    #[test]
    fn merge_patch_null_removes() {
        let mut v = json!({ "a": 1, "b": { "c": 2 } });
        merge_patch(&mut v, &json!({ "a": null, "b": { "d": 3 } }));
        assert_eq!(v, json!({ "b": { "c": 2, "d": 3 } }));
    }
}
