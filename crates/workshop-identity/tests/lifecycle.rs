//! Identity lifecycle scenarios against the in-memory store

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use workshop_common::credentials::BcryptHasher;
use workshop_common::crd::WorkshopSpec;
use workshop_common::memory::{MemoryStore, StoreOp};
use workshop_common::resource::{ResourceKind, ResourceRecord, ResourceRef};
use workshop_common::{Progress, StoreError, IDENTITY_PROVIDER_NAME, OPENSHIFT_CONFIG_NAMESPACE};
use workshop_identity::provider::oauth_ref;
use workshop_identity::{IdentityManager, StagingArea};

// =============================================================================
// Fixtures
// =============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    manager: IdentityManager,
    staging: TempDir,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.seed(ResourceRecord::new(
        ResourceKind::OAuth,
        "cluster",
        None,
        BTreeMap::new(),
        json!({ "spec": { "identityProviders": [{ "name": "kube-admin", "type": "HTPasswd" }] } }),
    ));
    let staging = tempfile::tempdir().unwrap();
    let manager = IdentityManager::new(
        store.clone(),
        Arc::new(BcryptHasher::new(4).unwrap()),
        StagingArea::new(staging.path()),
    );
    Harness {
        store,
        manager,
        staging,
    }
}

fn staged_files(h: &Harness) -> usize {
    std::fs::read_dir(h.staging.path()).unwrap().count()
}

fn spec(n: u32) -> WorkshopSpec {
    let mut spec = WorkshopSpec::sample();
    spec.users.count = n;
    spec
}

fn user(name: &str) -> ResourceRef {
    ResourceRef::cluster(ResourceKind::User, name)
}

fn bundle_ref() -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Secret,
        IDENTITY_PROVIDER_NAME,
        OPENSHIFT_CONFIG_NAMESPACE,
    )
}

fn bundle_lines(store: &MemoryStore) -> Vec<String> {
    store
        .object(&bundle_ref())
        .unwrap()
        .field("/stringData/htpasswd")
        .unwrap()
        .as_str()
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Reconcile
// =============================================================================

#[tokio::test]
async fn every_tenant_reaches_mapped() {
    let h = harness();
    let progress = h
        .manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();
    assert_eq!(progress, Progress::Done);

    for name in ["user1", "user2"] {
        assert!(h.store.contains(&user(name)));
        assert!(h.store.contains(&ResourceRef::namespaced(
            ResourceKind::RoleBinding,
            format!("{name}-workshop-infra"),
            "workshop-infra"
        )));
        let identity = format!("htpass-workshop-users:{name}");
        assert!(h
            .store
            .contains(&ResourceRef::cluster(ResourceKind::Identity, &identity)));
        assert!(h.store.contains(&ResourceRef::cluster(
            ResourceKind::UserIdentityMapping,
            &identity
        )));
    }
}

#[tokio::test]
async fn bundle_published_and_staging_file_removed() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(3))
        .await
        .unwrap();

    let lines = bundle_lines(&h.store);
    assert_eq!(lines.len(), 3);
    for (i, line) in lines.iter().enumerate() {
        let (name, hash) = line.split_once(':').unwrap();
        assert_eq!(name, format!("user{}", i + 1));
        assert!(bcrypt::verify("openshift", hash).unwrap());
    }
    assert_eq!(staged_files(&h), 0);
}

#[tokio::test]
async fn staging_file_removed_even_when_publish_fails() {
    let h = harness();
    h.store.fail_on(
        StoreOp::Create,
        ResourceKind::Secret,
        IDENTITY_PROVIDER_NAME,
        StoreError::Other("etcd unavailable".into()),
    );

    let err = h
        .manager
        .reconcile_tenant_identities(&spec(1))
        .await
        .unwrap_err();
    assert_eq!(err.store_reason(), Some("Other"));
    assert_eq!(staged_files(&h), 0);
}

#[tokio::test]
async fn provider_patch_is_idempotent() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();
    h.manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();

    let providers = h
        .store
        .object(&oauth_ref())
        .unwrap()
        .field("/spec/identityProviders")
        .unwrap()
        .as_array()
        .unwrap()
        .clone();
    let ours = providers
        .iter()
        .filter(|p| p["name"] == json!(IDENTITY_PROVIDER_NAME))
        .count();
    assert_eq!(ours, 1);
    assert_eq!(providers[0]["name"], json!(IDENTITY_PROVIDER_NAME));
    assert_eq!(providers[1]["name"], json!("kube-admin"));
}

#[tokio::test]
async fn second_reconcile_changes_nothing() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();
    h.store.clear_calls();

    h.manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();
    assert_eq!(h.store.count(StoreOp::Update), 0);
    assert_eq!(h.store.count(StoreOp::Patch), 0);
    assert_eq!(h.store.count(StoreOp::Delete), 0);
}

#[tokio::test]
async fn missing_oauth_waits_after_identities_exist() {
    let store = Arc::new(MemoryStore::new());
    let staging = tempfile::tempdir().unwrap();
    let manager = IdentityManager::new(
        store.clone(),
        Arc::new(BcryptHasher::new(4).unwrap()),
        StagingArea::new(staging.path()),
    );

    let progress = manager
        .reconcile_tenant_identities(&spec(1))
        .await
        .unwrap();
    assert!(progress.should_requeue());
    assert!(store.contains(&user("user1")));
    assert!(store.contains(&bundle_ref()));
}

#[tokio::test]
async fn scale_down_removes_trailing_tenants() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(3))
        .await
        .unwrap();
    h.manager
        .reconcile_tenant_identities(&spec(1))
        .await
        .unwrap();

    assert!(h.store.contains(&user("user1")));
    assert!(!h.store.contains(&user("user2")));
    assert!(!h.store.contains(&user("user3")));
    assert!(h.store.objects_of(ResourceKind::Identity).len() == 1);
    assert_eq!(bundle_lines(&h.store).len(), 1);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn deletion_walks_each_tenant_in_reverse_dependency_order() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(2))
        .await
        .unwrap();
    h.store.clear_calls();

    let progress = h.manager.delete_tenant_identities(&spec(2)).await.unwrap();
    assert_eq!(progress, Progress::Done);

    let deletes: Vec<_> = h
        .store
        .calls_of(StoreOp::Delete)
        .into_iter()
        .map(|c| (c.kind, c.name))
        .collect();
    let expected: Vec<(ResourceKind, String)> = ["user1", "user2"]
        .iter()
        .flat_map(|u| {
            [
                (
                    ResourceKind::UserIdentityMapping,
                    format!("htpass-workshop-users:{u}"),
                ),
                (ResourceKind::Identity, format!("htpass-workshop-users:{u}")),
                (ResourceKind::RoleBinding, format!("{u}-workshop-infra")),
                (ResourceKind::User, u.to_string()),
            ]
        })
        .chain([(ResourceKind::Secret, IDENTITY_PROVIDER_NAME.to_string())])
        .collect();
    assert_eq!(deletes, expected);
    assert!(h.store.objects_of(ResourceKind::User).is_empty());
}

#[tokio::test]
async fn deletion_of_absent_identities_succeeds() {
    let h = harness();
    let progress = h.manager.delete_tenant_identities(&spec(2)).await.unwrap();
    assert_eq!(progress, Progress::Done);
    assert_eq!(h.store.count(StoreOp::Delete), 9);
}

#[tokio::test]
async fn deletion_also_removes_leftovers_past_count() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(3))
        .await
        .unwrap();

    h.manager.delete_tenant_identities(&spec(1)).await.unwrap();
    assert!(h.store.objects_of(ResourceKind::User).is_empty());
    assert!(h
        .store
        .objects_of(ResourceKind::UserIdentityMapping)
        .is_empty());
}

#[tokio::test]
async fn deletion_failure_is_surfaced() {
    let h = harness();
    h.manager
        .reconcile_tenant_identities(&spec(1))
        .await
        .unwrap();
    h.store.fail_on(
        StoreOp::Delete,
        ResourceKind::Identity,
        "",
        StoreError::Other("forbidden".into()),
    );

    assert!(h.manager.delete_tenant_identities(&spec(1)).await.is_err());
    assert!(h.store.contains(&user("user1")));
}
