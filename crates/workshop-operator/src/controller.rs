//! Workshop reconciliation
//!
//! One pass brings tenant identities and then the GitOps control-plane to
//! the declared state. A step that is waiting on the cluster ends the pass
//! early with a short requeue; a converged pass requeues on the long
//! interval so drift is reverted. Deletion runs the identity teardown behind
//! a finalizer before the Workshop is allowed to go.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use workshop_common::credentials::{BcryptHasher, CredentialHasher};
use workshop_common::crd::{Workshop, WorkshopPhase, WorkshopSpec, WorkshopStatus};
use workshop_common::store::{KubeStore, ResourceStore};
use workshop_common::{proceed, Error, Progress, Result, IDENTITY_FINALIZER};
use workshop_gitops::GitOpsReconciler;
use workshop_identity::{IdentityManager, StagingArea};

use crate::client::{WorkshopClient, WorkshopClientImpl};
use crate::config::OperatorConfig;

/// Shared state handed to every reconcile call
pub struct Context {
    /// Status and finalizer access to Workshop objects
    pub workshops: Arc<dyn WorkshopClient>,
    /// GitOps control-plane sequence
    pub gitops: GitOpsReconciler,
    /// Tenant identity lifecycle
    pub identities: IdentityManager,
    /// Requeue intervals and staging settings
    pub config: OperatorConfig,
}

impl Context {
    /// Build a context talking to the cluster behind `client`
    pub fn new(client: Client, config: OperatorConfig) -> Result<Self> {
        let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
        let hasher: Arc<dyn CredentialHasher> = Arc::new(BcryptHasher::new(config.hash_cost)?);
        Ok(Self::from_parts(
            Arc::new(WorkshopClientImpl::new(client)),
            store,
            hasher,
            config,
        ))
    }

    /// Assemble a context from its collaborators
    pub fn from_parts(
        workshops: Arc<dyn WorkshopClient>,
        store: Arc<dyn ResourceStore>,
        hasher: Arc<dyn CredentialHasher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            workshops,
            gitops: GitOpsReconciler::new(store.clone(), hasher.clone()),
            identities: IdentityManager::new(
                store,
                hasher,
                StagingArea::new(config.staging_dir.clone()),
            ),
            config,
        }
    }
}

/// Reconcile a Workshop
#[instrument(skip(workshop, ctx), fields(workshop = %workshop.name_any()))]
pub async fn reconcile(workshop: Arc<Workshop>, ctx: Arc<Context>) -> Result<Action> {
    let name = workshop.name_any();

    if workshop.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&workshop, &ctx).await;
    }

    if let Err(e) = workshop.spec.validate(&name) {
        warn!(error = %e, "workshop validation failed");
        update_status(&workshop, &ctx, WorkshopPhase::Failed, Some(e.to_string())).await?;
        return Ok(Action::await_change());
    }

    if !has_finalizer(&workshop) {
        info!("adding identity finalizer");
        ctx.workshops.add_finalizer(&name, IDENTITY_FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    info!(tenants = workshop.spec.users.count, "reconciling workshop");
    match converge(&workshop.spec, &ctx).await {
        Ok(Progress::Done) => {
            update_status(&workshop, &ctx, WorkshopPhase::Ready, None).await?;
            Ok(Action::requeue(ctx.config.ready_requeue))
        }
        Ok(Progress::Waiting { reason }) => {
            info!(%reason, "workshop waiting on cluster");
            update_status(&workshop, &ctx, WorkshopPhase::Provisioning, Some(reason)).await?;
            Ok(Action::requeue(ctx.config.waiting_requeue))
        }
        Err(e) => {
            if let Err(status_err) =
                update_status(&workshop, &ctx, WorkshopPhase::Failed, Some(e.to_string())).await
            {
                warn!(error = %status_err, "failed to record failure in status");
            }
            Err(e)
        }
    }
}

/// Requeue policy for failed passes
pub fn error_policy(workshop: Arc<Workshop>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        workshop = %workshop.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue)
    } else {
        Action::await_change()
    }
}

async fn converge(spec: &WorkshopSpec, ctx: &Context) -> Result<Progress> {
    proceed!(ctx.identities.reconcile_tenant_identities(spec).await?);
    ctx.gitops.reconcile_gitops_stack(spec).await
}

async fn handle_deletion(workshop: &Workshop, ctx: &Context) -> Result<Action> {
    let name = workshop.name_any();
    if !has_finalizer(workshop) {
        debug!("no finalizer, allowing deletion");
        return Ok(Action::await_change());
    }

    match ctx
        .identities
        .delete_tenant_identities(&workshop.spec)
        .await?
    {
        Progress::Done => {
            info!("tenant identities removed, releasing finalizer");
            ctx.workshops
                .remove_finalizer(&name, IDENTITY_FINALIZER)
                .await?;
            Ok(Action::await_change())
        }
        Progress::Waiting { reason } => {
            info!(%reason, "identity teardown waiting");
            Ok(Action::requeue(ctx.config.waiting_requeue))
        }
    }
}

fn has_finalizer(workshop: &Workshop) -> bool {
    workshop.finalizers().iter().any(|f| f == IDENTITY_FINALIZER)
}

/// Patch status unless it already says the same thing
async fn update_status(
    workshop: &Workshop,
    ctx: &Context,
    phase: WorkshopPhase,
    message: Option<String>,
) -> Result<()> {
    let current = workshop.status.clone().unwrap_or_default();
    let ready_tenants = match phase {
        WorkshopPhase::Ready => workshop.spec.users.count,
        _ => current.ready_tenants,
    };
    let status = WorkshopStatus {
        phase,
        message,
        ready_tenants,
        observed_generation: workshop.metadata.generation,
    };
    if status == current {
        debug!(%phase, "status unchanged");
        return Ok(());
    }
    ctx.workshops
        .patch_status(&workshop.name_any(), &status)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use rstest::rstest;
    use serde_json::json;
    use workshop_common::memory::{MemoryStore, StoreOp};
    use workshop_common::resource::{ResourceKind, ResourceRecord, ResourceRef};
    use workshop_common::StoreError;
    use workshop_gitops::desired::{argocd_server_handle, gitops_operator_handle};

    use crate::client::{status_patch, MockWorkshopClient};

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn workshop(spec: WorkshopSpec, finalized: bool) -> Workshop {
        let mut w = Workshop::new("gitops-101", spec);
        w.metadata.generation = Some(3);
        if finalized {
            w.metadata.finalizers = Some(vec![IDENTITY_FINALIZER.to_string()]);
        }
        w
    }

    fn cluster_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed(ResourceRecord::new(
            ResourceKind::OAuth,
            "cluster",
            None,
            BTreeMap::new(),
            json!({ "spec": { "identityProviders": [] } }),
        ));
        store.set_health(gitops_operator_handle(), 1, 1);
        store.set_health(argocd_server_handle(), 1, 1);
        store
    }

    #[derive(Clone, Default)]
    struct StatusCapture(Arc<Mutex<Vec<WorkshopStatus>>>);

    impl StatusCapture {
        fn last(&self) -> Option<WorkshopStatus> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    fn capturing_client() -> (MockWorkshopClient, StatusCapture) {
        let capture = StatusCapture::default();
        let sink = capture.clone();
        let mut client = MockWorkshopClient::new();
        client.expect_patch_status().returning(move |_, status| {
            sink.0.lock().unwrap().push(status.clone());
            Ok(())
        });
        (client, capture)
    }

    fn context(
        client: MockWorkshopClient,
        store: Arc<MemoryStore>,
        staging: &std::path::Path,
    ) -> Arc<Context> {
        let config = OperatorConfig {
            staging_dir: staging.to_path_buf(),
            hash_cost: 4,
            ..Default::default()
        };
        Arc::new(Context::from_parts(
            Arc::new(client),
            store,
            Arc::new(BcryptHasher::new(4).unwrap()),
            config,
        ))
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    #[tokio::test]
    async fn invalid_spec_fails_without_touching_the_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let (client, capture) = capturing_client();
        let ctx = context(client, store.clone(), dir.path());

        let mut spec = WorkshopSpec::sample();
        spec.users.password.clear();
        let action = reconcile(Arc::new(workshop(spec, true)), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert_eq!(status.phase, WorkshopPhase::Failed);
        assert!(status.message.unwrap().contains("password"));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn finalizer_is_added_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let mut client = MockWorkshopClient::new();
        client
            .expect_add_finalizer()
            .withf(|name, finalizer| name == "gitops-101" && finalizer == IDENTITY_FINALIZER)
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_patch_status().never();
        let ctx = context(client, store.clone(), dir.path());

        let action = reconcile(Arc::new(workshop(WorkshopSpec::sample(), false)), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn converged_workshop_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let (client, capture) = capturing_client();
        let ctx = context(client, store.clone(), dir.path());

        let action = reconcile(Arc::new(workshop(WorkshopSpec::sample(), true)), ctx.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(ctx.config.ready_requeue));
        let status = capture.last().unwrap();
        assert_eq!(status.phase, WorkshopPhase::Ready);
        assert_eq!(status.ready_tenants, 2);
        assert_eq!(status.observed_generation, Some(3));
        assert!(store.contains(&ResourceRef::cluster(ResourceKind::User, "user2")));
        assert!(store.contains(&ResourceRef::namespaced(
            ResourceKind::Secret,
            "argocd-default-cluster-config",
            "argocd"
        )));
    }

    #[tokio::test]
    async fn waiting_step_reports_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (client, capture) = capturing_client();
        let ctx = context(client, store.clone(), dir.path());

        let action = reconcile(Arc::new(workshop(WorkshopSpec::sample(), true)), ctx.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(ctx.config.waiting_requeue));
        let status = capture.last().unwrap();
        assert_eq!(status.phase, WorkshopPhase::Provisioning);
        assert!(status.message.unwrap().contains("OAuth"));
        assert_eq!(status.ready_tenants, 0);
        // Identities short-circuit the pass before the control-plane starts.
        assert_eq!(store.objects_of(ResourceKind::Subscription).len(), 0);
    }

    #[tokio::test]
    async fn ready_pass_clears_waiting_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let (client, capture) = capturing_client();
        let ctx = context(client, store, dir.path());

        let mut w = workshop(WorkshopSpec::sample(), true);
        w.status = Some(WorkshopStatus {
            phase: WorkshopPhase::Provisioning,
            message: Some("Deployment argocd/argocd-server is not ready".to_string()),
            ready_tenants: 0,
            observed_generation: Some(3),
        });
        reconcile(Arc::new(w), ctx).await.unwrap();

        let status = capture.last().unwrap();
        assert_eq!(status.phase, WorkshopPhase::Ready);
        assert_eq!(status.message, None);
        assert_eq!(status_patch(&status)["status"]["message"], serde_json::Value::Null);
        assert!(status_patch(&status)["status"]
            .as_object()
            .unwrap()
            .contains_key("message"));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_patched() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let mut client = MockWorkshopClient::new();
        client.expect_patch_status().never();
        let ctx = context(client, store, dir.path());

        let mut w = workshop(WorkshopSpec::sample(), true);
        w.status = Some(WorkshopStatus {
            phase: WorkshopPhase::Ready,
            message: None,
            ready_tenants: 2,
            observed_generation: Some(3),
        });
        let action = reconcile(Arc::new(w), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.ready_requeue));
    }

    #[tokio::test]
    async fn hard_error_is_recorded_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        store.fail_on(
            StoreOp::Create,
            ResourceKind::User,
            "",
            StoreError::Other("forbidden".into()),
        );
        let (client, capture) = capturing_client();
        let ctx = context(client, store, dir.path());

        let err = reconcile(Arc::new(workshop(WorkshopSpec::sample(), true)), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.store_reason(), Some("Other"));
        let status = capture.last().unwrap();
        assert_eq!(status.phase, WorkshopPhase::Failed);
        assert!(status.message.unwrap().contains("forbidden"));
    }

    #[tokio::test]
    async fn status_patch_failure_fails_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let mut client = MockWorkshopClient::new();
        client.expect_patch_status().returning(|name, _| {
            Err(Error::store(
                ResourceKind::Workshop,
                name,
                StoreError::Other("connection failed".into()),
            ))
        });
        let ctx = context(client, store, dir.path());

        let err = reconcile(Arc::new(workshop(WorkshopSpec::sample(), true)), ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection failed"));
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    fn deleting(spec: WorkshopSpec, finalized: bool) -> Arc<Workshop> {
        let mut w = workshop(spec, finalized);
        w.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        Arc::new(w)
    }

    #[tokio::test]
    async fn deletion_tears_down_identities_then_releases() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let (client, _) = capturing_client();
        let ctx = context(client, store.clone(), dir.path());
        reconcile(Arc::new(workshop(WorkshopSpec::sample(), true)), ctx)
            .await
            .unwrap();
        assert_eq!(store.objects_of(ResourceKind::User).len(), 2);

        let mut client = MockWorkshopClient::new();
        client
            .expect_remove_finalizer()
            .withf(|name, finalizer| name == "gitops-101" && finalizer == IDENTITY_FINALIZER)
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_patch_status().never();
        let ctx = context(client, store.clone(), dir.path());

        let action = reconcile(deleting(WorkshopSpec::sample(), true), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.objects_of(ResourceKind::User).is_empty());
        assert!(store.objects_of(ResourceKind::Identity).is_empty());
    }

    #[tokio::test]
    async fn deletion_without_finalizer_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        let mut client = MockWorkshopClient::new();
        client.expect_remove_finalizer().never();
        let ctx = context(client, store.clone(), dir.path());

        let action = reconcile(deleting(WorkshopSpec::sample(), false), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_teardown_keeps_the_finalizer() {
        let dir = tempfile::tempdir().unwrap();
        let store = cluster_store();
        store.fail_on(
            StoreOp::Delete,
            ResourceKind::User,
            "",
            StoreError::Other("timeout".into()),
        );
        let mut client = MockWorkshopClient::new();
        client.expect_remove_finalizer().never();
        let ctx = context(client, store, dir.path());

        assert!(reconcile(deleting(WorkshopSpec::sample(), true), ctx)
            .await
            .is_err());
    }

    // =========================================================================
    // Error policy
    // =========================================================================

    #[rstest]
    #[case::store(
        Error::store(ResourceKind::Secret, "argocd-secret", StoreError::Other("timeout".into())),
        true
    )]
    #[case::staging(Error::staging("/tmp/x", "disk full"), true)]
    #[case::validation(Error::validation("bad spec"), false)]
    #[case::credential(Error::credential("user1", "bad cost"), false)]
    fn error_policy_requeues_only_retryable_errors(#[case] error: Error, #[case] requeue: bool) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(MockWorkshopClient::new(), Arc::new(MemoryStore::new()), dir.path());
        let w = Arc::new(workshop(WorkshopSpec::sample(), true));

        let action = error_policy(w, &error, ctx.clone());
        let expected = if requeue {
            Action::requeue(ctx.config.error_requeue)
        } else {
            Action::await_change()
        };
        assert_eq!(action, expected);
    }
}
