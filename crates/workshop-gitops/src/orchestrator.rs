//! GitOps reconciliation orchestrator
//!
//! Runs the control-plane sequence for one Workshop:
//!
//! 1. Subscription for the GitOps operator (and install-plan approval when a
//!    version is pinned)
//! 2. Wait for the operator deployment
//! 3. Shared `argocd` namespace
//! 4. Tenant loop (namespace, AppProject, Role, RoleBinding per tenant)
//! 5. Aggregate secret and configmap
//! 6. Control-plane instance carrying the full policy document
//! 7. Wait for the control-plane server
//! 8. Default cluster-scope record for the tenant namespaces
//!
//! A waiting step ends the pass; later steps assume earlier ones converged.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, instrument};

use workshop_common::converge::ConvergenceDriver;
use workshop_common::credentials::CredentialHasher;
use workshop_common::crd::WorkshopSpec;
use workshop_common::labels::LabelSet;
use workshop_common::readiness::ReadinessGate;
use workshop_common::resource::{ResourceKind, ResourceRecord};
use workshop_common::store::ResourceStore;
use workshop_common::{proceed, Error, Progress, Result, ARGOCD_NAMESPACE, OPERATORS_NAMESPACE};

use crate::desired::{
    argocd_cm, argocd_instance, argocd_secret, argocd_server_handle, default_cluster_config,
    gitops_operator_handle, namespace, subscription,
};
use crate::tenants::provision_tenants;

/// Reconciles the shared GitOps control-plane and tenant projects
pub struct GitOpsReconciler {
    driver: ConvergenceDriver,
    gate: ReadinessGate,
    hasher: Arc<dyn CredentialHasher>,
}

impl GitOpsReconciler {
    /// Create a reconciler over the given store
    pub fn new(store: Arc<dyn ResourceStore>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            driver: ConvergenceDriver::new(store.clone()),
            gate: ReadinessGate::new(store),
            hasher,
        }
    }

    /// Run the full control-plane sequence once
    #[instrument(skip(self, spec), fields(tenants = spec.users.count))]
    pub async fn reconcile_gitops_stack(&self, spec: &WorkshopSpec) -> Result<Progress> {
        if !spec.gitops.enabled {
            debug!("gitops disabled, skipping");
            return Ok(Progress::Done);
        }

        self.driver.apply(&subscription(spec)).await?;
        proceed!(self.approve_install_plan(spec).await?);
        proceed!(self.gate.require(&gitops_operator_handle()).await?);

        self.driver
            .apply(&namespace(ARGOCD_NAMESPACE, &LabelSet::gitops()))
            .await?;

        let aggregate = provision_tenants(spec, &self.driver, self.hasher.as_ref()).await?;

        self.driver.apply(&argocd_secret(&aggregate)).await?;
        self.driver.apply(&argocd_cm(&aggregate)).await?;
        self.driver.apply(&argocd_instance(&aggregate)).await?;

        proceed!(self.gate.require(&argocd_server_handle()).await?);

        self.driver
            .apply(&default_cluster_config(&aggregate))
            .await?;

        info!(
            namespaces = %aggregate.namespace_list(),
            "gitops stack converged"
        );
        Ok(Progress::Done)
    }

    /// Approve the install plan of a pinned ClusterServiceVersion.
    ///
    /// Without a pin the subscription approves automatically. With one, the
    /// pass waits until OLM has created a plan listing the version.
    async fn approve_install_plan(&self, spec: &WorkshopSpec) -> Result<Progress> {
        let Some(csv) = spec.gitops.cluster_service_version.as_deref() else {
            return Ok(Progress::Done);
        };

        let plans = self
            .driver
            .store()
            .list(ResourceKind::InstallPlan, Some(OPERATORS_NAMESPACE.to_string()))
            .await
            .map_err(|e| Error::store(ResourceKind::InstallPlan, csv, e))?;

        let Some(plan) = plans.iter().find(|p| lists_csv(p, csv)) else {
            info!(csv, "waiting for subscription to create install plan");
            return Ok(Progress::waiting(format!("no install plan for {csv} yet")));
        };

        if plan.field("/spec/approved").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(Progress::Done);
        }

        let reference = plan.reference();
        self.driver
            .store()
            .patch_merge(&reference, &json!({ "spec": { "approved": true } }))
            .await
            .map_err(|e| Error::store(ResourceKind::InstallPlan, plan.name(), e))?;
        info!(csv, plan = %plan.name(), "approved install plan");
        Ok(Progress::Done)
    }
}

fn lists_csv(plan: &ResourceRecord, csv: &str) -> bool {
    plan.field("/spec/clusterServiceVersionNames")
        .and_then(|v| v.as_array())
        .is_some_and(|names| names.iter().any(|n| n.as_str() == Some(csv)))
}
