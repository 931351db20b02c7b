//! Identity lifecycle manager

use std::sync::Arc;

use tracing::{debug, info, instrument};

use workshop_common::converge::ConvergenceDriver;
use workshop_common::credentials::CredentialHasher;
use workshop_common::crd::WorkshopSpec;
use workshop_common::store::ResourceStore;
use workshop_common::tenant::{tenants, Tenant};
use workshop_common::{proceed, Progress, Result};

use crate::bundle::{bundle_secret, bundle_secret_ref, CredentialBundle, StagingArea};
use crate::provider::ensure_identity_provider;
use crate::stage::{identity, identity_mapping, infra_binding, user, IdentityStage};

/// Creates and removes tenant identities and registers the login provider
pub struct IdentityManager {
    driver: ConvergenceDriver,
    hasher: Arc<dyn CredentialHasher>,
    staging: StagingArea,
}

impl IdentityManager {
    /// Create a manager over the given store
    pub fn new(
        store: Arc<dyn ResourceStore>,
        hasher: Arc<dyn CredentialHasher>,
        staging: StagingArea,
    ) -> Self {
        Self {
            driver: ConvergenceDriver::new(store),
            hasher,
            staging,
        }
    }

    /// Bring every tenant to `Mapped`, remove tenants past the configured
    /// count, publish the credential bundle and register the provider
    #[instrument(skip(self, spec), fields(tenants = spec.users.count))]
    pub async fn reconcile_tenant_identities(&self, spec: &WorkshopSpec) -> Result<Progress> {
        for tenant in tenants(spec) {
            proceed!(self.provision(&tenant).await?);
        }
        let removed = self.remove_beyond(spec).await?;
        if removed > 0 {
            info!(removed, "removed identities of tenants past the configured count");
        }

        self.publish_bundle(spec).await?;
        proceed!(ensure_identity_provider(&self.driver).await?);

        info!("tenant identities converged");
        Ok(Progress::Done)
    }

    /// Walk every tenant, including leftovers past the configured count,
    /// back to `Absent` and delete the credential bundle
    #[instrument(skip(self, spec), fields(tenants = spec.users.count))]
    pub async fn delete_tenant_identities(&self, spec: &WorkshopSpec) -> Result<Progress> {
        for tenant in tenants(spec) {
            self.remove(&tenant).await?;
        }
        self.remove_beyond(spec).await?;
        self.driver.ensure_absent(&bundle_secret_ref()).await?;

        info!("tenant identities deleted");
        Ok(Progress::Done)
    }

    async fn provision(&self, tenant: &Tenant) -> Result<Progress> {
        let mut stage = IdentityStage::Absent;
        while let Some(next) = stage.advance() {
            let record = match next {
                IdentityStage::Absent => break,
                IdentityStage::Created => user(tenant),
                IdentityStage::Bound => infra_binding(tenant),
                IdentityStage::Identified => {
                    let Some(uid) = self.user_uid(tenant).await? else {
                        return Ok(Progress::waiting(format!(
                            "user {} has no uid yet",
                            tenant.username
                        )));
                    };
                    identity(tenant, &uid)
                }
                IdentityStage::Mapped => identity_mapping(tenant),
            };
            self.driver.apply(&record).await?;
            stage = next;
        }
        debug!(tenant = %tenant.username, ?stage, "identity provisioned");
        Ok(Progress::Done)
    }

    async fn remove(&self, tenant: &Tenant) -> Result<()> {
        let mut stage = IdentityStage::Mapped;
        loop {
            if let Some(reference) = stage.object(tenant) {
                self.driver.ensure_absent(&reference).await?;
            }
            match stage.retreat() {
                Some(prev) => stage = prev,
                None => break,
            }
        }
        debug!(tenant = %tenant.username, "identity removed");
        Ok(())
    }

    /// Remove tenants `N+1, N+2, ...` until the first one whose user is absent
    async fn remove_beyond(&self, spec: &WorkshopSpec) -> Result<u32> {
        let mut removed = 0;
        let mut next = spec.users.count.checked_add(1);
        while let Some(id) = next {
            let tenant = Tenant::new(spec, id);
            let Some(user_ref) = IdentityStage::Created.object(&tenant) else {
                break;
            };
            if self.driver.lookup(&user_ref).await?.is_none() {
                break;
            }
            self.remove(&tenant).await?;
            removed += 1;
            next = id.checked_add(1);
        }
        Ok(removed)
    }

    async fn user_uid(&self, tenant: &Tenant) -> Result<Option<String>> {
        let Some(reference) = IdentityStage::Created.object(tenant) else {
            return Ok(None);
        };
        Ok(self
            .driver
            .lookup(&reference)
            .await?
            .and_then(|u| u.metadata.uid))
    }

    async fn publish_bundle(&self, spec: &WorkshopSpec) -> Result<()> {
        let bundle = CredentialBundle::build(spec, self.hasher.as_ref())?;
        let path = self.staging.stage(&bundle.render()).await?;

        let published = async {
            let contents = self.staging.read(&path).await?;
            self.driver.apply(&bundle_secret(&contents)).await
        }
        .await;
        self.staging.discard(&path).await;

        let outcome = published?;
        debug!(entries = bundle.len(), ?outcome, "credential bundle published");
        Ok(())
    }
}
