//! Tenant provisioning loop

use tracing::{debug, info};

use workshop_common::converge::ConvergenceDriver;
use workshop_common::credentials::CredentialHasher;
use workshop_common::crd::WorkshopSpec;
use workshop_common::tenant::tenants;
use workshop_common::Result;

use crate::aggregate::AggregateState;
use crate::desired::tenant_records;

/// Salt context of the shared Argo CD account hash
pub const ACCOUNTS_HASH_CONTEXT: &str = "argocd-accounts";

/// Converge every tenant's records and fold their fragments.
///
/// Tenants run in ascending index order. The first hard error stops the
/// loop; the next pass redoes converged tenants as no-ops. The aggregate is
/// built from scratch each time and is only returned when every tenant
/// converged.
pub async fn provision_tenants(
    spec: &WorkshopSpec,
    driver: &ConvergenceDriver,
    hasher: &dyn CredentialHasher,
) -> Result<AggregateState> {
    let credential = hasher.hash(ACCOUNTS_HASH_CONTEXT, &spec.users.password)?;
    let git_server = spec.gitops.git_server.as_str();

    let mut aggregate = AggregateState::new();
    let mut changed = 0usize;
    for tenant in tenants(spec) {
        for record in tenant_records(&tenant, git_server) {
            if driver.apply(&record).await?.changed() {
                changed += 1;
            }
        }
        debug!(tenant = %tenant.username, namespace = %tenant.namespace, "tenant converged");
        aggregate.add_tenant(&tenant, git_server, &credential);
    }

    info!(
        tenants = aggregate.tenant_count(),
        changed, "tenant records converged"
    );
    Ok(aggregate)
}
