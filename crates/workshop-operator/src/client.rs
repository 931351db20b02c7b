//! Access to the Workshop resource itself

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};

use workshop_common::crd::{Workshop, WorkshopStatus};
use workshop_common::resource::ResourceKind;
use workshop_common::{Error, Result, StoreError, FIELD_MANAGER};

/// Operations the controller performs on Workshop objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkshopClient: Send + Sync {
    /// Replace the status subresource
    async fn patch_status(&self, name: &str, status: &WorkshopStatus) -> Result<()>;

    /// Add a finalizer if it is not already present
    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer; a missing Workshop is not an error
    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;
}

/// [`WorkshopClient`] backed by the Kubernetes API
pub struct WorkshopClientImpl {
    client: Client,
}

impl WorkshopClientImpl {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Workshop> {
        Api::all(self.client.clone())
    }
}

fn store_error(name: &str, err: kube::Error) -> Error {
    Error::store(ResourceKind::Workshop, name, StoreError::from(err))
}

async fn patch_finalizers(api: &Api<Workshop>, name: &str, finalizers: Vec<String>) -> Result<()> {
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| store_error(name, e))?;
    Ok(())
}

/// Merge patch replacing every status field; unset optionals are sent as
/// null so a merge removes what an earlier pass wrote
pub fn status_patch(status: &WorkshopStatus) -> Value {
    json!({
        "status": {
            "phase": status.phase,
            "message": status.message,
            "readyTenants": status.ready_tenants,
            "observedGeneration": status.observed_generation,
        }
    })
}

#[async_trait]
impl WorkshopClient for WorkshopClientImpl {
    async fn patch_status(&self, name: &str, status: &WorkshopStatus) -> Result<()> {
        let patch = status_patch(status);
        self.api()
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| store_error(name, e))?;
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api = self.api();
        let workshop = api.get(name).await.map_err(|e| store_error(name, e))?;
        let mut finalizers = workshop.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        patch_finalizers(&api, name, finalizers).await
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api = self.api();
        let workshop = match api.get_opt(name).await.map_err(|e| store_error(name, e))? {
            Some(w) => w,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = workshop
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        patch_finalizers(&api, name, finalizers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workshop_common::crd::WorkshopPhase;

    #[test]
    fn ready_patch_clears_previous_message() {
        let status = WorkshopStatus {
            phase: WorkshopPhase::Ready,
            message: None,
            ready_tenants: 2,
            observed_generation: Some(3),
        };
        assert_eq!(
            status_patch(&status),
            json!({
                "status": {
                    "phase": "Ready",
                    "message": null,
                    "readyTenants": 2,
                    "observedGeneration": 3,
                }
            })
        );
    }

    #[test]
    fn waiting_patch_carries_message() {
        let status = WorkshopStatus {
            phase: WorkshopPhase::Provisioning,
            message: Some("waiting on argocd-server".to_string()),
            ..Default::default()
        };
        let patch = status_patch(&status);
        assert_eq!(patch["status"]["message"], json!("waiting on argocd-server"));
        assert_eq!(patch["status"]["observedGeneration"], Value::Null);
    }
}
