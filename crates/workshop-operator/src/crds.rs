//! CRD installation on startup

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;

use workshop_common::crd::Workshop;
use workshop_common::resource::ResourceKind;
use workshop_common::{Error, Result, StoreError, FIELD_MANAGER};

/// Full name of the Workshop CRD
pub const WORKSHOP_CRD_NAME: &str = "workshops.workshop.dev";

/// Render the Workshop CRD as YAML
pub fn crd_yaml() -> Result<String> {
    serde_yaml::to_string(&Workshop::crd())
        .map_err(|e| Error::serialization_for_kind(ResourceKind::Workshop, e.to_string()))
}

/// Install or update the Workshop CRD with server-side apply, so the schema
/// on the cluster always matches the running operator
pub async fn ensure_crds_installed(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!(crd = WORKSHOP_CRD_NAME, "installing CRD");
    crds.patch(WORKSHOP_CRD_NAME, &params, &Patch::Apply(&Workshop::crd()))
        .await
        .map_err(|e| Error::store(ResourceKind::Workshop, WORKSHOP_CRD_NAME, StoreError::from(e)))?;
    Ok(())
}
