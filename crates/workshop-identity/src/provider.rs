//! Cluster identity-provider registration

use serde_json::{json, Value};
use tracing::{debug, info};

use workshop_common::converge::ConvergenceDriver;
use workshop_common::resource::{ResourceKind, ResourceRef};
use workshop_common::{Error, Progress, Result, IDENTITY_PROVIDER_NAME};

/// Name of the cluster OAuth configuration object
pub const CLUSTER_OAUTH: &str = "cluster";

/// Reference to the cluster OAuth configuration
pub fn oauth_ref() -> ResourceRef {
    ResourceRef::cluster(ResourceKind::OAuth, CLUSTER_OAUTH)
}

/// Provider entry backed by the credential bundle secret
pub fn htpasswd_provider() -> Value {
    json!({
        "name": IDENTITY_PROVIDER_NAME,
        "mappingMethod": "claim",
        "type": "HTPasswd",
        "htpasswd": {
            "fileData": { "name": IDENTITY_PROVIDER_NAME },
        },
    })
}

/// Whether a provider list already has an entry with our name
pub fn has_provider(providers: &[Value]) -> bool {
    providers
        .iter()
        .any(|p| p.get("name").and_then(Value::as_str) == Some(IDENTITY_PROVIDER_NAME))
}

/// Register the htpasswd provider on the cluster OAuth configuration.
///
/// An existing entry with the same name is left exactly as it is. Otherwise
/// the entry is prepended and the list merge-patched, which leaves the rest
/// of the OAuth spec alone. A missing OAuth object is a wait, not an error.
pub async fn ensure_identity_provider(driver: &ConvergenceDriver) -> Result<Progress> {
    let reference = oauth_ref();
    let Some(oauth) = driver.lookup(&reference).await? else {
        info!("cluster OAuth configuration not found, waiting");
        return Ok(Progress::waiting("cluster OAuth configuration not found"));
    };

    let existing = oauth
        .field("/spec/identityProviders")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if has_provider(&existing) {
        debug!(provider = IDENTITY_PROVIDER_NAME, "identity provider already registered");
        return Ok(Progress::Done);
    }

    let mut providers = Vec::with_capacity(existing.len() + 1);
    providers.push(htpasswd_provider());
    providers.extend(existing);

    driver
        .store()
        .patch_merge(
            &reference,
            &json!({ "spec": { "identityProviders": providers } }),
        )
        .await
        .map_err(|e| Error::store(ResourceKind::OAuth, CLUSTER_OAUTH, e))?;
    info!(provider = IDENTITY_PROVIDER_NAME, "registered identity provider");
    Ok(Progress::Done)
}
