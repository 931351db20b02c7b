//! htpasswd credential bundle and its file-based staging
//!
//! The bundle is written to a staging file, read back and published as a
//! single secret. The staging file is removed afterwards whatever happened;
//! failing to remove it is logged and never fails the pass.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;
use tracing::{debug, warn};

use workshop_common::credentials::{htpasswd_line, CredentialHasher};
use workshop_common::crd::WorkshopSpec;
use workshop_common::labels::LabelSet;
use workshop_common::resource::{ResourceKind, ResourceRecord, ResourceRef};
use workshop_common::tenant::tenants;
use workshop_common::{Error, Result, IDENTITY_PROVIDER_NAME, OPENSHIFT_CONFIG_NAMESPACE};

/// Key of the bundle inside its secret
pub const HTPASSWD_KEY: &str = "htpasswd";
/// File name prefix of staged bundles
pub const BUNDLE_FILE_PREFIX: &str = "htpasswdfile";

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);
/// Default staging directory
pub const DEFAULT_STAGING_DIR: &str = "/tmp/workshop-staging";

/// One `name:hash` line per tenant, in tenant order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    lines: Vec<String>,
}

impl CredentialBundle {
    /// Hash every tenant's password. The username is the salt context.
    pub fn build(spec: &WorkshopSpec, hasher: &dyn CredentialHasher) -> Result<Self> {
        let lines = tenants(spec)
            .map(|t| {
                let hash = hasher.hash(&t.username, &spec.users.password)?;
                Ok(htpasswd_line(&t.username, &hash))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { lines })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the bundle has no entries
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// File contents
    pub fn render(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\n")).collect()
    }
}

/// Reference to the bundle secret
pub fn bundle_secret_ref() -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Secret,
        IDENTITY_PROVIDER_NAME,
        OPENSHIFT_CONFIG_NAMESPACE,
    )
}

/// Secret carrying the bundle contents
pub fn bundle_secret(contents: &str) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::Secret,
        IDENTITY_PROVIDER_NAME,
        Some(OPENSHIFT_CONFIG_NAMESPACE),
        LabelSet::identity().overlay(IDENTITY_PROVIDER_NAME),
        json!({ "type": "Opaque", "stringData": { HTPASSWD_KEY: contents } }),
    )
}

/// Directory the bundle is staged in
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Stage under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A bundle path no other pass in this process will use
    pub fn next_bundle_path(&self) -> PathBuf {
        let seq = STAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{BUNDLE_FILE_PREFIX}-{}-{seq}.txt", std::process::id()))
    }

    /// Write the bundle to a fresh file, creating the directory if needed
    pub async fn stage(&self, contents: &str) -> Result<PathBuf> {
        let path = self.next_bundle_path();
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::staging(self.dir.display().to_string(), e.to_string()))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| Error::staging(path.display().to_string(), e.to_string()))?;
        debug!(path = %path.display(), "staged credential bundle");
        Ok(path)
    }

    /// Read a staged file back
    pub async fn read(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::staging(path.display().to_string(), e.to_string()))
    }

    /// Remove a staged file; failures are logged only
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove staged credential bundle");
        }
    }
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_DIR)
    }
}
