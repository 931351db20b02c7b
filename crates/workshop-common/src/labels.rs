//! Label sets applied to managed objects
//!
//! A [`LabelSet`] is never mutated once built; each call site composes the
//! labels it needs with [`LabelSet::overlay`], which returns a fresh map.

use std::collections::BTreeMap;

/// Standard `name` label key
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Standard `part-of` label key
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Standard `managed-by` label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label Argo CD uses to discover cluster secrets
pub const ARGOCD_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Immutable base labels
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    base: BTreeMap<String, String>,
}

impl LabelSet {
    /// Base labels for every object belonging to the GitOps stack
    pub fn gitops() -> Self {
        Self::default()
            .with(PART_OF_LABEL, "argocd")
            .with(MANAGED_BY_LABEL, "workshop-operator")
    }

    /// Base labels for identity objects
    pub fn identity() -> Self {
        Self::default()
            .with(PART_OF_LABEL, "workshop-identity")
            .with(MANAGED_BY_LABEL, "workshop-operator")
    }

    /// Add a base label (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base.insert(key.into(), value.into());
        self
    }

    /// Base labels plus the `name` label for one object
    pub fn overlay(&self, name: &str) -> BTreeMap<String, String> {
        self.overlay_with(name, &[])
    }

    /// Base labels plus `name` and extra entries for one object
    pub fn overlay_with(&self, name: &str, extra: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut labels = self.base.clone();
        labels.insert(NAME_LABEL.to_string(), name.to_string());
        for (k, v) in extra {
            labels.insert((*k).to_string(), (*v).to_string());
        }
        labels
    }
}
