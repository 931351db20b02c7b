//! Resource kinds and records managed by the operator
//!
//! Every object the operator touches is described by a [`ResourceRecord`]:
//! a kind, Kubernetes metadata, and the kind-specific body (everything except
//! `apiVersion`, `kind` and `metadata`). Records are plain data so the
//! generator can build them without I/O and the store can move them through
//! the API as dynamic objects.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, GroupVersionKind};
use serde_json::{Map, Value};

// =============================================================================
// ResourceKind
// =============================================================================

/// How a kind's mutable subset is compared and replaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Value at the pointer must match exactly; update replaces it
    Exact(&'static str),
    /// Map at the pointer must contain every desired entry and no key under
    /// `owned_prefix` that the desired map lacks. Update overlays the desired
    /// entries, drops stale owned keys and keeps entries written by others.
    Subset {
        /// JSON pointer to the map
        pointer: &'static str,
        /// Key prefix the operator owns within the map
        owned_prefix: &'static str,
    },
}

/// Keys the operator owns in the shared Argo CD secret and configmap
pub const ACCOUNT_KEY_PREFIX: &str = "accounts.";

/// Kinds of objects the operator manages or observes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// core/v1 Namespace
    Namespace,
    /// core/v1 Secret
    Secret,
    /// core/v1 ConfigMap
    ConfigMap,
    /// rbac/v1 Role
    Role,
    /// rbac/v1 RoleBinding
    RoleBinding,
    /// apps/v1 Deployment (observed only)
    Deployment,
    /// OLM Subscription
    Subscription,
    /// OLM InstallPlan
    InstallPlan,
    /// Argo CD AppProject
    AppProject,
    /// Argo CD operator instance
    ArgoCD,
    /// OpenShift User
    User,
    /// OpenShift Identity
    Identity,
    /// OpenShift UserIdentityMapping
    UserIdentityMapping,
    /// OpenShift cluster OAuth configuration
    OAuth,
    /// The operator's own Workshop resource
    Workshop,
}

impl ResourceKind {
    /// API group (empty for the core group)
    pub fn group(&self) -> &'static str {
        match self {
            Self::Namespace | Self::Secret | Self::ConfigMap => "",
            Self::Role | Self::RoleBinding => "rbac.authorization.k8s.io",
            Self::Deployment => "apps",
            Self::Subscription | Self::InstallPlan => "operators.coreos.com",
            Self::AppProject | Self::ArgoCD => "argoproj.io",
            Self::User | Self::Identity | Self::UserIdentityMapping => "user.openshift.io",
            Self::OAuth => "config.openshift.io",
            Self::Workshop => "workshop.dev",
        }
    }

    /// API version within the group
    pub fn version(&self) -> &'static str {
        match self {
            Self::Subscription | Self::InstallPlan | Self::AppProject | Self::Workshop => {
                "v1alpha1"
            }
            Self::ArgoCD => "v1beta1",
            _ => "v1",
        }
    }

    /// Kind name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::Deployment => "Deployment",
            Self::Subscription => "Subscription",
            Self::InstallPlan => "InstallPlan",
            Self::AppProject => "AppProject",
            Self::ArgoCD => "ArgoCD",
            Self::User => "User",
            Self::Identity => "Identity",
            Self::UserIdentityMapping => "UserIdentityMapping",
            Self::OAuth => "OAuth",
            Self::Workshop => "Workshop",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Namespace => "namespaces",
            Self::Secret => "secrets",
            Self::ConfigMap => "configmaps",
            Self::Role => "roles",
            Self::RoleBinding => "rolebindings",
            Self::Deployment => "deployments",
            Self::Subscription => "subscriptions",
            Self::InstallPlan => "installplans",
            Self::AppProject => "appprojects",
            Self::ArgoCD => "argocds",
            Self::User => "users",
            Self::Identity => "identities",
            Self::UserIdentityMapping => "useridentitymappings",
            Self::OAuth => "oauths",
            Self::Workshop => "workshops",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            Self::Namespace
                | Self::User
                | Self::Identity
                | Self::UserIdentityMapping
                | Self::OAuth
                | Self::Workshop
        )
    }

    /// Full `apiVersion` string
    pub fn api_version(&self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }

    /// kube `ApiResource` for dynamic API access
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group(), self.version(), self.kind());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }

    /// The fields the convergence driver compares and replaces.
    ///
    /// Kinds with no mutable fields are create-only: an existing object is
    /// left untouched. Labels and metadata are never compared.
    pub fn mutable_fields(&self) -> &'static [FieldPolicy] {
        match self {
            Self::AppProject => &[FieldPolicy::Exact("/spec")],
            Self::ArgoCD => &[FieldPolicy::Exact("/spec/rbac/policy")],
            Self::Role => &[FieldPolicy::Exact("/rules")],
            Self::RoleBinding => &[FieldPolicy::Exact("/subjects")],
            Self::Secret => &[FieldPolicy::Subset {
                pointer: "/stringData",
                owned_prefix: ACCOUNT_KEY_PREFIX,
            }],
            Self::ConfigMap => &[FieldPolicy::Subset {
                pointer: "/data",
                owned_prefix: ACCOUNT_KEY_PREFIX,
            }],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// =============================================================================
// ResourceRef
// =============================================================================

/// Reference to an object by kind, name and namespace.
///
/// Used for lookups, deletions and readiness queries; never mutated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    /// Object kind
    pub kind: ResourceKind,
    /// Object name
    pub name: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Reference a namespaced object
    pub fn namespaced(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Reference a cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// =============================================================================
// ResourceRecord
// =============================================================================

/// A typed object: kind, metadata and kind-specific body
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRecord {
    /// Object kind
    pub kind: ResourceKind,
    /// Kubernetes metadata (name, namespace, labels, resourceVersion, ...)
    pub metadata: ObjectMeta,
    /// Top-level fields other than apiVersion/kind/metadata
    pub body: Value,
}

impl ResourceRecord {
    /// Build a desired record
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: Option<&str>,
        labels: BTreeMap<String, String>,
        body: Value,
    ) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: namespace.map(str::to_string),
                labels: if labels.is_empty() { None } else { Some(labels) },
                ..Default::default()
            },
            body,
        }
    }

    /// Object name (empty if unset)
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Object labels
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }

    /// Reference to this record
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind,
            name: self.name().to_string(),
            namespace: self.metadata.namespace.clone(),
        }
    }

    /// Read a body field by JSON pointer (e.g. `/spec/rbac/policy`)
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.body.pointer(pointer)
    }

    /// Whether this record's mutable subset already satisfies `desired`
    pub fn satisfies(&self, desired: &ResourceRecord) -> bool {
        desired.kind.mutable_fields().iter().all(|policy| match *policy {
            FieldPolicy::Exact(ptr) => self.field(ptr) == desired.field(ptr),
            FieldPolicy::Subset {
                pointer,
                owned_prefix,
            } => match desired.field(pointer) {
                None => true,
                Some(Value::Object(wanted)) => match self.field(pointer) {
                    Some(Value::Object(have)) => {
                        wanted.iter().all(|(k, v)| have.get(k) == Some(v))
                            && !have
                                .keys()
                                .any(|k| k.starts_with(owned_prefix) && !wanted.contains_key(k))
                    }
                    _ => wanted.is_empty(),
                },
                Some(other) => self.field(pointer) == Some(other),
            },
        })
    }

    /// Copy the mutable subset of `desired` onto this record
    pub fn adopt(&mut self, desired: &ResourceRecord) {
        for policy in desired.kind.mutable_fields() {
            match *policy {
                FieldPolicy::Exact(ptr) => match desired.field(ptr) {
                    Some(value) => set_pointer(&mut self.body, ptr, value.clone()),
                    None => remove_pointer(&mut self.body, ptr),
                },
                FieldPolicy::Subset {
                    pointer,
                    owned_prefix,
                } => {
                    let Some(wanted) = desired.field(pointer) else {
                        continue;
                    };
                    match (self.body.pointer_mut(pointer), wanted) {
                        (Some(Value::Object(have)), Value::Object(wanted)) => {
                            have.retain(|k, _| {
                                !k.starts_with(owned_prefix) || wanted.contains_key(k)
                            });
                            for (k, v) in wanted {
                                have.insert(k.clone(), v.clone());
                            }
                        }
                        _ => set_pointer(&mut self.body, pointer, wanted.clone()),
                    }
                }
            }
        }
    }
}

/// Set the value at a JSON pointer, creating intermediate objects
pub fn set_pointer(root: &mut Value, pointer: &str, value: Value) {
    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = tokens.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for token in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

/// Remove the value at a JSON pointer if present
pub fn remove_pointer(root: &mut Value, pointer: &str) {
    let Some((parent, last)) = pointer.rsplit_once('/') else {
        return;
    };
    let last = last.replace("~1", "/").replace("~0", "~");
    let target = if parent.is_empty() {
        Some(root)
    } else {
        root.pointer_mut(parent)
    };
    if let Some(Value::Object(map)) = target {
        map.remove(&last);
    }
}
