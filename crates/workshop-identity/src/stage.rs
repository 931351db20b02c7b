//! Per-tenant identity state machine
//!
//! ```text
//! Absent -> Created -> Bound -> Identified -> Mapped
//! ```
//!
//! Entering a stage creates the object that defines it; leaving a stage
//! backwards deletes that object. Walking backwards from `Mapped` therefore
//! deletes mapping, identity, binding and user in that order, so no object is
//! ever left referencing one that is already gone.

use serde_json::json;

use workshop_common::labels::LabelSet;
use workshop_common::resource::{ResourceKind, ResourceRecord, ResourceRef};
use workshop_common::tenant::Tenant;
use workshop_common::IDENTITY_PROVIDER_NAME;

/// Namespace tenants get read access to
pub const WORKSHOP_INFRA_NAMESPACE: &str = "workshop-infra";
/// ClusterRole bound into [`WORKSHOP_INFRA_NAMESPACE`]
pub const WORKSHOP_INFRA_CLUSTER_ROLE: &str = "view";

/// Lifecycle stage of one tenant's identity objects
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdentityStage {
    /// Nothing exists
    Absent,
    /// User exists
    Created,
    /// User is bound into the infra namespace
    Bound,
    /// Identity referencing the user exists
    Identified,
    /// Identity is mapped to the user
    Mapped,
}

impl IdentityStage {
    /// The next stage forward, `None` at `Mapped`
    pub fn advance(self) -> Option<Self> {
        match self {
            Self::Absent => Some(Self::Created),
            Self::Created => Some(Self::Bound),
            Self::Bound => Some(Self::Identified),
            Self::Identified => Some(Self::Mapped),
            Self::Mapped => None,
        }
    }

    /// The next stage backward, `None` at `Absent`
    pub fn retreat(self) -> Option<Self> {
        match self {
            Self::Absent => None,
            Self::Created => Some(Self::Absent),
            Self::Bound => Some(Self::Created),
            Self::Identified => Some(Self::Bound),
            Self::Mapped => Some(Self::Identified),
        }
    }

    /// Reference to the object whose existence defines this stage
    pub fn object(self, tenant: &Tenant) -> Option<ResourceRef> {
        let user = &tenant.username;
        match self {
            Self::Absent => None,
            Self::Created => Some(ResourceRef::cluster(ResourceKind::User, user)),
            Self::Bound => Some(ResourceRef::namespaced(
                ResourceKind::RoleBinding,
                infra_binding_name(user),
                WORKSHOP_INFRA_NAMESPACE,
            )),
            Self::Identified => Some(ResourceRef::cluster(
                ResourceKind::Identity,
                identity_name(user),
            )),
            Self::Mapped => Some(ResourceRef::cluster(
                ResourceKind::UserIdentityMapping,
                identity_name(user),
            )),
        }
    }
}

/// `<provider>:<user>`
pub fn identity_name(username: &str) -> String {
    format!("{IDENTITY_PROVIDER_NAME}:{username}")
}

/// `<user>-workshop-infra`
pub fn infra_binding_name(username: &str) -> String {
    format!("{username}-{WORKSHOP_INFRA_NAMESPACE}")
}

/// User object
pub fn user(tenant: &Tenant) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::User,
        &tenant.username,
        None,
        LabelSet::identity().overlay(&tenant.username),
        json!({ "fullName": tenant.username }),
    )
}

/// Binding of the user to the infra ClusterRole
pub fn infra_binding(tenant: &Tenant) -> ResourceRecord {
    let name = infra_binding_name(&tenant.username);
    ResourceRecord::new(
        ResourceKind::RoleBinding,
        &name,
        Some(WORKSHOP_INFRA_NAMESPACE),
        LabelSet::identity().overlay(&name),
        json!({
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": WORKSHOP_INFRA_CLUSTER_ROLE,
            },
            "subjects": [{
                "kind": "User",
                "name": tenant.username,
                "apiGroup": "rbac.authorization.k8s.io",
            }]
        }),
    )
}

/// Identity from the htpasswd provider pointing at the user
pub fn identity(tenant: &Tenant, user_uid: &str) -> ResourceRecord {
    let name = identity_name(&tenant.username);
    ResourceRecord::new(
        ResourceKind::Identity,
        &name,
        None,
        LabelSet::identity().overlay(&tenant.username),
        json!({
            "providerName": IDENTITY_PROVIDER_NAME,
            "providerUserName": tenant.username,
            "user": { "name": tenant.username, "uid": user_uid },
        }),
    )
}

/// Mapping of the identity to the user
pub fn identity_mapping(tenant: &Tenant) -> ResourceRecord {
    let name = identity_name(&tenant.username);
    ResourceRecord::new(
        ResourceKind::UserIdentityMapping,
        &name,
        None,
        LabelSet::identity().overlay(&tenant.username),
        json!({
            "identity": { "name": name },
            "user": { "name": tenant.username },
        }),
    )
}
