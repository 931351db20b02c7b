//! Desired-state generator
//!
//! Pure functions from the Workshop spec (and, for shared records, the
//! folded aggregate) to resource records. Nothing here touches the store.

use serde_json::{json, Value};

use workshop_common::crd::WorkshopSpec;
use workshop_common::labels::{LabelSet, ARGOCD_SECRET_TYPE_LABEL};
use workshop_common::resource::{ResourceKind, ResourceRecord, ResourceRef};
use workshop_common::tenant::Tenant;
use workshop_common::{ARGOCD_NAMESPACE, OPERATORS_NAMESPACE};

use crate::aggregate::AggregateState;
use crate::policy::IN_CLUSTER_SERVER;

/// OLM package and Subscription name of the GitOps operator
pub const GITOPS_OPERATOR: &str = "openshift-gitops-operator";
/// Deployment run by the GitOps operator
pub const GITOPS_OPERATOR_DEPLOYMENT: &str = "gitops-operator";
/// Catalog source of the GitOps operator
pub const GITOPS_CATALOG_SOURCE: &str = "redhat-operators";
/// Namespace of the catalog source
pub const GITOPS_CATALOG_NAMESPACE: &str = "openshift-marketplace";
/// Name of the control-plane instance
pub const ARGOCD_INSTANCE: &str = "argocd";
/// Server deployment of the control-plane instance
pub const ARGOCD_SERVER_DEPLOYMENT: &str = "argocd-server";
/// Secret holding local account passwords
pub const ARGOCD_SECRET: &str = "argocd-secret";
/// ConfigMap enabling local accounts
pub const ARGOCD_CM: &str = "argocd-cm";
/// Secret registering the in-cluster destination
pub const DEFAULT_CLUSTER_CONFIG: &str = "argocd-default-cluster-config";
/// Role and RoleBinding granting the control-plane access to a tenant namespace
pub const ARGOCD_MANAGER: &str = "argocd-manager";
/// Identity of the control-plane application controller
pub const APPLICATION_CONTROLLER_SUBJECT: &str =
    "system:serviceaccount:argocd:argocd-argocd-application-controller";
/// API group of RBAC objects
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Readiness handle of the GitOps operator
pub fn gitops_operator_handle() -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Deployment,
        GITOPS_OPERATOR_DEPLOYMENT,
        OPERATORS_NAMESPACE,
    )
}

/// Readiness handle of the control-plane server
pub fn argocd_server_handle() -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Deployment,
        ARGOCD_SERVER_DEPLOYMENT,
        ARGOCD_NAMESPACE,
    )
}

/// OLM Subscription installing the GitOps operator.
///
/// Pinning a ClusterServiceVersion switches approval to manual so the
/// pinned version is the one that gets installed.
pub fn subscription(spec: &WorkshopSpec) -> ResourceRecord {
    let gitops = &spec.gitops;
    let mut body = json!({
        "spec": {
            "channel": gitops.channel,
            "name": GITOPS_OPERATOR,
            "source": GITOPS_CATALOG_SOURCE,
            "sourceNamespace": GITOPS_CATALOG_NAMESPACE,
            "installPlanApproval": "Automatic",
        }
    });
    if let Some(csv) = &gitops.cluster_service_version {
        body["spec"]["installPlanApproval"] = json!("Manual");
        body["spec"]["startingCSV"] = json!(csv);
    }
    ResourceRecord::new(
        ResourceKind::Subscription,
        GITOPS_OPERATOR,
        Some(OPERATORS_NAMESPACE),
        LabelSet::gitops().overlay(GITOPS_OPERATOR),
        body,
    )
}

/// A namespace
pub fn namespace(name: &str, labels: &LabelSet) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::Namespace,
        name,
        None,
        labels.overlay(name),
        json!({}),
    )
}

/// AppProject confining a tenant to its namespace and repository
pub fn app_project(tenant: &Tenant, git_server: &str) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::AppProject,
        &tenant.namespace,
        Some(ARGOCD_NAMESPACE),
        LabelSet::gitops().overlay("appproject-cr"),
        json!({
            "spec": {
                "description": format!("Workshop project of {}", tenant.username),
                "sourceRepos": [tenant.repository(git_server)],
                "destinations": [{
                    "namespace": tenant.namespace,
                    "server": IN_CLUSTER_SERVER,
                }],
                "clusterResourceWhitelist": [],
                "namespaceResourceWhitelist": [{ "group": "*", "kind": "*" }],
            }
        }),
    )
}

/// Role granting everything in the tenant namespace
pub fn manager_role(tenant: &Tenant) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::Role,
        ARGOCD_MANAGER,
        Some(tenant.namespace.as_str()),
        LabelSet::gitops().overlay(ARGOCD_MANAGER),
        json!({
            "rules": [{
                "apiGroups": ["*"],
                "resources": ["*"],
                "verbs": ["*"],
            }]
        }),
    )
}

/// Binding of the control-plane controller identity to [`manager_role`]
pub fn manager_role_binding(tenant: &Tenant) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::RoleBinding,
        ARGOCD_MANAGER,
        Some(tenant.namespace.as_str()),
        LabelSet::gitops().overlay(ARGOCD_MANAGER),
        json!({
            "roleRef": {
                "apiGroup": RBAC_API_GROUP,
                "kind": "Role",
                "name": ARGOCD_MANAGER,
            },
            "subjects": [{
                "kind": "User",
                "name": APPLICATION_CONTROLLER_SUBJECT,
                "apiGroup": RBAC_API_GROUP,
            }]
        }),
    )
}

/// Records one tenant needs, in apply order
pub fn tenant_records(tenant: &Tenant, git_server: &str) -> Vec<ResourceRecord> {
    vec![
        namespace(&tenant.namespace, &LabelSet::gitops()),
        app_project(tenant, git_server),
        manager_role(tenant),
        manager_role_binding(tenant),
    ]
}

fn string_data_secret(name: &str, labels: LabelSet, data: Value) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::Secret,
        name,
        Some(ARGOCD_NAMESPACE),
        labels.overlay(name),
        json!({ "type": "Opaque", "stringData": data }),
    )
}

/// Local account passwords
pub fn argocd_secret(aggregate: &AggregateState) -> ResourceRecord {
    string_data_secret(ARGOCD_SECRET, LabelSet::gitops(), json!(aggregate.credentials))
}

/// Local account login markers
pub fn argocd_cm(aggregate: &AggregateState) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::ConfigMap,
        ARGOCD_CM,
        Some(ARGOCD_NAMESPACE),
        LabelSet::gitops().overlay(ARGOCD_CM),
        json!({ "data": aggregate.logins }),
    )
}

/// Control-plane instance carrying the full policy document
pub fn argocd_instance(aggregate: &AggregateState) -> ResourceRecord {
    ResourceRecord::new(
        ResourceKind::ArgoCD,
        ARGOCD_INSTANCE,
        Some(ARGOCD_NAMESPACE),
        LabelSet::gitops().overlay("argocd-cr"),
        json!({
            "spec": {
                "rbac": {
                    "defaultPolicy": "",
                    "policy": aggregate.policy.render(),
                    "scopes": "[accounts]",
                },
                "server": {
                    "route": { "enabled": true },
                },
            }
        }),
    )
}

/// In-cluster destination restricted to the tenant namespaces
pub fn default_cluster_config(aggregate: &AggregateState) -> ResourceRecord {
    let labels = LabelSet::gitops().with(ARGOCD_SECRET_TYPE_LABEL, "cluster");
    string_data_secret(
        DEFAULT_CLUSTER_CONFIG,
        labels,
        json!({
            "config": r#"{"tlsClientConfig":{"insecure":false}}"#,
            "name": "in-cluster",
            "namespaces": aggregate.namespace_list(),
            "server": IN_CLUSTER_SERVER,
        }),
    )
}
