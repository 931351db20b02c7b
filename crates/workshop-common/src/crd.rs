//! Workshop CRD
//!
//! A Workshop declares a multi-tenant training environment: N tenant logins
//! with a shared password, one private project namespace per tenant, and an
//! optional shared GitOps control-plane.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default operator channel for the GitOps subscription
pub const DEFAULT_GITOPS_CHANNEL: &str = "latest";

/// Default in-cluster git server tenants push to
pub const DEFAULT_GIT_SERVER: &str = "http://gitea-server.gitea.svc:3000";

/// Workshop defines tenants and the shared GitOps control-plane they use.
///
/// Example:
/// ```yaml
/// apiVersion: workshop.dev/v1alpha1
/// kind: Workshop
/// metadata:
///   name: gitops-101
/// spec:
///   users:
///     count: 3
///     prefix: user
///     password: openshift
///   project:
///     stagingName: proj
///   gitops:
///     enabled: true
///     channel: latest
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "workshop.dev",
    version = "v1alpha1",
    kind = "Workshop",
    status = "WorkshopStatus",
    printcolumn = r#"{"name":"Users","type":"integer","jsonPath":".spec.users.count"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopSpec {
    /// Tenant logins
    pub users: UserSpec,

    /// Tenant project namespaces
    #[serde(default)]
    pub project: ProjectSpec,

    /// Shared GitOps control-plane
    #[serde(default)]
    pub gitops: GitOpsSpec,
}

/// Upper bound on `spec.users.count`
pub const MAX_TENANTS: u32 = 1000;

/// Tenant login configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Number of tenants
    pub count: u32,

    /// Login name prefix; tenant `n` is `<prefix><n>`
    #[serde(default = "default_user_prefix")]
    pub prefix: String,

    /// Password shared by every tenant login
    pub password: String,
}

fn default_user_prefix() -> String {
    "user".to_string()
}

/// Tenant project namespace configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Namespace prefix; tenant `n` owns namespace `<stagingName><n>`
    #[serde(default = "default_staging_name")]
    pub staging_name: String,
}

impl Default for ProjectSpec {
    fn default() -> Self {
        Self {
            staging_name: default_staging_name(),
        }
    }
}

fn default_staging_name() -> String {
    "proj".to_string()
}

/// GitOps control-plane configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsSpec {
    /// Install and configure the control-plane
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// OperatorHub channel of the GitOps operator
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Pinned ClusterServiceVersion; enables manual install-plan approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_service_version: Option<String>,

    /// Base URL of the git server hosting tenant repositories
    #[serde(default = "default_git_server")]
    pub git_server: String,
}

impl Default for GitOpsSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_channel(),
            cluster_service_version: None,
            git_server: default_git_server(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_channel() -> String {
    DEFAULT_GITOPS_CHANNEL.to_string()
}

fn default_git_server() -> String {
    DEFAULT_GIT_SERVER.to_string()
}

impl WorkshopSpec {
    /// Validate the workshop specification
    pub fn validate(&self, workshop: &str) -> Result<(), crate::Error> {
        if self.users.count > MAX_TENANTS {
            return Err(crate::Error::validation_for_field(
                workshop,
                "spec.users.count",
                format!("count cannot exceed {}", MAX_TENANTS),
            ));
        }
        if self.users.prefix.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                workshop,
                "spec.users.prefix",
                "prefix cannot be empty",
            ));
        }
        if self.users.password.is_empty() {
            return Err(crate::Error::validation_for_field(
                workshop,
                "spec.users.password",
                "password cannot be empty",
            ));
        }
        if self.project.staging_name.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                workshop,
                "spec.project.stagingName",
                "staging name cannot be empty",
            ));
        }
        if self.gitops.enabled && self.gitops.channel.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                workshop,
                "spec.gitops.channel",
                "channel cannot be empty when gitops is enabled",
            ));
        }
        Ok(())
    }

    /// A small valid spec for tests
    #[cfg(any(test, feature = "test-utils"))]
    pub fn sample() -> Self {
        Self {
            users: UserSpec {
                count: 2,
                prefix: "user".to_string(),
                password: "openshift".to_string(),
            },
            project: ProjectSpec::default(),
            gitops: GitOpsSpec::default(),
        }
    }
}

/// Workshop status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopStatus {
    /// Current phase
    #[serde(default)]
    pub phase: WorkshopPhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Tenant count of the last fully converged pass
    #[serde(default)]
    pub ready_tenants: u32,

    /// Workshop generation last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Workshop phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WorkshopPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Waiting on an upstream dependency
    Provisioning,
    /// Every step converged
    Ready,
    /// Spec is invalid or a pass failed
    Failed,
}

impl std::fmt::Display for WorkshopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = Workshop::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "workshop.dev");
        assert_eq!(crd.spec.names.kind, "Workshop");
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let spec: WorkshopSpec = serde_yaml::from_str(
            r#"
users:
  count: 3
  password: openshift
"#,
        )
        .unwrap();
        assert_eq!(spec.users.prefix, "user");
        assert_eq!(spec.project.staging_name, "proj");
        assert!(spec.gitops.enabled);
        assert_eq!(spec.gitops.channel, "latest");
        assert_eq!(spec.gitops.git_server, DEFAULT_GIT_SERVER);
        assert!(spec.gitops.cluster_service_version.is_none());
    }

    #[test]
    fn camel_case_fields() {
        let spec: WorkshopSpec = serde_yaml::from_str(
            r#"
users: { count: 1, prefix: student, password: pw }
project: { stagingName: lab }
gitops: { clusterServiceVersion: openshift-gitops-operator.v1.5.0, gitServer: "http://git:3000" }
"#,
        )
        .unwrap();
        assert_eq!(spec.project.staging_name, "lab");
        assert_eq!(
            spec.gitops.cluster_service_version.as_deref(),
            Some("openshift-gitops-operator.v1.5.0")
        );
    }

    #[test]
    fn sample_is_valid() {
        assert!(WorkshopSpec::sample().validate("w").is_ok());
    }

    #[test]
    fn empty_prefix_rejected() {
        let mut spec = WorkshopSpec::sample();
        spec.users.prefix = " ".to_string();
        let err = spec.validate("w").unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn tenant_count_is_bounded() {
        let mut spec = WorkshopSpec::sample();
        spec.users.count = MAX_TENANTS;
        assert!(spec.validate("w").is_ok());
        spec.users.count = u32::MAX;
        let err = spec.validate("w").unwrap_err();
        assert!(err.to_string().contains("count cannot exceed 1000"));
    }

    #[test]
    fn empty_password_rejected() {
        let mut spec = WorkshopSpec::sample();
        spec.users.password.clear();
        assert!(spec.validate("w").is_err());
    }

    #[test]
    fn empty_staging_name_rejected() {
        let mut spec = WorkshopSpec::sample();
        spec.project.staging_name.clear();
        assert!(spec.validate("w").is_err());
    }

    #[test]
    fn channel_only_required_when_enabled() {
        let mut spec = WorkshopSpec::sample();
        spec.gitops.channel.clear();
        assert!(spec.validate("w").is_err());
        spec.gitops.enabled = false;
        assert!(spec.validate("w").is_ok());
    }

    #[test]
    fn phase_display() {
        assert_eq!(WorkshopPhase::default().to_string(), "Pending");
        assert_eq!(WorkshopPhase::Provisioning.to_string(), "Provisioning");
    }
}
