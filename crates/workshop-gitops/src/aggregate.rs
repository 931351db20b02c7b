//! Shared records folded from per-tenant fragments

use std::collections::BTreeMap;

use crate::policy::{tenant_policy, PolicyDocument};
use workshop_common::resource::ACCOUNT_KEY_PREFIX;
use workshop_common::tenant::Tenant;

/// Marker value enabling login for an Argo CD local account
pub const LOGIN_MARKER: &str = "login";

/// Aggregates built fresh on every pass, tenant by tenant in ascending order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateState {
    /// Concatenated policy fragments
    pub policy: PolicyDocument,
    /// `accounts.<user>.password` to bcrypt hash
    pub credentials: BTreeMap<String, String>,
    /// `accounts.<user>` to login marker
    pub logins: BTreeMap<String, String>,
    namespaces: Vec<String>,
}

impl AggregateState {
    /// Empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tenant's fragments into the aggregate
    pub fn add_tenant(&mut self, tenant: &Tenant, git_server: &str, credential_hash: &str) {
        self.policy.extend(tenant_policy(tenant, git_server));
        self.credentials.insert(
            format!("{ACCOUNT_KEY_PREFIX}{}.password", tenant.username),
            credential_hash.to_string(),
        );
        self.logins
            .insert(format!("{ACCOUNT_KEY_PREFIX}{}", tenant.username), LOGIN_MARKER.to_string());
        self.namespaces.push(tenant.namespace.clone());
    }

    /// Tenant namespaces in tenant order
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Comma-joined namespace list, no leading or trailing separator
    pub fn namespace_list(&self) -> String {
        self.namespaces.join(",")
    }

    /// Number of tenants folded in
    pub fn tenant_count(&self) -> usize {
        self.namespaces.len()
    }
}
