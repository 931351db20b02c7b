//! Tenant naming

use crate::crd::WorkshopSpec;

/// One tenant of a workshop, derived deterministically from its index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    /// 1-based tenant index
    pub id: u32,
    /// Login name (`<prefix><id>`)
    pub username: String,
    /// Private namespace (`<staging name><id>`)
    pub namespace: String,
}

impl Tenant {
    /// Derive tenant `id` from a workshop spec
    pub fn new(spec: &WorkshopSpec, id: u32) -> Self {
        Self {
            id,
            username: format!("{}{}", spec.users.prefix, id),
            namespace: format!("{}{}", spec.project.staging_name, id),
        }
    }

    /// Repository path of this tenant on the git server
    pub fn repository(&self, git_server: &str) -> String {
        format!("{}/{}/*", git_server.trim_end_matches('/'), self.username)
    }
}

/// Tenants `1..=N` in ascending order
pub fn tenants(spec: &WorkshopSpec) -> impl Iterator<Item = Tenant> + '_ {
    (1..=spec.users.count).map(move |id| Tenant::new(spec, id))
}
