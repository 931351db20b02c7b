//! Tenant identity lifecycle for workshops
//!
//! Every tenant gets an OpenShift user, a read binding into the infra
//! namespace, and an identity from the workshop htpasswd provider mapped to
//! that user. The provider itself is backed by a credential bundle secret
//! and registered on the cluster OAuth configuration.

#![deny(missing_docs)]

pub mod bundle;
pub mod manager;
pub mod provider;
pub mod stage;

pub use bundle::{CredentialBundle, StagingArea};
pub use manager::IdentityManager;
pub use stage::IdentityStage;
