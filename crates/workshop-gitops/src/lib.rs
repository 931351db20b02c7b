//! GitOps control-plane provisioning for workshops
//!
//! Installs the GitOps operator, gives every tenant a project namespace with
//! an AppProject and RBAC for the control-plane, and publishes the shared
//! records (policy, local accounts, cluster destination) folded from all
//! tenants.

#![deny(missing_docs)]

pub mod aggregate;
pub mod desired;
pub mod orchestrator;
pub mod policy;
pub mod tenants;

pub use aggregate::AggregateState;
pub use orchestrator::GitOpsReconciler;
pub use policy::{PolicyDocument, PolicyLine};
pub use tenants::provision_tenants;
