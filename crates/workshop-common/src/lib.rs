//! Common types for the workshop operator: CRD, errors, resource store and
//! the convergence primitives the reconcilers are built on

#![deny(missing_docs)]

pub mod converge;
pub mod crd;
pub mod credentials;
pub mod error;
pub mod labels;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod progress;
pub mod readiness;
pub mod resource;
pub mod store;
pub mod telemetry;
pub mod tenant;

pub use error::{Error, StoreError};
pub use progress::Progress;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply and patches
pub const FIELD_MANAGER: &str = "workshop-operator";

/// Shared namespace that hosts the GitOps control-plane instance
pub const ARGOCD_NAMESPACE: &str = "argocd";

/// Namespace where OLM operators are installed
pub const OPERATORS_NAMESPACE: &str = "openshift-operators";

/// Namespace holding cluster-wide OpenShift configuration secrets
pub const OPENSHIFT_CONFIG_NAMESPACE: &str = "openshift-config";

/// Name of the htpasswd identity provider and its credential bundle secret
pub const IDENTITY_PROVIDER_NAME: &str = "htpass-workshop-users";

/// Finalizer guarding identity cleanup on Workshop deletion
pub const IDENTITY_FINALIZER: &str = "workshop.dev/identities";
