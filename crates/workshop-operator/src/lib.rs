//! Workshop operator
//!
//! Watches cluster-scoped `Workshop` resources and provisions everything a
//! multi-tenant GitOps workshop needs: tenant logins and their identities,
//! the htpasswd identity provider, one project namespace per tenant, and a
//! shared Argo CD instance whose policy grants each tenant exactly its own
//! project.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod crds;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use workshop_common::crd::Workshop;

pub use config::{OperatorArgs, OperatorConfig};
pub use controller::{error_policy, reconcile, Context};

/// Watch timeout in seconds; kept under the client read timeout so idle
/// watches are closed by the API server first
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the Workshop controller until a shutdown signal arrives
pub async fn run_controller(client: Client, ctx: Arc<Context>) {
    let workshops: Api<Workshop> = Api::all(client);

    tracing::info!("starting Workshop controller");
    Controller::new(workshops, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(workshop = %object.name, ?action, "reconciliation completed")
                }
                Err(e) => tracing::error!(error = ?e, "reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
    tracing::info!("Workshop controller stopped");
}
