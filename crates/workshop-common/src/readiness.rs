//! Readiness gate for upstream-managed objects
//!
//! A single point-in-time check: no sleeping or polling here. Callers turn
//! "not ready" into [`Progress::Waiting`] and let the scheduler come back.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::resource::ResourceRef;
use crate::store::{ObservedState, ResourceStore};
use crate::{Error, Progress, Result};

/// Whether an observed rollout is complete.
///
/// Ready means the declared count equals the available count; anything
/// else, including more available than declared mid-rollout, is not ready.
pub fn rollout_complete(state: &ObservedState) -> bool {
    state.desired == state.available
}

/// Queries health of named objects through the store
#[derive(Clone)]
pub struct ReadinessGate {
    store: Arc<dyn ResourceStore>,
}

impl ReadinessGate {
    /// Create a gate over the given store
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Check the handle once. An absent object is not ready.
    pub async fn is_ready(&self, handle: &ResourceRef) -> Result<bool> {
        match self.store.query_health(handle).await {
            Ok(state) => {
                let ready = rollout_complete(&state);
                debug!(
                    %handle,
                    desired = state.desired,
                    available = state.available,
                    ready,
                    "readiness check"
                );
                Ok(ready)
            }
            Err(StoreError::NotFound) => {
                debug!(%handle, "readiness check: object absent");
                Ok(false)
            }
            Err(e) => Err(Error::store(handle.kind, &handle.name, e)),
        }
    }

    /// Check the handle and translate "not ready" into a waiting outcome
    pub async fn require(&self, handle: &ResourceRef) -> Result<Progress> {
        if self.is_ready(handle).await? {
            Ok(Progress::Done)
        } else {
            info!(%handle, "waiting for readiness");
            Ok(Progress::waiting(format!("{handle} is not ready")))
        }
    }
}
