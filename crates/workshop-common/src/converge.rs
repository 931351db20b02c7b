//! Convergence driver: idempotent create-or-update of one desired record

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::resource::{ResourceRecord, ResourceRef};
use crate::store::ResourceStore;
use crate::{Error, Result};

/// What [`ConvergenceDriver::apply`] did to the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The object existed with a different mutable subset and was updated
    Updated,
    /// The object already matched
    Unchanged,
}

impl ApplyOutcome {
    /// Whether the store was mutated
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Drives individual records toward their desired shape
#[derive(Clone)]
pub struct ConvergenceDriver {
    store: Arc<dyn ResourceStore>,
}

impl ConvergenceDriver {
    /// Create a driver over the given store
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Ensure the store holds `desired`.
    ///
    /// Creates the object; on `AlreadyExists` fetches it, compares the
    /// kind's mutable subset and updates only when it differs. Any other
    /// store failure is returned as a hard error. Updates are last-writer-wins
    /// against the fetched resourceVersion, so a concurrent write surfaces as
    /// a `Conflict` store error rather than being retried here.
    pub async fn apply(&self, desired: &ResourceRecord) -> Result<ApplyOutcome> {
        let kind = desired.kind;
        let name = desired.name();

        match self.store.create(desired).await {
            Ok(()) => {
                info!(%kind, %name, namespace = ?desired.namespace(), "created");
                return Ok(ApplyOutcome::Created);
            }
            Err(StoreError::AlreadyExists) => {}
            Err(e) => return Err(Error::store(kind, name, e)),
        }

        let mut actual = self
            .store
            .get(&desired.reference())
            .await
            .map_err(|e| Error::store(kind, name, e))?;

        if actual.satisfies(desired) {
            debug!(%kind, %name, "unchanged");
            return Ok(ApplyOutcome::Unchanged);
        }

        actual.adopt(desired);
        self.store
            .update(&actual)
            .await
            .map_err(|e| Error::store(kind, name, e))?;
        info!(%kind, %name, namespace = ?desired.namespace(), "updated");
        Ok(ApplyOutcome::Updated)
    }

    /// Ensure the referenced object does not exist. Returns whether a
    /// deletion was issued; an already-absent object is not an error.
    pub async fn ensure_absent(&self, reference: &ResourceRef) -> Result<bool> {
        match self.store.delete(reference).await {
            Ok(()) => {
                info!(%reference, "deleted");
                Ok(true)
            }
            Err(StoreError::NotFound) => {
                debug!(%reference, "already absent");
                Ok(false)
            }
            Err(e) => Err(Error::store(reference.kind, &reference.name, e)),
        }
    }

    /// Fetch an object, mapping `NotFound` to `None`
    pub async fn lookup(&self, reference: &ResourceRef) -> Result<Option<ResourceRecord>> {
        match self.store.get(reference).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(Error::store(reference.kind, &reference.name, e)),
        }
    }
}
