//! On-demand window reset.

use tracing::debug;

use super::backend::{EventStore, StoreClient};
use super::identifier::Identifier;
use crate::error::Result;

/// Clears identifiers' windows.
pub struct ResetController<S> {
    client: StoreClient<S>,
}

impl<S> Clone for ResetController<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<S: EventStore> ResetController<S> {
    /// Create a reset controller over a store client.
    pub fn new(client: StoreClient<S>) -> Self {
        Self { client }
    }

    /// Delete the whole window record for `identifier`.
    ///
    /// Resetting an identifier that has no record is a no-op.
    pub async fn reset(&self, identifier: &Identifier) -> Result<()> {
        self.client.delete(identifier).await?;
        debug!(identifier = %identifier, "Rate limit window reset");
        Ok(())
    }
}
