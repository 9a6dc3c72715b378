//! Write path for a collection. Never touches a mirror store: views observe
//! the result through the change feed.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::errors::{Error, RemoteFailure, Result};

use super::remote::RemoteMutation;

pub struct CrudFacade<E> {
    collection: String,
    remote: Arc<dyn RemoteMutation<E>>,
}

impl<E> Clone for CrudFacade<E> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<E: Entity> CrudFacade<E> {
    pub fn new(collection: impl Into<String>, remote: Arc<dyn RemoteMutation<E>>) -> Self {
        Self {
            collection: collection.into(),
            remote,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates a row and returns the server's version of it.
    pub async fn create(&self, fields: Map<String, Value>) -> Result<E> {
        debug!("[Sync] create on '{}'", self.collection);
        let result = self.remote.insert(&self.collection, fields).await;
        self.finish("create", None, result)
    }

    /// Applies a partial update. `id` cannot be changed.
    pub async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<E> {
        self.check_id(id)?;
        if let Some(new_id) = fields.get("id") {
            if new_id.as_str() != Some(id) {
                return Err(self.rejected("entity id is immutable"));
            }
        }
        debug!(
            "[Sync] update on '{}' id={} fields={:?}",
            self.collection,
            id,
            fields.keys().collect::<Vec<_>>()
        );
        let result = self.remote.update(&self.collection, id, fields).await;
        self.finish("update", Some(id), result)
    }

    /// Deletes a row. `Ok(None)` when nothing matched.
    pub async fn remove(&self, id: &str) -> Result<Option<E>> {
        self.check_id(id)?;
        debug!("[Sync] remove on '{}' id={}", self.collection, id);
        let result = self.remote.delete(&self.collection, id).await;
        self.finish("remove", Some(id), result)
    }

    fn check_id(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(self.rejected("entity id must not be empty"));
        }
        Ok(())
    }

    fn rejected(&self, message: &str) -> Error {
        Error::mutation(self.collection.clone(), RemoteFailure::with_status(400, message))
    }

    fn finish<T>(
        &self,
        op: &str,
        id: Option<&str>,
        result: std::result::Result<T, RemoteFailure>,
    ) -> Result<T> {
        result.map_err(|failure| {
            warn!(
                "[Sync] {} on '{}'{} failed: {}",
                op,
                self.collection,
                id.map(|id| format!(" id={}", id)).unwrap_or_default(),
                failure
            );
            Error::mutation(self.collection.clone(), failure)
        })
    }
}
