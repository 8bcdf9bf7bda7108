//! Storage contract and the in-memory reference backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::resource::Resource;

/// Trait for resource storage backends.
///
/// The engine never locks storage pessimistically; callers that write must
/// re-read first (see the status merge in the reconciler crate).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the current snapshot of a resource.
    ///
    /// Returns `Error::NotFound` if it does not exist.
    async fn load(&self, kind: &str, uid: &str) -> Result<Resource>;

    /// Create or replace a resource.
    async fn save(&self, resource: &Resource) -> Result<()>;

    /// Delete a resource. Returns `Error::NotFound` if it does not exist.
    async fn delete(&self, kind: &str, uid: &str) -> Result<()>;

    /// List all resources of a kind, ordered by uid.
    async fn list(&self, kind: &str) -> Result<Vec<Resource>>;
}

type Key = (String, String);

/// In-memory storage for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStorage {
    resources: RwLock<HashMap<Key, Resource>>,
}

impl InMemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored resources across all kinds.
    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}

fn key(kind: &str, uid: &str) -> Key {
    (kind.to_string(), uid.to_string())
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn load(&self, kind: &str, uid: &str) -> Result<Resource> {
        self.resources
            .read()
            .await
            .get(&key(kind, uid))
            .cloned()
            .ok_or_else(|| Error::not_found(kind, uid))
    }

    async fn save(&self, resource: &Resource) -> Result<()> {
        self.resources
            .write()
            .await
            .insert(key(resource.kind(), resource.uid()), resource.clone());
        Ok(())
    }

    async fn delete(&self, kind: &str, uid: &str) -> Result<()> {
        self.resources
            .write()
            .await
            .remove(&key(kind, uid))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(kind, uid))
    }

    async fn list(&self, kind: &str) -> Result<Vec<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .filter(|((k, _), _)| k == kind)
            .sorted_by(|((_, a), _), ((_, b), _)| a.cmp(b))
            .map(|(_, resource)| resource.clone())
            .collect())
    }
}

/// A wrapper that adds tracing to a storage backend.
pub struct TracingStorage<S: Storage> {
    inner: S,
}

impl<S: Storage> TracingStorage<S> {
    /// Wrap a storage backend.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: Storage> Storage for TracingStorage<S> {
    async fn load(&self, kind: &str, uid: &str) -> Result<Resource> {
        tracing::trace!(kind, uid, "Loading resource");
        self.inner.load(kind, uid).await
    }

    async fn save(&self, resource: &Resource) -> Result<()> {
        tracing::debug!(kind = resource.kind(), uid = resource.uid(), "Saving resource");
        let result = self.inner.save(resource).await;
        if let Err(ref e) = result {
            tracing::warn!(kind = resource.kind(), uid = resource.uid(), error = %e, "Save failed");
        }
        result
    }

    async fn delete(&self, kind: &str, uid: &str) -> Result<()> {
        tracing::debug!(kind, uid, "Deleting resource");
        self.inner.delete(kind, uid).await
    }

    async fn list(&self, kind: &str) -> Result<Vec<Resource>> {
        tracing::trace!(kind, "Listing resources");
        self.inner.list(kind).await
    }
}
