//! In-memory object store for tests and single-process clusters.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{RemoteError, RemoteResult};
use crate::paths::RemotePath;
use crate::ObjectStore;

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_object(&self, path: &RemotePath, body: Bytes) -> RemoteResult<()> {
        self.objects.write().await.insert(path.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, path: &RemotePath) -> RemoteResult<Bytes> {
        self.objects
            .read()
            .await
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn list_objects(&self, prefix: &RemotePath) -> RemoteResult<Vec<RemotePath>> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.as_str().to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix.as_str()))
            .map(|(key, _)| RemotePath::new(key.clone()))
            .collect())
    }
}
