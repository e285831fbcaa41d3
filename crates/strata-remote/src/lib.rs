//! strata-remote — the durable object store seam.
//!
//! Attached nodes upload layers, indexes and heatmaps here; secondaries and
//! newly attached nodes read them back. The only guarantee the rest of the
//! system relies on is atomic whole-object replacement: a reader sees either
//! the previous object or the new one, never a mix.
//!
//! - **`LocalFs`**: a directory tree acting as the bucket (write to a temp
//!   file, then rename over the destination).
//! - **`InMemoryStore`**: a map, for tests.
//! - **`paths`**: the key layout shared by writers and readers.

pub mod error;
pub mod local_fs;
pub mod memory;
pub mod paths;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::{RemoteError, RemoteResult};
pub use local_fs::LocalFs;
pub use memory::InMemoryStore;
pub use paths::RemotePath;

/// Atomic object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `body` at `path`, replacing any previous object in one step.
    async fn put_object(&self, path: &RemotePath, body: Bytes) -> RemoteResult<()>;

    /// Read the whole object at `path`. Missing objects are `RemoteError::NotFound`.
    async fn get_object(&self, path: &RemotePath) -> RemoteResult<Bytes>;

    /// List object keys starting with `prefix`, in key order.
    async fn list_objects(&self, prefix: &RemotePath) -> RemoteResult<Vec<RemotePath>>;
}
