//! Local filesystem acting as the object store.
//!
//! Several nodes can share one root directory, which is how a single host
//! (or a shared volume) stands in for a bucket. Objects are written to a
//! temporary sibling and renamed into place so replacement is atomic.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::paths::RemotePath;
use crate::ObjectStore;

const TEMP_SUFFIX: &str = "___temp";

#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Use `root` as the bucket, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> RemoteResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, path: &RemotePath) -> RemoteResult<PathBuf> {
        let key = path.as_str();
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(RemoteError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

fn io_err(path: &Path, e: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for LocalFs {
    async fn put_object(&self, path: &RemotePath, body: Bytes) -> RemoteResult<()> {
        let target = self.local_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        }

        let mut temp = target.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut file = fs::File::create(&temp).await.map_err(|e| io_err(&temp, e))?;
        file.write_all(&body).await.map_err(|e| io_err(&temp, e))?;
        file.sync_all().await.map_err(|e| io_err(&temp, e))?;
        drop(file);

        fs::rename(&temp, &target).await.map_err(|e| io_err(&target, e))?;
        debug!(key = %path, bytes = body.len(), "object written");
        Ok(())
    }

    async fn get_object(&self, path: &RemotePath) -> RemoteResult<Bytes> {
        let target = self.local_path(path)?;
        match fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RemoteError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_err(&target, e)),
        }
    }

    async fn list_objects(&self, prefix: &RemotePath) -> RemoteResult<Vec<RemotePath>> {
        // Prefixes are arbitrary strings, so start from the deepest directory
        // that is a whole-segment ancestor of the prefix and filter by string.
        let start = match prefix.as_str().rsplit_once('/') {
            Some((dir, _)) => self.root.join(dir),
            None => self.root.clone(),
        };

        let mut keys = Vec::new();
        let mut queue = vec![start];
        while let Some(dir) = queue.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io_err(&path, e))?;
                if file_type.is_dir() {
                    queue.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(TEMP_SUFFIX) || !key.starts_with(prefix.as_str()) {
                    continue;
                }
                keys.push(RemotePath::new(key));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
