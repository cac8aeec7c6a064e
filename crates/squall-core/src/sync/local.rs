use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use squall_schema::Sha1Hash;

use super::{RemoteObject, RemoteStore, TransportError};
use crate::paths::filename_from_url;

/// A directory or mounted file share used as a release feed.
///
/// Hashes are uppercase SHA1, the same as `RELEASES`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf, TransportError> {
        let name = filename_from_url(name);
        if name.is_empty() || name.starts_with('.') || name.contains('\\') {
            return Err(TransportError::fatal(format!("invalid object name '{name}'")));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError> {
        let root = self.root.clone();
        let display = self.describe();
        tokio::task::spawn_blocking(move || {
            let mut objects = Vec::new();
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(objects),
                Err(e) => return Err(TransportError::from_io(&display, e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| TransportError::from_io(&display, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                // Temp files from in-flight writes start with a dot
                if name.starts_with('.') || !entry.path().is_file() {
                    continue;
                }
                let data = std::fs::read(entry.path()).map_err(|e| TransportError::from_io(&name, e))?;
                objects.push(RemoteObject {
                    content_hash: Some(Sha1Hash::compute(&data).to_string()),
                    size: Some(data.len() as u64),
                    version: None,
                    name,
                });
            }
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(objects)
        })
        .await
        .map_err(|e| TransportError::fatal(format!("listing task failed: {e}")))?
    }

    async fn download(&self, name: &str) -> Result<Bytes, TransportError> {
        let path = self.path(name)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| TransportError::from_io(name, e))
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), TransportError> {
        let path = self.path(name)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| TransportError::from_io(&self.describe(), e))?;
        crate::io::write_atomic_async(&path, data.to_vec())
            .await
            .map_err(|e| TransportError::from_io(name, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let data = self.download(from).await?;
        self.upload(to, data).await
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::from_io(name, e)),
        }
    }

    fn content_hash(&self, data: &[u8]) -> String {
        Sha1Hash::compute(data).to_string()
    }
}
