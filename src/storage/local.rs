//! Local filesystem blob storage.
//!
//! Writes are atomic: bytes go to a temporary sibling which is then
//! renamed over the target, so readers never see a half-written file.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalBlobs {
    root_dir: PathBuf,
}

impl LocalBlobs {
    /// Create a new store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(AppError::storage(format!("invalid key '{key}'")));
        }
        Ok(self.root_dir.join(relative))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobs {
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        self.ensure_dir(&path).await?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        self.root_dir.join(key).display().to_string()
    }
}
