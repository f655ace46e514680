//! File storage abstraction

use async_trait::async_trait;
use relaypost_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Read a whole file as UTF-8 text
    async fn read_to_string(&self, path: &str) -> Result<String>;

    /// Replace a file's content
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Append one line (a trailing newline is added)
    async fn append_line(&self, path: &str, line: &str) -> Result<()>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local filesystem storage rooted at one directory
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance, creating the directory if needed
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized campaign file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Base directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Full path for a file name; only plain relative names are accepted
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn read_to_string(&self, path: &str) -> Result<String> {
        let full_path = self.full_path(path)?;

        let content = fs::read_to_string(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            _ => Error::Storage(format!("Failed to read file {}: {}", path, e)),
        })?;

        debug!(path = %path, size = content.len(), "Read file");

        Ok(content)
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        fs::write(&full_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file {}: {}", path, e)))?;

        debug!(path = %path, size = content.len(), "Wrote file");

        Ok(())
    }

    async fn append_line(&self, path: &str, line: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to open file {}: {}", path, e)))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| Error::Storage(format!("Failed to append to file {}: {}", path, e)))?;

        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(&full_path).await.unwrap_or(false))
    }
}
