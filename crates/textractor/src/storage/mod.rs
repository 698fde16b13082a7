use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StorageError;

/// Stores raw document bytes under a flat, UUID-named layout.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` to a freshly named file and returns its path.
    /// The store directory is created on first use.
    pub fn save(&self, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_root()?;

        let path = self.root.join(Uuid::new_v4().to_string());
        std::fs::write(&path, content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    fn ensure_root(&self) -> Result<(), StorageError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| StorageError::CreateDirectory {
                path: self.root.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
