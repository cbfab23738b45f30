use std::{
    fs,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use crate::error::ServiceError;

/// Writes generated files under a directory with collision-free names.
#[derive(Debug, Clone)]
pub struct LocalFileCache {
    base_path: PathBuf,
    extension: String,
}

impl LocalFileCache {
    pub fn new(base_path: impl Into<PathBuf>, extension: &str) -> Result<Self, ServiceError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Computes the file contents and writes them to a fresh path, which is returned.
    pub fn store<F>(&self, compute: F) -> Result<PathBuf, ServiceError>
    where
        F: FnOnce() -> Result<Vec<u8>, ServiceError>,
    {
        let contents = compute()?;
        let path = self.unique_path();
        fs::write(&path, contents)?;
        Ok(path)
    }

    fn unique_path(&self) -> PathBuf {
        loop {
            let path = self
                .base_path
                .join(format!("{}.{}", Uuid::new_v4(), self.extension));
            if !path.exists() {
                return path;
            }
        }
    }
}
