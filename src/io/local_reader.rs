use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::EtlError;

/// Reads whole source documents from the local file system
#[derive(Debug, Clone)]
pub struct LocalFileReader {
    file_path: PathBuf,
}

impl LocalFileReader {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    /// Read the file as UTF-8 text. Source files are small (one song, or one
    /// day of events), so they are read in one go.
    pub async fn read_to_string(&self) -> Result<String, EtlError> {
        fs::read_to_string(&self.file_path)
            .await
            .map_err(|source| EtlError::Read {
                path: self.file_path.clone(),
                source,
            })
    }
}
