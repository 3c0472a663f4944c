//! Finalized recordings on disk.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures when listing or reading recordings.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid recording name '{0}'")]
    InvalidName(String),

    #[error("Recording '{0}' not found")]
    NotFound(String),

    #[error("Recording store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Read-only view over the recording directory.
///
/// Only files carrying the configured extension count as recordings, so sessions still
/// being written (`.part`) are never listed or served.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
    extension: String,
}

impl RecordingStore {
    /// View over `dir`, listing files that end in `.<extension>`.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Recording file names, most recent first.
    ///
    /// Names are timestamps, so descending lexical order is newest first. A missing
    /// directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.has_extension(&name) {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Contents of one recording.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, StoreError> {
        self.validate_name(filename)?;
        let path = self.dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A plain file name inside the store carrying the recording extension.
    fn validate_name(&self, filename: &str) -> Result<(), StoreError> {
        let plain = !filename.is_empty()
            && !filename.contains(['/', '\\'])
            && filename != "."
            && filename != ".."
            && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
        if !plain || !self.has_extension(filename) {
            return Err(StoreError::InvalidName(filename.to_string()));
        }
        Ok(())
    }

    fn has_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.extension)
    }
}
