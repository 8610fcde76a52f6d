use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ShareError;

/// The single file a run exposes. Only a reference: the file is opened
/// read-only, and only once a request has been authorized.
#[derive(Debug, Clone)]
pub struct ShareTarget {
    path: PathBuf,
    name: String,
    len: u64,
}

impl ShareTarget {
    /// Resolve `path` to an existing, readable regular file.
    pub fn locate(path: &Path) -> Result<Self, ShareError> {
        let meta = fs::metadata(path).map_err(|e| {
            ShareError::Config(format!("cannot access {}: {}", path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(ShareError::Config(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        // Readability is only known once we try.
        fs::File::open(path).map_err(|e| {
            ShareError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        // The URL carries the base name only, never the directory.
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ShareError::Config(format!("{} has no UTF-8 file name", path.display()))
            })?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            len: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base name as it appears in the URL.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size when the target was located; the served length is re-read in `open`.
    pub fn len_at_locate(&self) -> u64 {
        self.len
    }

    /// Open read-only and report the current length.
    pub async fn open(&self) -> std::io::Result<(tokio::fs::File, u64)> {
        let file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Display summary for progress output.
    pub fn summary(&self) -> String {
        format!("{} ({} bytes)", self.name, self.len)
    }
}
