//! Persistence of assembled documents.

use crate::content::BinaryDocument;
use crate::{Error, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Component, Path, PathBuf};

/// Hands a finished document to the user. Failures are reported, never
/// retried.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn save(&self, document: BinaryDocument, filename: &str) -> Result<()>;
}

/// MIME type implied by a filename's extension.
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Writes documents into a directory.
#[derive(Debug, Clone)]
pub struct FsPersister {
    dir: PathBuf,
}

impl FsPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where `filename` would be written. Names that are empty, absolute or
    /// climb out of the directory are rejected.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename);
        let plain = !filename.is_empty()
            && name
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain || name.file_name().is_none() {
            return Err(Error::Persistence(format!(
                "refusing to write outside {}: '{}'",
                self.dir.display(),
                filename
            )));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl Persister for FsPersister {
    async fn save(&self, document: BinaryDocument, filename: &str) -> Result<()> {
        let path = self.path_for(filename)?;
        let expected = mime_for_filename(filename);
        if expected != document.mime {
            warn!(
                "saving {} document as '{}' (extension suggests {})",
                document.mime, filename, expected
            );
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, &document.bytes)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
        info!("saved {} ({} bytes)", path.display(), document.len());
        Ok(())
    }
}
