mod fetcher;
mod pdf_text;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub use fetcher::{FetchError, HttpDocumentFetcher};
pub use pdf_text::PdfTextExtractor;

/// Downloads a captured certificate URL into scratch storage
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Reads the text layer of a downloaded certificate
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError>;
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to read document {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Document is not a readable PDF: {0}")]
    Unreadable(String),
    #[error("Document has no text layer")]
    NoText,
}

/// Scratch file name for one certificate download
pub fn scratch_path(dir: &Path, property_code: &str) -> PathBuf {
    let code: String = property_code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    dir.join(format!("certidao_{}_{}.pdf", code, Uuid::new_v4().simple()))
}

/// Removes a scratch file; failures are only logged.
pub async fn discard_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed scratch document {}", path.display()),
        Err(e) => warn!("Failed to remove scratch document {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_path_sanitizes_code() {
        let path = scratch_path(Path::new("/tmp/pdfs"), "12.34/5");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(path.starts_with("/tmp/pdfs"));
        assert!(name.starts_with("certidao_12345_"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_scratch_paths_are_unique() {
        let dir = Path::new("scratch");
        assert_ne!(scratch_path(dir, "1"), scratch_path(dir, "1"));
    }

    #[tokio::test]
    async fn test_discard_scratch_removes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certidao.pdf");
        tokio::fs::write(&path, b"%PDF").await.unwrap();

        discard_scratch(&path).await;
        assert!(!path.exists());

        discard_scratch(&path).await;
    }
}
