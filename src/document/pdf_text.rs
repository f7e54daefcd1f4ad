use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use super::{ExtractionError, TextExtractor};

/// Text extraction backed by `pdf_extract`
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractionError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        // pdf_extract is CPU-bound and panics on some malformed files.
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| {
                warn!("PDF parser aborted: {}", e);
                ExtractionError::Unreadable(e.to_string())
            })?
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;

        let text: String = raw.nfc().collect();
        if text.trim().is_empty() {
            return Err(ExtractionError::NoText);
        }

        debug!("Extracted {} chars from {}", text.len(), path.display());
        Ok(text)
    }
}
