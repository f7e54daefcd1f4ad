use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use super::DocumentFetcher;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Certificate download failed with status {status}: {url}")]
    HttpFailure { status: StatusCode, url: String },
    #[error("Certificate download returned an empty body: {0}")]
    EmptyBody(String),
}

/// Fetches certificates over plain HTTPS, outside the browser session
#[derive(Clone, Debug)]
pub struct HttpDocumentFetcher {
    http: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        // The portal serves its reports with a certificate chain reqwest rejects.
        let http = reqwest::Client::builder()
            .timeout(settings.download_timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .use_rustls_tls()
            .cookie_store(true)
            .build()
            .context("Unable to construct reqwest client")?;

        Ok(Self { http })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Downloading certificate from {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request certificate {}", url))?;

        if !resp.status().is_success() {
            return Err(FetchError::HttpFailure {
                status: resp.status(),
                url: url.to_string(),
            }
            .into());
        }

        let bytes = resp
            .bytes()
            .await
            .context("Failed to read certificate body")?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody(url.to_string()).into());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create scratch dir {}", parent.display()))?;
        }

        if let Err(e) = tokio::fs::write(dest, &bytes).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e).with_context(|| format!("Failed to write {}", dest.display()));
        }

        info!("Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }
}
