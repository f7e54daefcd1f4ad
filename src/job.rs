use anyhow::{Context, Result};
use tracing::info;

use crate::config::Settings;
use crate::coordinator::{RunCoordinator, RunSummary};
use crate::document::{HttpDocumentFetcher, PdfTextExtractor};
use crate::portal::WebDriverSession;
use crate::processor::Collaborators;
use crate::progress::ProgressLog;
use crate::records::InputTable;
use crate::tabular::{self, Artifacts, OutputOptions};

/// Result of a finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub summary: RunSummary,
    pub artifacts: Artifacts,
}

/// Runs one table end to end against the live portal and writes the results.
///
/// Failing to get a browser, prepare directories or write the outputs aborts
/// the whole job; per-record failures end up as `ERRO` rows instead.
pub async fn run_job(
    table: InputTable,
    settings: &Settings,
    output: &OutputOptions,
    progress: &ProgressLog,
) -> Result<JobReport> {
    progress.info(format!(
        "📥 {} rows received. Starting processing...",
        table.records.len()
    ));

    tokio::fs::create_dir_all(&settings.scratch_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch dir {}",
                settings.scratch_dir.display()
            )
        })?;

    // Fallible setup comes before the browser, which must always be quit.
    let fetcher = HttpDocumentFetcher::new(settings)?;
    let session = WebDriverSession::connect(settings)
        .await
        .context("Failed to acquire a browser session")?;
    let collaborators = Collaborators::new(session, fetcher, PdfTextExtractor);

    let coordinator = RunCoordinator::new(collaborators, settings.clone(), progress.clone());
    let InputTable { headers, records } = table;
    let run = coordinator.run(records).await;

    progress.info("📦 Processing finished. Exporting...");
    let artifacts = tabular::write_outputs(output, &headers, &run.records)?;

    for path in artifacts.paths() {
        info!("Result written to {}", path.display());
    }

    Ok(JobReport {
        summary: run.summary,
        artifacts,
    })
}
