mod cache;
mod summary;

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

pub use cache::IdentifierCache;
pub use summary::RunSummary;

use crate::config::Settings;
use crate::document::{DocumentFetcher, TextExtractor};
use crate::portal::BrowserSession;
use crate::processor::{Collaborators, RecordProcessor, RecordResult};
use crate::progress::ProgressLog;
use crate::records::{InputRecord, OutputRecord};

/// Everything a run produced, in input order
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub records: Vec<OutputRecord>,
    pub summary: RunSummary,
}

/// Walks the input sequentially over one browser session.
///
/// Owns the session, the per-name cache and the accumulated rows for the
/// duration of a run; the session is released when the run ends.
pub struct RunCoordinator<S, F, X> {
    collaborators: Collaborators<S, F, X>,
    settings: Settings,
    progress: ProgressLog,
    cache: IdentifierCache,
}

impl<S, F, X> RunCoordinator<S, F, X>
where
    S: BrowserSession,
    F: DocumentFetcher,
    X: TextExtractor,
{
    pub fn new(
        collaborators: Collaborators<S, F, X>,
        settings: Settings,
        progress: ProgressLog,
    ) -> Self {
        Self {
            collaborators,
            settings,
            progress,
            cache: IdentifierCache::new(),
        }
    }

    pub async fn run(mut self, records: Vec<InputRecord>) -> RunOutput {
        let started = Instant::now();
        let total = records.len();
        let mut outputs = Vec::with_capacity(total);
        let mut summary = RunSummary {
            total_input: total,
            ..Default::default()
        };

        for (idx, record) in records.into_iter().enumerate() {
            let Some(code) = record.property_code().map(str::to_string) else {
                warn!("Property code missing on row {}. Skipping.", idx + 1);
                summary.skipped += 1;
                continue;
            };
            let owner = record.owner_name().map(str::to_string);

            if let Some(name) = owner.as_deref() {
                if let Some(identifier) = self.cache.get(name) {
                    self.progress
                        .info(format!("🔁 Cache: {} => {}", name, identifier));
                    let output = OutputRecord::cached(record, identifier);
                    summary.record(&output);
                    outputs.push(output);
                    continue;
                }
            }

            self.progress.info(format!(
                "🔍 Searching property code {} ({}/{})",
                code,
                idx + 1,
                total
            ));

            let result = RecordProcessor::new(&self.collaborators, &self.settings, &self.progress)
                .process(&code)
                .await;

            let output = match result {
                RecordResult::Completed { source, fields } => {
                    if let Some(name) = owner.as_deref() {
                        self.cache.remember(name, &fields.identifier);
                    }
                    OutputRecord::extracted(record, source, fields)
                }
                RecordResult::Failed { state, message } => {
                    self.progress.error(format!(
                        "Error on code {} while {}: {}",
                        code, state, message
                    ));
                    OutputRecord::failed(record, message)
                }
            };

            summary.record(&output);
            outputs.push(output);

            self.pause_between_records().await;
        }

        summary.duration_secs = started.elapsed().as_secs_f64();
        info!(
            "Run finished: {} rows emitted, {} skipped, {} failed, {} names cached",
            summary.emitted(),
            summary.skipped,
            summary.failed,
            self.cache.len()
        );

        if let Err(e) = self.collaborators.session.close().await {
            warn!("Failed to close browser session cleanly: {}", e);
        }

        RunOutput {
            records: outputs,
            summary,
        }
    }

    async fn pause_between_records(&self) {
        let max_jitter_ms = self.settings.record_jitter.as_millis() as u64;
        let jitter_ms = if max_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=max_jitter_ms)
        } else {
            0
        };

        let delay = self.settings.record_delay + Duration::from_millis(jitter_ms);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
