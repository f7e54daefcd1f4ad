use std::fmt;

use anyhow::{Context, Result};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;

use crate::config::Settings;
use crate::document::{discard_scratch, scratch_path, DocumentFetcher, TextExtractor};
use crate::normalizer::{
    normalize_outcome, parse_document_text, ExtractedFields, ExtractionOutcome, ResultSource,
};
use crate::page_scraper::scrape_page;
use crate::portal::{selectors, BrowserSession};
use crate::progress::ProgressLog;
use crate::watcher::ResponseWatcher;

/// The browser session plus the document tooling, owned by the run
pub struct Collaborators<S, F, X> {
    pub session: S,
    pub fetcher: F,
    pub extractor: X,
}

impl<S, F, X> Collaborators<S, F, X> {
    pub fn new(session: S, fetcher: F, extractor: X) -> Self {
        Self {
            session,
            fetcher,
            extractor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Idle,
    Navigating,
    Submitting,
    AwaitingDocument,
    DocumentFound,
    DocumentTimeout,
    Extracting,
    Normalizing,
    Done,
    Failed,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordState::Idle => "idle",
            RecordState::Navigating => "navigating",
            RecordState::Submitting => "submitting",
            RecordState::AwaitingDocument => "awaiting document",
            RecordState::DocumentFound => "document found",
            RecordState::DocumentTimeout => "document timeout",
            RecordState::Extracting => "extracting",
            RecordState::Normalizing => "normalizing",
            RecordState::Done => "done",
            RecordState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    Completed {
        source: ResultSource,
        fields: ExtractedFields,
    },
    Failed {
        /// State the record was in when the error surfaced
        state: RecordState,
        message: String,
    },
}

/// Drives a single property code through the portal.
///
/// Built fresh for every record; the watch window dies with it.
pub struct RecordProcessor<'a, S, F, X> {
    collaborators: &'a Collaborators<S, F, X>,
    settings: &'a Settings,
    progress: &'a ProgressLog,
    watcher: ResponseWatcher,
    state: RecordState,
}

impl<'a, S, F, X> RecordProcessor<'a, S, F, X>
where
    S: BrowserSession,
    F: DocumentFetcher,
    X: TextExtractor,
{
    pub fn new(
        collaborators: &'a Collaborators<S, F, X>,
        settings: &'a Settings,
        progress: &'a ProgressLog,
    ) -> Self {
        Self {
            collaborators,
            settings,
            progress,
            watcher: ResponseWatcher::new(settings.document_pattern.clone()),
            state: RecordState::Idle,
        }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    fn transition(&mut self, next: RecordState) {
        debug!("Record state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs the record to a terminal state. Errors never escape.
    pub async fn process(mut self, property_code: &str) -> RecordResult {
        match self.run(property_code).await {
            Ok((source, fields)) => RecordResult::Completed { source, fields },
            Err(e) => {
                let state = self.state;
                self.transition(RecordState::Failed);
                RecordResult::Failed {
                    state,
                    message: format!("{:#}", e),
                }
            }
        }
    }

    async fn run(&mut self, property_code: &str) -> Result<(ResultSource, ExtractedFields)> {
        let collaborators = self.collaborators;
        let session = &collaborators.session;

        self.transition(RecordState::Navigating);
        session
            .navigate(&self.settings.portal_url, self.settings.page_load_timeout)
            .await
            .context("Failed to load the CND search page")?;
        session
            .wait_for(selectors::SEARCH_FORM, self.settings.form_wait_timeout)
            .await
            .context("CND search form did not appear")?;

        self.transition(RecordState::Submitting);
        session
            .select_option(selectors::PURPOSE_SELECT, selectors::PURPOSE_VALUE)
            .await?;
        session
            .clear_and_type(selectors::INSCRIPTION_INPUT, property_code)
            .await?;
        session.arm_interception().await?;
        self.watcher.begin_watch();
        session.click(selectors::SUBMIT_BUTTON).await?;

        self.transition(RecordState::AwaitingDocument);
        let captured = self.await_document().await;
        self.watcher.end_watch();

        let outcome = match captured {
            Some(url) => {
                self.transition(RecordState::DocumentFound);
                self.progress
                    .info(format!("📄 Certificate generated for {}", property_code));
                self.transition(RecordState::Extracting);
                self.extract_from_document(property_code, url).await?
            }
            None => {
                self.transition(RecordState::DocumentTimeout);
                self.progress
                    .warn("⚠️ No certificate generated, reading the result page...");
                self.transition(RecordState::Extracting);
                self.extract_from_page().await?
            }
        };

        self.transition(RecordState::Normalizing);
        let (source, fields) = normalize_outcome(outcome);
        if fields.extraction_failed {
            self.progress
                .warn(format!("⚠️ {} certificate unreadable", property_code));
        } else {
            self.progress.info(format!(
                "✅ {} CPF/CNPJ: {}",
                source.label(),
                fields.identifier
            ));
        }

        self.transition(RecordState::Done);
        Ok((source, fields))
    }

    /// Earliest certificate URL seen before the window closes.
    async fn await_document(&mut self) -> Option<String> {
        let window = self.settings.document_window;
        let polled = timeout(window, self.poll_for_capture()).await;
        match polled {
            Ok(url) => Some(url),
            Err(_) => {
                debug!("Watch window of {:?} elapsed without a certificate", window);
                self.watcher.first_captured().map(str::to_string)
            }
        }
    }

    async fn poll_for_capture(&mut self) -> String {
        let collaborators = self.collaborators;
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // The page is mid-navigation right after submit; probes may fail.
            match collaborators.session.observed_responses().await {
                Ok(urls) => {
                    for url in urls {
                        self.watcher.on_response(&url);
                    }
                }
                Err(e) => debug!("Response probe failed: {:#}", e),
            }

            if let Some(url) = self.watcher.first_captured() {
                return url.to_string();
            }
        }
    }

    async fn extract_from_document(
        &self,
        property_code: &str,
        url: String,
    ) -> Result<ExtractionOutcome> {
        let collaborators = self.collaborators;
        let path = scratch_path(&self.settings.scratch_dir, property_code);

        collaborators
            .fetcher
            .fetch(&url, &path)
            .await
            .context("Failed to download certificate")?;

        let fields = match collaborators.extractor.extract_text(&path).await {
            Ok(text) => parse_document_text(&text),
            Err(e) => {
                debug!("Text extraction failed for {}: {}", path.display(), e);
                ExtractedFields::extraction_failure()
            }
        };

        if !self.settings.keep_documents {
            discard_scratch(&path).await;
        }

        Ok(ExtractionOutcome::Document { url, fields })
    }

    async fn extract_from_page(&self) -> Result<ExtractionOutcome> {
        let html = self
            .collaborators
            .session
            .page_source()
            .await
            .context("Failed to read the result page")?;

        Ok(ExtractionOutcome::Page {
            fields: scrape_page(&html),
        })
    }
}
