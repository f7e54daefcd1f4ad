use std::fmt;

use crate::normalizer::ResultSource;
use crate::records::OutputRecord;

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total_input: usize,
    pub skipped: usize,
    pub from_document: usize,
    pub from_page: usize,
    pub from_cache: usize,
    pub failed: usize,
    /// Completed records where no CPF/CNPJ was found
    pub empty_identifiers: usize,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn record(&mut self, output: &OutputRecord) {
        match output.source {
            ResultSource::Document => self.from_document += 1,
            ResultSource::Page => self.from_page += 1,
            ResultSource::Cache => self.from_cache += 1,
            ResultSource::Failed => self.failed += 1,
        }
        if !output.is_failure() && output.identifier.is_empty() {
            self.empty_identifiers += 1;
        }
    }

    pub fn emitted(&self) -> usize {
        self.from_document + self.from_page + self.from_cache + self.failed
    }

    pub fn records_per_minute(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.emitted() as f64 / self.duration_secs) * 60.0
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        let emitted = self.emitted();
        if emitted > 0 {
            ((emitted - self.failed) as f64 / emitted as f64) * 100.0
        } else {
            0.0
        }
    }

    /// `42s`, `3m07s`, `1h02m05s`
    pub fn format_duration(&self) -> String {
        let total = self.duration_secs.round() as u64;
        match (total / 3600, total % 3600 / 60, total % 60) {
            (0, 0, s) => format!("{}s", s),
            (0, m, s) => format!("{}m{:02}s", m, s),
            (h, m, s) => format!("{}h{:02}m{:02}s", h, m, s),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("rows read", self.total_input.to_string()),
            ("skipped, no code", self.skipped.to_string()),
            ("PDF", self.from_document.to_string()),
            ("HTML", self.from_page.to_string()),
            ("CACHE", self.from_cache.to_string()),
            ("ERRO", self.failed.to_string()),
            ("no CPF/CNPJ found", self.empty_identifiers.to_string()),
            ("elapsed", self.format_duration()),
            ("rows/min", format!("{:.1}", self.records_per_minute())),
            ("resolved", format!("{:.1}%", self.success_rate())),
        ];

        writeln!(f, "CND run")?;
        for (label, value) in rows {
            writeln!(f, "  {:<18} {:>10}", label, value)?;
        }
        Ok(())
    }
}
