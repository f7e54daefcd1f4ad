use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENTIFIER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CPF/CNPJ:\s*([^\n]+)").expect("identifier pattern"));
static OWNER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PROPRIETÁRIO:\s*([^\n]+)").expect("owner pattern"));
static ADDRESS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)ENDEREÇO/LOCALIZAÇÃO DO IMÓVEL:.*?Logradouro:\s*([^\n]+)")
        .expect("address pattern")
});
static PROPERTY_ID_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Código do Imóvel:\s*([^\n]+)").expect("property id pattern")
});

/// Fields recovered for one property, from either the certificate or the result page.
///
/// Every field is a plain string; an unmatched field stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// CPF/CNPJ of the owner
    pub identifier: String,
    /// Owner name as printed by the portal (Proprietário)
    pub owner_display_name: String,
    /// Street line of the property (Logradouro)
    pub property_address: String,
    /// Portal-side property code (Código do Imóvel)
    pub internal_property_id: String,
    /// Set when a certificate was downloaded but no text could be read from it
    pub extraction_failed: bool,
}

impl ExtractedFields {
    pub fn extraction_failure() -> Self {
        Self {
            extraction_failed: true,
            ..Self::default()
        }
    }
}

/// Where a record's identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSource {
    Document,
    Page,
    Cache,
    Failed,
}

impl ResultSource {
    pub fn label(&self) -> &'static str {
        match self {
            ResultSource::Document => "PDF",
            ResultSource::Page => "HTML",
            ResultSource::Cache => "CACHE",
            ResultSource::Failed => "ERRO",
        }
    }
}

/// Result of the extraction step, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Document { url: String, fields: ExtractedFields },
    Page { fields: ExtractedFields },
}

/// Strips punctuation and formats 11 digits as CPF, 14 digits as CNPJ.
/// Any other length comes back as bare digits.
pub fn format_identifier(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        11 => format!(
            "{}.{}.{}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..9],
            &digits[9..11]
        ),
        14 => format!(
            "{}.{}.{}/{}-{}",
            &digits[0..2],
            &digits[2..5],
            &digits[5..8],
            &digits[8..12],
            &digits[12..14]
        ),
        _ => digits,
    }
}

fn capture(pattern: &Regex, text: &str) -> String {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Parses the text layer of a CND certificate.
pub fn parse_document_text(text: &str) -> ExtractedFields {
    ExtractedFields {
        identifier: format_identifier(&capture(&IDENTIFIER_LINE, text)),
        owner_display_name: capture(&OWNER_LINE, text),
        property_address: capture(&ADDRESS_BLOCK, text),
        internal_property_id: capture(&PROPERTY_ID_LINE, text),
        extraction_failed: false,
    }
}

/// Collapses both extraction branches into the stored shape.
pub fn normalize_outcome(outcome: ExtractionOutcome) -> (ResultSource, ExtractedFields) {
    let (source, mut fields) = match outcome {
        ExtractionOutcome::Document { fields, .. } => (ResultSource::Document, fields),
        ExtractionOutcome::Page { fields } => (ResultSource::Page, fields),
    };
    fields.identifier = format_identifier(&fields.identifier);
    (source, fields)
}
