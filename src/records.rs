use serde::Serialize;

use crate::normalizer::{ExtractedFields, ResultSource};

/// Source column holding the property code
pub const PROPERTY_CODE_COLUMN: &str = "ncodimov";
/// Source column holding the owner/company name
pub const OWNER_NAME_COLUMN: &str = "nrazaoso";
/// Output column for the normalized CPF/CNPJ
pub const IDENTIFIER_COLUMN: &str = "cpf/cnpj";
/// Identifier written for records that failed
pub const ERROR_MARKER: &str = "ERRO";

/// One row of the uploaded table, columns in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputRecord {
    fields: Vec<(String, String)>,
}

impl InputRecord {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    fn trimmed(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Trimmed `ncodimov`, if present and non-empty
    pub fn property_code(&self) -> Option<&str> {
        self.trimmed(PROPERTY_CODE_COLUMN)
    }

    /// Trimmed `nrazaoso`, if present and non-empty
    pub fn owner_name(&self) -> Option<&str> {
        self.trimmed(OWNER_NAME_COLUMN)
    }
}

/// Parsed input: headers in source order plus the rows
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub records: Vec<InputRecord>,
}

/// One emitted row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub input: InputRecord,
    /// Normalized CPF/CNPJ, empty when nothing was found, `ERRO` on failure
    pub identifier: String,
    pub source: ResultSource,
    pub fields: ExtractedFields,
    pub error: Option<String>,
}

impl OutputRecord {
    pub fn extracted(input: InputRecord, source: ResultSource, fields: ExtractedFields) -> Self {
        Self {
            input,
            identifier: fields.identifier.clone(),
            source,
            fields,
            error: None,
        }
    }

    pub fn cached(input: InputRecord, identifier: &str) -> Self {
        Self {
            input,
            identifier: identifier.to_string(),
            source: ResultSource::Cache,
            fields: ExtractedFields {
                identifier: identifier.to_string(),
                ..Default::default()
            },
            error: None,
        }
    }

    pub fn failed(input: InputRecord, message: impl Into<String>) -> Self {
        Self {
            input,
            identifier: ERROR_MARKER.to_string(),
            source: ResultSource::Failed,
            fields: ExtractedFields::default(),
            error: Some(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.source == ResultSource::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_code_and_owner_are_trimmed() {
        let record = InputRecord::from_pairs([("ncodimov", " 123 "), ("nrazaoso", "  ACME ")]);
        assert_eq!(record.property_code(), Some("123"));
        assert_eq!(record.owner_name(), Some("ACME"));
    }

    #[test]
    fn test_blank_or_missing_columns_are_none() {
        let record = InputRecord::from_pairs([("ncodimov", "   ")]);
        assert_eq!(record.property_code(), None);
        assert_eq!(record.owner_name(), None);
    }

    #[test]
    fn test_failed_record_carries_marker_and_message() {
        let record = OutputRecord::failed(InputRecord::default(), "timeout");
        assert_eq!(record.identifier, "ERRO");
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert!(record.is_failure());
    }
}
