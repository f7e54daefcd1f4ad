use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::watcher::DEFAULT_DOCUMENT_PATTERN;

pub const DEFAULT_PORTAL_URL: &str = "https://iss.itajai.sc.gov.br/sefaz/jsp/cnd/index.jsp";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime settings for a CND extraction job
#[derive(Debug, Clone)]
pub struct Settings {
    pub webdriver_url: String,
    pub headless: bool,
    pub portal_url: String,
    /// URL fragment that marks a certificate response
    pub document_pattern: String,
    pub page_load_timeout: Duration,
    pub form_wait_timeout: Duration,
    /// How long to wait for a certificate after submitting the form
    pub document_window: Duration,
    pub poll_interval: Duration,
    /// Pause after every record that reached the portal
    pub record_delay: Duration,
    pub record_jitter: Duration,
    pub typing_delay: Duration,
    pub download_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keep_documents: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            document_pattern: DEFAULT_DOCUMENT_PATTERN.to_string(),
            page_load_timeout: Duration::from_secs(30),
            form_wait_timeout: Duration::from_secs(10),
            document_window: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
            record_delay: Duration::from_millis(1000),
            record_jitter: Duration::ZERO,
            typing_delay: Duration::from_millis(30),
            download_timeout: Duration::from_secs(60),
            accept_invalid_certs: true,
            scratch_dir: PathBuf::from("outputs/pdfs"),
            output_dir: PathBuf::from("outputs"),
            keep_documents: false,
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

impl Settings {
    /// Reads `CND_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(v) = get("CND_WEBDRIVER_URL") {
            settings.webdriver_url = v.trim().to_string();
        }
        if let Some(v) = get("CND_HEADLESS") {
            settings.headless = parse_bool("CND_HEADLESS", v)?;
        }
        if let Some(v) = get("CND_PORTAL_URL") {
            settings.portal_url = v.trim().to_string();
        }
        if let Some(v) = get("CND_DOCUMENT_PATTERN") {
            settings.document_pattern = v.trim().to_string();
        }
        if let Some(v) = get("CND_PAGE_LOAD_TIMEOUT_SECS") {
            settings.page_load_timeout =
                Duration::from_secs(parse("CND_PAGE_LOAD_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = get("CND_FORM_WAIT_SECS") {
            settings.form_wait_timeout = Duration::from_secs(parse("CND_FORM_WAIT_SECS", v)?);
        }
        if let Some(v) = get("CND_DOCUMENT_WINDOW_SECS") {
            settings.document_window =
                Duration::from_secs(parse("CND_DOCUMENT_WINDOW_SECS", v)?);
        }
        if let Some(v) = get("CND_POLL_INTERVAL_MS") {
            settings.poll_interval = Duration::from_millis(parse("CND_POLL_INTERVAL_MS", v)?);
        }
        if let Some(v) = get("CND_RECORD_DELAY_MS") {
            settings.record_delay = Duration::from_millis(parse("CND_RECORD_DELAY_MS", v)?);
        }
        if let Some(v) = get("CND_RECORD_JITTER_MS") {
            settings.record_jitter = Duration::from_millis(parse("CND_RECORD_JITTER_MS", v)?);
        }
        if let Some(v) = get("CND_TYPING_DELAY_MS") {
            settings.typing_delay = Duration::from_millis(parse("CND_TYPING_DELAY_MS", v)?);
        }
        if let Some(v) = get("CND_DOWNLOAD_TIMEOUT_SECS") {
            settings.download_timeout =
                Duration::from_secs(parse("CND_DOWNLOAD_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = get("CND_ACCEPT_INVALID_CERTS") {
            settings.accept_invalid_certs = parse_bool("CND_ACCEPT_INVALID_CERTS", v)?;
        }
        if let Some(v) = get("CND_SCRATCH_DIR") {
            settings.scratch_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("CND_OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("CND_KEEP_DOCUMENTS") {
            settings.keep_documents = parse_bool("CND_KEEP_DOCUMENTS", v)?;
        }

        if settings.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CND_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.webdriver_url, "http://localhost:9515");
        assert_eq!(settings.page_load_timeout, Duration::from_secs(30));
        assert_eq!(settings.form_wait_timeout, Duration::from_secs(10));
        assert_eq!(settings.document_window, Duration::from_secs(15));
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.document_pattern, "Modelo09Imobiliario");
        assert!(settings.accept_invalid_certs);
        assert!(!settings.keep_documents);
    }

    #[test]
    fn test_overrides_from_environment() {
        let settings = Settings::from_lookup(lookup(&[
            ("CND_WEBDRIVER_URL", "http://chrome:4444"),
            ("CND_HEADLESS", "false"),
            ("CND_DOCUMENT_WINDOW_SECS", "5"),
            ("CND_RECORD_DELAY_MS", "1500"),
            ("CND_OUTPUT_DIR", "/tmp/cnd"),
            ("CND_KEEP_DOCUMENTS", "yes"),
        ]))
        .unwrap();

        assert_eq!(settings.webdriver_url, "http://chrome:4444");
        assert!(!settings.headless);
        assert_eq!(settings.document_window, Duration::from_secs(5));
        assert_eq!(settings.record_delay, Duration::from_millis(1500));
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/cnd"));
        assert!(settings.keep_documents);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup(&[("CND_PORTAL_URL", "  ")])).unwrap();
        assert_eq!(settings.portal_url, DEFAULT_PORTAL_URL);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Settings::from_lookup(lookup(&[("CND_POLL_INTERVAL_MS", "fast")])).unwrap_err();
        assert!(err.to_string().contains("CND_POLL_INTERVAL_MS"));

        let err = Settings::from_lookup(lookup(&[("CND_HEADLESS", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("CND_HEADLESS"));

        assert!(Settings::from_lookup(lookup(&[("CND_POLL_INTERVAL_MS", "0")])).is_err());
    }
}
