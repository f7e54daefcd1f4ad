use tracing::debug;

/// Default fragment identifying the portal's certificate report URL
pub const DEFAULT_DOCUMENT_PATTERN: &str = "Modelo09Imobiliario";

/// Collects certificate URLs seen on the browser's response stream during one watch window.
#[derive(Debug, Clone)]
pub struct ResponseWatcher {
    pattern: String,
    captured: Vec<String>,
    armed: bool,
}

impl ResponseWatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            captured: Vec::new(),
            armed: false,
        }
    }

    /// Drops earlier captures and starts accepting responses.
    pub fn begin_watch(&mut self) {
        self.captured.clear();
        self.armed = true;
    }

    /// Closes the window; later responses are ignored.
    pub fn end_watch(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Records `url` if the window is open and it looks like a certificate.
    /// Returns whether it was captured.
    pub fn on_response(&mut self, url: &str) -> bool {
        if !self.armed || !url.contains(&self.pattern) {
            return false;
        }
        if self.captured.iter().any(|seen| seen == url) {
            return false;
        }

        debug!("Captured certificate response: {}", url);
        self.captured.push(url.to_string());
        true
    }

    pub fn captured(&self) -> &[String] {
        &self.captured
    }

    /// The earliest capture is the authoritative one.
    pub fn first_captured(&self) -> Option<&str> {
        self.captured.first().map(String::as_str)
    }
}

impl Default for ResponseWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DOCUMENT_PATTERN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_responses_before_begin_watch() {
        let mut watcher = ResponseWatcher::default();
        assert!(!watcher.on_response("https://iss.example/Modelo09Imobiliario?x=1"));
        assert!(watcher.captured().is_empty());
    }

    #[test]
    fn test_captures_only_matching_urls() {
        let mut watcher = ResponseWatcher::default();
        watcher.begin_watch();

        assert!(!watcher.on_response("https://iss.example/sefaz/jsp/cnd/style.css"));
        assert!(watcher.on_response("https://iss.example/report/Modelo09Imobiliario?id=7"));
        assert_eq!(watcher.captured().len(), 1);
    }

    #[test]
    fn test_first_capture_is_authoritative() {
        let mut watcher = ResponseWatcher::new("Modelo09");
        watcher.begin_watch();
        watcher.on_response("https://a/Modelo09?id=1");
        watcher.on_response("https://a/Modelo09?id=2");
        watcher.on_response("https://a/Modelo09?id=1");

        assert_eq!(watcher.captured().len(), 2);
        assert_eq!(watcher.first_captured(), Some("https://a/Modelo09?id=1"));
    }

    #[test]
    fn test_begin_watch_resets_previous_window() {
        let mut watcher = ResponseWatcher::default();
        watcher.begin_watch();
        watcher.on_response("https://a/Modelo09Imobiliario?id=1");
        watcher.end_watch();
        assert!(!watcher.on_response("https://a/Modelo09Imobiliario?id=2"));

        watcher.begin_watch();
        assert!(watcher.first_captured().is_none());
        assert!(watcher.is_armed());
    }
}
