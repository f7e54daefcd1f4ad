use tokio::sync::broadcast;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 512;

/// Human-readable progress lines for one process.
///
/// Every line goes to the tracing subscriber and to any live subscribers
/// (the SSE relay). Lines sent while nobody listens are simply dropped.
#[derive(Clone)]
pub struct ProgressLog {
    tx: broadcast::Sender<String>,
}

impl ProgressLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn info(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        let _ = self.tx.send(line);
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        warn!("{}", line);
        let _ = self.tx.send(line);
    }

    /// Error lines always carry the ❌ prefix.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        let _ = self.tx.send(format!("❌ {}", message));
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}
