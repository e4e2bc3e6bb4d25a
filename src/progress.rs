//! Progress reporting sink.
//!
//! Callers receive human-readable status strings throughout the pipeline.
//! The sink is fire-and-forget: it has no return value and must never
//! block the pipeline, so implementations should hand messages off (to a
//! channel, a UI queue) rather than doing work inline.

use std::sync::Arc;
use tracing::info;

/// Callback invoked with status strings. Must not block.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional sink plus structured logging; every message also lands in the
/// tracing stream so headless runs stay observable.
#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<ProgressSink>,
}

impl Progress {
    pub fn new(sink: Option<ProgressSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, message: &str) {
        if let Some(sink) = &self.sink {
            sink(message);
        }
        info!("{message}");
    }

    /// Clone of the raw sink, for handing to another component.
    pub fn sink(&self) -> Option<ProgressSink> {
        self.sink.clone()
    }

    /// A new `Progress` that prefixes every message, used by workers to
    /// tag per-item output.
    pub fn with_prefix(&self, prefix: &str) -> Progress {
        match &self.sink {
            Some(sink) => {
                let sink = sink.clone();
                let prefix = prefix.to_string();
                Progress {
                    sink: Some(Arc::new(move |msg: &str| sink(&format!("[{prefix}] {msg}")))),
                }
            }
            None => Progress::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let progress = Progress::new(Some(Arc::new(move |msg: &str| {
            sink_seen.lock().push(msg.to_string());
        })));
        progress.emit("hello");
        assert_eq!(seen.lock().as_slice(), ["hello".to_string()]);
    }

    #[test]
    fn test_prefix_tags_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let progress = Progress::new(Some(Arc::new(move |msg: &str| {
            sink_seen.lock().push(msg.to_string());
        })));
        progress.with_prefix("CJU").emit("searching");
        assert_eq!(seen.lock().as_slice(), ["[CJU] searching".to_string()]);
    }

    #[test]
    fn test_no_sink_is_silent() {
        Progress::default().emit("dropped");
    }
}
