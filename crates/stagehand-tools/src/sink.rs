//! Destinations for process output mirrored in real time

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Which pipe a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Receives output lines as a process produces them.
///
/// Called in order from one blocking task per process, outside the capture
/// path. A slow sink delays the command's result until it catches up.
pub trait LineSink: Send + Sync {
    /// Handle one line (without its trailing newline)
    fn line(&self, program: &str, stream: OutputStream, line: &str);
}

/// Sink that emits lines as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, program: &str, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => tracing::info!(target: "stagehand::output", program, "{}", line),
            OutputStream::Stderr => tracing::warn!(target: "stagehand::output", program, "{}", line),
        }
    }
}

/// Sink that collects lines for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl CollectingSink {
    /// All collected lines in arrival order
    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Collected lines from one stream
    pub fn stream(&self, stream: OutputStream) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, l)| l)
            .collect()
    }
}

impl LineSink for CollectingSink {
    fn line(&self, _program: &str, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stream, line.to_string()));
    }
}
