//! Per-query analytics sinks.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

/// One knowledge lookup, as recorded for session analytics.
#[derive(Debug, Clone, Serialize)]
pub struct QueryEvent {
    pub timestamp: String,
    pub context_id: String,
    pub question: String,
    pub chunks_returned: usize,
    pub top_score: Option<f64>,
}

/// Destination for [`QueryEvent`]s. Failures are reported to the caller,
/// which logs and drops them.
pub trait QueryLogSink: Send + Sync {
    fn record(&self, event: &QueryEvent) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlQueryLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl JsonlQueryLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create query log directory {}", parent.display())
                })?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open query log {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueryLogSink for JsonlQueryLog {
    fn record(&self, event: &QueryEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to encode query event")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("query log file lock is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to write query log {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush query log {}", self.path.display()))?;
        Ok(())
    }
}
