use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// File name of the JSON-lines journal inside an output root.
pub const EVENT_JOURNAL_FILE: &str = "events.jsonl";

/// One successfully materialized event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: String,
    pub kind: String,
    pub capture_url: String,
    pub clip_url: String,
    pub clip_index: u64,
    pub max_confidence: f32,
    /// Whether this event passed the cross-source alert throttle.
    pub alert: bool,
}

/// Append-only log of materialized events, mirrored to a JSON-lines journal.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<EventLogEntry>,
    journal: Option<PathBuf>,
}

impl EventLog {
    /// Also append every entry to `path`.
    pub fn with_journal(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            journal: Some(path.into()),
        }
    }

    /// Record `entry`. The in-memory log always keeps it; an error means
    /// only the journal write failed.
    pub fn append(&mut self, entry: EventLogEntry) -> Result<()> {
        let journaled = match &self.journal {
            Some(path) => append_json_line(path, &entry),
            None => Ok(()),
        };
        self.entries.push(entry);
        journaled
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<EventLogEntry> {
        self.entries
    }
}

fn append_json_line(path: &Path, entry: &EventLogEntry) -> Result<()> {
    let mut line = serde_json::to_string(entry).context("serialize event log entry")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open event journal {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to event journal {}", path.display()))
}
