//! JSON-lines audit trail of publish events

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use ivr_engine::{EventError, EventSink, PublishEvent};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Serialize)]
struct AuditRecord<'a> {
    at: String,
    #[serde(flatten)]
    event: &'a PublishEvent,
}

/// Event sink appending one JSON object per line to a file
pub struct AuditLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLogSink {
    /// Open (or create) the log for appending
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::info!("Writing publish audit log to {:?}", path);
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_at(&self, event: &PublishEvent, at: DateTime<Utc>) -> Result<(), EventError> {
        let record = AuditRecord {
            at: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let mut line = serde_json::to_string(&record).map_err(|e| EventError::new(e.to_string()))?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| EventError::new(format!("audit log {:?}: {}", self.path, e)))
    }
}

impl EventSink for AuditLogSink {
    fn send(&self, event: &PublishEvent) -> Result<(), EventError> {
        self.write_at(event, Utc::now())
    }
}
