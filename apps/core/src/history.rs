//! Persistent copy history.
//!
//! An append-only, newline-delimited JSON log of `(source path, mtime)` pairs.
//! The log is never rewritten in place; replaying it rebuilds an in-memory map
//! where the most recently appended entry per path wins. Workers read the map
//! concurrently while appends are serialized through a single writer.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One record of the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub path: PathBuf,
    pub mtime: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(path: impl Into<PathBuf>, mtime: SystemTime) -> Self {
        Self {
            path: path.into(),
            mtime: mtime.into(),
        }
    }
}

/// Durable record of previously copied files.
pub struct History {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
    data: RwLock<HashMap<PathBuf, DateTime<Utc>>>,
}

impl History {
    /// Opens the log at `path`, creating it if absent. Call [`History::load`]
    /// to replay existing records.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
            data: RwLock::new(HashMap::new()),
        })
    }

    /// Replays the whole log into the in-memory map. Later entries overwrite
    /// earlier ones for the same path. A malformed record stops the replay
    /// with a warning; everything parsed up to that point is kept.
    pub fn load(&self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        let mut data = HashMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => {
                    data.insert(entry.path, entry.mtime);
                }
                Err(err) => {
                    warn!(error = %err, "malformed history record, stopping replay");
                    break;
                }
            }
        }
        info!(entries = data.len(), "history loaded");
        *self.data.write().unwrap() = data;
        Ok(())
    }

    /// Last recorded modification time for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.data.read().unwrap().get(path).copied()
    }

    /// Durably appends one record and updates the in-memory map.
    pub fn append(&self, entry: HistoryEntry) -> io::Result<()> {
        let line = serde_json::to_string(&entry)?;
        {
            let mut writer = self.writer.lock().unwrap();
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        self.data.write().unwrap().insert(entry.path, entry.mtime);
        Ok(())
    }

    /// Number of effective (distinct-path) entries.
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes and releases the underlying handle. Taking `self` by value
    /// rules out double-close and use-after-close at compile time.
    pub fn close(self) -> io::Result<()> {
        let mut writer = self.writer.into_inner().unwrap();
        writer.flush()
    }
}
