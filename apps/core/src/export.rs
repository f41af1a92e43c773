//! Export engine - incremental copy of library items into a write target.
//!
//! [`Library::export`] loads the metadata documents, compiles the smart
//! folder classifier, then fans per-item copy tasks out over a rayon pool
//! sized to the machine. Task errors never cancel siblings: the pool drains
//! completely and the first recorded error is reported. A [`CancelToken`] lets
//! the caller abort between I/O steps.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::ExportError;
use crate::history::{History, HistoryEntry};
use crate::metadata::{self, INDEX_TOTAL_KEY};
use crate::rules::Classifier;
use crate::target::Target;

/// Shared flag checked between I/O steps; a cancelled export drains tasks
/// already started and reports [`ExportError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for one export run.
#[derive(Clone, Default)]
pub struct ExportOptions {
    /// Copy even when timestamps say the destination is current.
    pub overwrite: bool,
    /// Remove the destination tree before exporting.
    pub force_clean: bool,
    /// Place files under their matching smart folder (or `uncategorized`).
    pub group_by_folder: bool,
    /// Item progress; length is set from the index's `"all"` count.
    pub item_bar: Option<ProgressBar>,
    /// Byte throughput progress.
    pub byte_bar: Option<ProgressBar>,
    pub cancel: CancelToken,
}

/// Result of one file's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Bytes were written to the destination.
    Copied(u64),
    /// The destination was already current; nothing was written.
    Skipped,
}

/// Aggregate counters for a finished export.
/// `items` is every index entry visited, `copied + skipped + deleted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportSummary {
    pub items: u64,
    pub copied: u64,
    pub skipped: u64,
    /// Soft-deleted records, never exported.
    pub deleted: u64,
    pub bytes_copied: u64,
}

#[derive(Default)]
struct Counters {
    items: AtomicU64,
    copied: AtomicU64,
    skipped: AtomicU64,
    deleted: AtomicU64,
    bytes_copied: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExportSummary {
        ExportSummary {
            items: self.items.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// An opened library plus the write target and optional copy history.
pub struct Library {
    base_dir: PathBuf,
    target: Arc<dyn Target>,
    history: Option<History>,
}

impl Library {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        target: Arc<dyn Target>,
        history: Option<History>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            target,
            history,
        }
    }

    /// Closes the library, flushing the copy history. Call after all exports
    /// are done; consuming `self` makes a second close unrepresentable.
    pub fn close(self) -> std::io::Result<()> {
        match self.history {
            Some(history) => history.close(),
            None => Ok(()),
        }
    }

    /// Exports every live item into `output_dir`. Blocks until all scheduled
    /// tasks finish; the first recorded task error is returned after the pool
    /// drains, without cancelling siblings.
    pub fn export(
        &self,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<ExportSummary, ExportError> {
        if options.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        if options.force_clean {
            self.target
                .remove_all(output_dir)
                .map_err(|err| ExportError::io("clean destination", output_dir, err))?;
        }

        let index = metadata::load_index(&self.base_dir)?;
        let info = metadata::load_library_info(&self.base_dir)?;
        let classifier = Classifier::compile(&info)?;

        // load_index guarantees the key
        let total = index[INDEX_TOTAL_KEY];
        if let Some(bar) = &options.item_bar {
            bar.set_length(total.max(0) as u64);
        }

        let counters = Counters::default();
        let first_error: Mutex<Option<ExportError>> = Mutex::new(None);

        // Independent per-item tasks on the global rayon pool, one worker per
        // hardware thread. The history cache is the only shared mutable state.
        index
            .par_iter()
            .filter(|(id, _)| id.as_str() != INDEX_TOTAL_KEY)
            .for_each(|(id, index_mtime_ms)| {
                counters.items.fetch_add(1, Ordering::Relaxed);
                if options.cancel.is_cancelled() {
                    record_first(&first_error, ExportError::Cancelled);
                    return;
                }
                match self.export_item(id, *index_mtime_ms, output_dir, &classifier, options) {
                    Ok(Some(CopyOutcome::Copied(bytes))) => {
                        counters.copied.fetch_add(1, Ordering::Relaxed);
                        counters.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
                    }
                    Ok(Some(CopyOutcome::Skipped)) => {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        counters.deleted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => record_first(&first_error, err),
                }
            });

        if let Some(bar) = &options.item_bar {
            bar.set_position(total.max(0) as u64);
        }

        match first_error.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(counters.snapshot()),
        }
    }

    /// One item's task: load its record, resolve the destination, copy.
    /// Returns `Ok(None)` for soft-deleted records.
    fn export_item(
        &self,
        id: &str,
        index_mtime_ms: i64,
        output_dir: &Path,
        classifier: &Classifier,
        options: &ExportOptions,
    ) -> Result<Option<CopyOutcome>, ExportError> {
        let record = metadata::load_file_record(&self.base_dir, id)?;
        if record.is_deleted {
            debug!(id, "skipping deleted record");
            return Ok(None);
        }

        let file_name = record.file_name();
        let src = metadata::item_info_dir(&self.base_dir, id).join(&file_name);
        let dst = if options.group_by_folder {
            match classifier.classify(&record) {
                Some(folder) => output_dir.join(folder).join(&file_name),
                None => output_dir.join("uncategorized").join(&file_name),
            }
        } else {
            output_dir.join(&file_name)
        };

        let outcome = self.copy_file(&src, &dst, index_mtime_ms, options)?;
        if let Some(bar) = &options.item_bar {
            bar.inc(1);
        }
        Ok(Some(outcome))
    }

    /// Incremental copy of one file.
    ///
    /// The copy is skipped when the history records the source's exact mtime
    /// and the destination exists, or when no trigger holds:
    /// source/destination mtime mismatch, index-vs-destination millisecond
    /// mismatch, or `overwrite`. An absent destination always copies, history
    /// hit or not. The destination is only opened for writing once a copy is
    /// decided, so skipped files keep their bytes and timestamps untouched.
    fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        index_mtime_ms: i64,
        options: &ExportOptions,
    ) -> Result<CopyOutcome, ExportError> {
        let mut src_file =
            File::open(src).map_err(|err| ExportError::io("open source file", src, err))?;
        let src_meta = src_file
            .metadata()
            .map_err(|err| ExportError::io("stat source file", src, err))?;
        let src_size = src_meta.len();
        let src_mtime = src_meta
            .modified()
            .map_err(|err| ExportError::io("stat source file", src, err))?;
        let src_atime = src_meta.accessed().unwrap_or(src_mtime);

        if let Some(parent) = dst.parent() {
            self.target
                .mkdir_all(parent)
                .map_err(|err| ExportError::io("create destination directory", parent, err))?;
        }

        if options.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let dst_stat = self
            .target
            .stat(dst)
            .map_err(|err| ExportError::io("stat destination file", dst, err))?;

        // the history is only trusted while the destination is still there;
        // a cleaned destination must be repopulated
        if let (Some(history), Some(_)) = (&self.history, &dst_stat) {
            if history.get(src) == Some(DateTime::<Utc>::from(src_mtime)) {
                // already synchronized in a prior run; the bytes still count
                // toward throughput and the item toward progress
                debug!(src = %src.display(), "history hit, skipping copy");
                if let Some(bar) = &options.byte_bar {
                    bar.inc(src_size);
                }
                return Ok(CopyOutcome::Skipped);
            }
        }

        let needs_copy = match &dst_stat {
            None => true,
            Some(stat) => {
                options.overwrite
                    || stat.mtime != Some(src_mtime)
                    || stat.mtime.map(epoch_millis) != Some(index_mtime_ms)
            }
        };
        if !needs_copy {
            return Ok(CopyOutcome::Skipped);
        }

        if options.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let bytes = self
            .target
            .write_from(dst, &mut src_file)
            .map_err(|err| ExportError::io("copy to destination", dst, err))?;
        if let Some(bar) = &options.byte_bar {
            bar.inc(bytes);
        }

        self.target
            .set_times(dst, src_atime, src_mtime)
            .map_err(|err| ExportError::io("set destination times", dst, err))?;

        if let Some(history) = &self.history {
            if let Err(err) = history.append(HistoryEntry::new(src, src_mtime)) {
                // cache failures never fail a copy
                warn!(error = %err, src = %src.display(), "history append failed");
            }
        }

        Ok(CopyOutcome::Copied(bytes))
    }
}

fn epoch_millis(when: SystemTime) -> i64 {
    match when.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(err) => -(err.duration().as_millis() as i64),
    }
}

fn record_first(slot: &Mutex<Option<ExportError>>, err: ExportError) {
    let mut slot = slot.lock().unwrap();
    if slot.is_none() {
        *slot = Some(err);
    }
}
