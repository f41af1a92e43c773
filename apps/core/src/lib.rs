//! PixPort Core Library
//!
//! Core library for PixPort - exports Eagle-style image libraries.
//! Provides the following capabilities:
//! - Load the library's modification-time index and smart folder definitions
//! - Classify files against compiled smart folder rules
//! - Skip files already copied in a prior run via a persistent copy history
//! - Copy incrementally and in parallel against an abstract write target
//!   (local disk or an SFTP share)
//!
//! Pipeline: Load (index + rules) -> Classify (smart folder) -> Copy (incremental, parallel)

pub mod error;
pub mod export;
pub mod history;
pub mod metadata;
pub mod rules;
pub mod target;

// Re-export main types
pub use error::ExportError;
pub use export::{CancelToken, CopyOutcome, ExportOptions, ExportSummary, Library};
pub use history::{History, HistoryEntry};
pub use metadata::{FileRecord, LibraryInfo, MtimeIndex};
pub use rules::Classifier;
pub use target::{LocalTarget, SftpTarget, Target, TargetStat};
