//! Error taxonomy for the export engine.
//!
//! Load and schema problems abort an export before any work is scheduled;
//! per-file I/O errors stay isolated to their item. History append failures
//! are logged by the copy engine and never surface here.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Bad flags or connection string, rejected before any work starts.
    #[error("{0}")]
    Config(String),

    /// A metadata document is missing or failed to parse.
    #[error("load '{}' failed", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Malformed smart folder rule/condition, or a missing `"all"` index key.
    #[error("{0}")]
    Schema(String),

    /// An open/stat/copy/mkdir/chtimes operation failed.
    #[error("{op} failed, path: {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Remote target dial, authentication or mount failure.
    #[error("connect to '{target}' failed")]
    Connection {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The cancellation token was set before the export drained.
    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    pub(crate) fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn load(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Load {
            path: path.to_path_buf(),
            source: Box::new(source),
        }
    }
}
