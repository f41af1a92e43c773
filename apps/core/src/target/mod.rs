//! Write targets - where exported files land.
//!
//! The copy engine and orchestrator never touch the destination filesystem
//! directly; they go through the [`Target`] capability trait, implemented by
//! [`LocalTarget`] for a plain directory tree and [`SftpTarget`] for a network
//! share.

pub mod local;
pub mod sftp;

pub use local::LocalTarget;
pub use sftp::SftpTarget;

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

/// Metadata of a destination entry.
#[derive(Debug, Clone)]
pub struct TargetStat {
    pub size: u64,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub is_dir: bool,
}

/// Uniform filesystem capability over the destination.
///
/// Implementations must be safe to call from multiple workers at once;
/// `mkdir_all` in particular must tolerate concurrent creation of the same
/// directory.
pub trait Target: Send + Sync {
    /// Short implementation name for logs.
    fn name(&self) -> &'static str;

    /// Stats `path`; `Ok(None)` when it does not exist.
    fn stat(&self, path: &Path) -> io::Result<Option<TargetStat>>;

    /// Creates `path` and every missing ancestor. Already existing is success.
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes `path` recursively. A missing path is success.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Sets access and modification times on an existing entry.
    fn set_times(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> io::Result<()>;

    /// Streams the file at `path` into `writer`. Returns bytes read.
    fn read_to(&self, path: &Path, writer: &mut dyn Write) -> io::Result<u64>;

    /// Creates (or truncates) the file at `path` from `reader`. Returns bytes
    /// written.
    fn write_from(&self, path: &Path, reader: &mut dyn Read) -> io::Result<u64>;
}
