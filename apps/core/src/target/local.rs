//! Local-disk write target.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use filetime::FileTime;

use super::{Target, TargetStat};

/// Destination rooted in the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTarget;

impl Target for LocalTarget {
    fn name(&self) -> &'static str {
        "local"
    }

    fn stat(&self, path: &Path) -> io::Result<Option<TargetStat>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(TargetStat {
                size: meta.len(),
                atime: meta.accessed().ok(),
                mtime: meta.modified().ok(),
                is_dir: meta.is_dir(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn set_times(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> io::Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_system_time(atime),
            FileTime::from_system_time(mtime),
        )
    }

    fn read_to(&self, path: &Path, writer: &mut dyn Write) -> io::Result<u64> {
        let mut file = File::open(path)?;
        io::copy(&mut file, writer)
    }

    fn write_from(&self, path: &Path, reader: &mut dyn Read) -> io::Result<u64> {
        let mut file = File::create(path)?;
        io::copy(reader, &mut file)
    }
}
