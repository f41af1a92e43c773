//! Network-share write target over SFTP.
//!
//! One authenticated session serves all workers; libssh2 sessions are not
//! thread safe, so every operation takes the session mutex and whole-file
//! transfers happen under it.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ssh2::{ErrorCode, FileStat, Session, Sftp};
use tracing::debug;

use super::{Target, TargetStat};
use crate::error::ExportError;

// SSH_FX_NO_SUCH_FILE / SSH_FX_NO_SUCH_PATH
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

struct Remote {
    // Keeps the authenticated session (and its TCP stream) alive for as long
    // as the sftp channel is in use.
    _session: Session,
    sftp: Sftp,
}

/// Destination on an SFTP share.
pub struct SftpTarget {
    inner: Mutex<Remote>,
}

impl SftpTarget {
    /// Dials `addr` (`host` or `host:port`, port defaults to 22) and
    /// authenticates with the given credentials.
    pub fn connect(addr: &str, user: &str, password: &str) -> Result<Self, ExportError> {
        let addr = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{addr}:22")
        };

        let connect = |err: io::Error| ExportError::Connection {
            target: addr.clone(),
            source: err,
        };

        let stream = TcpStream::connect(&addr).map_err(connect)?;
        let mut session = Session::new().map_err(|err| connect(io::Error::other(err)))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|err| connect(io::Error::other(err)))?;
        session
            .userauth_password(user, password)
            .map_err(|err| connect(io::Error::other(err)))?;
        let sftp = session
            .sftp()
            .map_err(|err| connect(io::Error::other(err)))?;
        debug!(addr = %addr, user = %user, "sftp session established");

        Ok(Self {
            inner: Mutex::new(Remote {
                _session: session,
                sftp,
            }),
        })
    }
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH)
    )
}

fn to_io(err: ssh2::Error) -> io::Error {
    if is_not_found(&err) {
        io::Error::new(io::ErrorKind::NotFound, err)
    } else {
        io::Error::other(err)
    }
}

fn to_system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn to_epoch_secs(when: SystemTime) -> u64 {
    when.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn remove_all_inner(sftp: &Sftp, path: &Path) -> io::Result<()> {
    let stat = match sftp.stat(path) {
        Ok(stat) => stat,
        Err(err) if is_not_found(&err) => return Ok(()),
        Err(err) => return Err(to_io(err)),
    };
    if stat.is_dir() {
        // readdir skips `.` and `..` and yields joined paths
        for (child, _) in sftp.readdir(path).map_err(to_io)? {
            remove_all_inner(sftp, &child)?;
        }
        sftp.rmdir(path).map_err(to_io)
    } else {
        sftp.unlink(path).map_err(to_io)
    }
}

impl Target for SftpTarget {
    fn name(&self) -> &'static str {
        "sftp"
    }

    fn stat(&self, path: &Path) -> io::Result<Option<TargetStat>> {
        let remote = self.inner.lock().unwrap();
        match remote.sftp.stat(path) {
            Ok(stat) => Ok(Some(TargetStat {
                size: stat.size.unwrap_or(0),
                atime: stat.atime.map(to_system_time),
                mtime: stat.mtime.map(to_system_time),
                is_dir: stat.is_dir(),
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(to_io(err)),
        }
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        let remote = self.inner.lock().unwrap();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if remote.sftp.stat(&current).is_ok() {
                continue;
            }
            if let Err(err) = remote.sftp.mkdir(&current, 0o755) {
                // lost a creation race, or a genuine failure
                if remote.sftp.stat(&current).is_err() {
                    return Err(to_io(err));
                }
            }
        }
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let remote = self.inner.lock().unwrap();
        remove_all_inner(&remote.sftp, path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let remote = self.inner.lock().unwrap();
        remote.sftp.rename(from, to, None).map_err(to_io)
    }

    fn set_times(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> io::Result<()> {
        let remote = self.inner.lock().unwrap();
        remote
            .sftp
            .setstat(
                path,
                FileStat {
                    size: None,
                    uid: None,
                    gid: None,
                    perm: None,
                    atime: Some(to_epoch_secs(atime)),
                    mtime: Some(to_epoch_secs(mtime)),
                },
            )
            .map_err(to_io)
    }

    fn read_to(&self, path: &Path, writer: &mut dyn Write) -> io::Result<u64> {
        let remote = self.inner.lock().unwrap();
        let mut file = remote.sftp.open(path).map_err(to_io)?;
        io::copy(&mut file, writer)
    }

    fn write_from(&self, path: &Path, reader: &mut dyn Read) -> io::Result<u64> {
        let remote = self.inner.lock().unwrap();
        let mut file = remote.sftp.create(path).map_err(to_io)?;
        io::copy(reader, &mut file)
    }
}
