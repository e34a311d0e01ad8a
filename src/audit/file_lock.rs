//! Single-writer guard for an audit log directory.
//!
//! Two processes appending to one log would fork its hash chain, so opening
//! a log first takes an exclusive OS lock on `audit.lock`. The holder writes
//! its pid and start time into that file; a refused opener reads it back to
//! say who owns the log.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const LOCK_FILE: &str = "audit.lock";

/// Process that currently owns an audit directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// OS process id.
    pub pid: u32,
    /// When the lock was taken.
    pub since: DateTime<Utc>,
}

/// Held exclusive lock on an audit directory; released on drop.
#[derive(Debug)]
pub struct AuditDirLock {
    _file: File,
    path: PathBuf,
    holder: LockHolder,
}

impl AuditDirLock {
    /// Locks `dir` without waiting.
    ///
    /// Fails with `ErrorKind::WouldBlock`, naming the current holder when it
    /// can be read, if the directory is already locked.
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(err) = os::try_lock_exclusive(&file) {
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
            let holder = read_holder(&mut file).map_or_else(
                || "another process".to_string(),
                |h| format!("pid {} since {}", h.pid, h.since.to_rfc3339()),
            );
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("audit log {} is held by {holder}", dir.display()),
            ));
        }

        let holder = LockHolder {
            pid: std::process::id(),
            since: Utc::now(),
        };
        write_holder(&mut file, &holder)?;
        Ok(Self {
            _file: file,
            path,
            holder,
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// This process's claim on the directory.
    #[must_use]
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut body = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut body).ok()?;
    serde_json::from_str(body.trim()).ok()
}

fn write_holder(file: &mut File, holder: &LockHolder) -> IoResult<()> {
    let body = serde_json::to_vec(holder).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&body)?;
    file.sync_data()
}

#[cfg(unix)]
mod os {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};
    use std::os::unix::io::AsRawFd;

    pub(super) fn try_lock_exclusive(file: &File) -> IoResult<()> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(());
        }
        let err = IoError::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK => Err(IoError::from(ErrorKind::WouldBlock)),
            _ => Err(err),
        }
    }
}

#[cfg(windows)]
mod os {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub(super) fn try_lock_exclusive(file: &File) -> IoResult<()> {
        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data.
        let locked = unsafe {
            let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if locked != 0 {
            return Ok(());
        }
        let err = IoError::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_LOCK_VIOLATION as i32 => {
                Err(IoError::from(ErrorKind::WouldBlock))
            }
            _ => Err(err),
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};

    pub(super) fn try_lock_exclusive(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "audit directory locking is not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_names_the_holder() {
        let dir = tempdir().unwrap();
        let first = AuditDirLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());
        assert_eq!(first.holder().pid, std::process::id());

        let err = AuditDirLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        #[cfg(unix)]
        assert!(err.to_string().contains(&format!("pid {}", std::process::id())));

        drop(first);
        let second = AuditDirLock::acquire(dir.path()).unwrap();
        assert_eq!(second.holder().pid, std::process::id());
    }

    #[test]
    fn stale_holder_text_is_overwritten() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), b"not json at all, left by a crash").unwrap();

        let lock = AuditDirLock::acquire(dir.path()).unwrap();
        let body = std::fs::read_to_string(lock.path()).unwrap();
        let parsed: LockHolder = serde_json::from_str(&body).unwrap();
        assert_eq!(&parsed, lock.holder());
    }
}
