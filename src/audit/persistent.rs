//! File-backed audit log.
//!
//! Records are appended as CRC-checked frames to a single file inside the
//! log directory. On open the file is replayed, a torn final frame left by a
//! crash is cut off, and the hash chain is verified before any new append.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::codec;
use super::file_lock::AuditDirLock;
use super::{verify_records, AuditLog, MergeHistory, NewMergeRecord, GENESIS_HASH};
use crate::storage::StorageError;

/// Name of the record file inside the log directory.
pub const LOG_FILE: &str = "merges.log";

struct Inner {
    file: File,
    len: u64,
    records: Vec<MergeHistory>,
}

/// Durable, append-only audit log in a directory.
///
/// Holds an exclusive lock on the directory for its whole lifetime.
pub struct FileAuditLog {
    path: PathBuf,
    inner: Mutex<Inner>,
    sync_on_write: bool,
    _lock: AuditDirLock,
}

impl std::fmt::Debug for FileAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Reads every complete frame, returning the records and the byte length
/// they occupy including the header.
fn replay(path: &Path) -> Result<(Vec<MergeHistory>, u64), StorageError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut records = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    loop {
        match codec::decode::<MergeHistory>(&mut reader) {
            Ok(record) => {
                records.push(record);
                valid_len = reader.stream_position()?;
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(StorageError::BackendError(format!(
                    "audit log {} corrupted after byte {valid_len}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok((records, valid_len))
}

impl FileAuditLog {
    /// Opens or creates the log in `dir`.
    ///
    /// Fails if another process holds the directory, if a frame fails its
    /// checksum, or if the hash chain does not verify.
    pub fn open(dir: impl AsRef<Path>, sync_on_write: bool) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let lock = AuditDirLock::acquire(dir)?;
        let path = dir.join(LOG_FILE);

        let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let (records, len) = if existing >= codec::HEADER_LEN {
            let (records, valid_len) = replay(&path)?;
            if valid_len < existing {
                warn!(
                    path = %path.display(),
                    dropped_bytes = existing - valid_len,
                    "truncating torn audit record"
                );
                OpenOptions::new().write(true).open(&path)?.set_len(valid_len)?;
            }
            (records, valid_len)
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (Vec::new(), codec::HEADER_LEN)
        };

        verify_records(&records)?;
        debug!(
            path = %path.display(),
            records = records.len(),
            pid = lock.holder().pid,
            "audit log opened"
        );

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, len, records }),
            sync_on_write,
            _lock: lock,
        })
    }

    /// Path of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for FileAuditLog {
    fn append(&self, record: NewMergeRecord) -> Result<MergeHistory, StorageError> {
        let mut inner = self.inner.lock().map_err(|_| lock_err("audit.file.append"))?;
        let prev_hash = inner
            .records
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |r| r.record_hash.clone());
        let sealed = MergeHistory::seal(record, inner.records.len() as u64 + 1, prev_hash)?;
        let frame = codec::encode(&sealed)?;

        let written = inner.file.write_all(&frame).and_then(|()| {
            if self.sync_on_write {
                inner.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Drop any partial frame so the next append starts clean.
            let len = inner.len;
            if let Err(cut) = inner.file.set_len(len) {
                warn!(path = %self.path.display(), error = %cut, "failed to cut partial audit frame");
            }
            return Err(StorageError::Io(e));
        }

        inner.len += frame.len() as u64;
        inner.records.push(sealed.clone());
        Ok(sealed)
    }

    fn all(&self) -> Result<Vec<MergeHistory>, StorageError> {
        let inner = self.inner.lock().map_err(|_| lock_err("audit.file.all"))?;
        Ok(inner.records.clone())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let inner = self.inner.lock().map_err(|_| lock_err("audit.file.len"))?;
        Ok(inner.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::record;
    use crate::graph::NodeId;
    use tempfile::tempdir;

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = FileAuditLog::open(dir.path(), true).unwrap();
            log.append(record("2", "1")).unwrap();
            log.append(record("3", "1")).unwrap();
        }

        let log = FileAuditLog::open(dir.path(), false).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        let third = log.append(record("4", "1")).unwrap();
        assert_eq!(third.sequence, 3);
        log.verify_chain().unwrap();

        let history = log.history_for(&NodeId::from("1")).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sequence, 3);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = {
            let log = FileAuditLog::open(dir.path(), false).unwrap();
            log.append(record("2", "1")).unwrap();
            log.path().to_path_buf()
        };

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 200, 0]).unwrap();
        drop(file);

        let log = FileAuditLog::open(dir.path(), false).unwrap();
        assert_eq!(log.len().unwrap(), 1);
        log.append(record("3", "1")).unwrap();
        drop(log);

        let log = FileAuditLog::open(dir.path(), false).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        log.verify_chain().unwrap();
    }

    #[test]
    fn corrupted_frame_fails_open() {
        let dir = tempdir().unwrap();
        let path = {
            let log = FileAuditLog::open(dir.path(), false).unwrap();
            log.append(record("2", "1")).unwrap();
            log.path().to_path_buf()
        };

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x20;
        fs::write(&path, bytes).unwrap();

        let err = FileAuditLog::open(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn directory_is_single_writer() {
        let dir = tempdir().unwrap();
        let _first = FileAuditLog::open(dir.path(), false).unwrap();
        let err = FileAuditLog::open(dir.path(), false).unwrap_err();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == ErrorKind::WouldBlock));
    }
}
