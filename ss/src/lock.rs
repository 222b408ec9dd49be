//! Durable per-session lock records
//!
//! A lock is a `<name>.lock` JSON file next to the session file. Acquisition is
//! serialized across processes by an exclusive `fs2` lock on `.locks.guard`, so
//! the read-check-write sequence is atomic even with several daemons or job
//! processes pointed at the same directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::names::is_valid_name;
use crate::now_ms;

/// Default time-to-live for a lock without a heartbeat
pub const DEFAULT_LOCK_TTL_MS: i64 = 10 * 60 * 1000;

const GUARD_FILE: &str = ".locks.guard";

/// Ownership record for an in-flight turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub session_name: String,
    /// Opaque holder id, usually the job id
    pub holder: String,
    pub acquired_at: i64,
    pub heartbeat_at: i64,
    pub expires_at: i64,
}

impl LockRecord {
    /// True once the record has outlived its last heartbeat
    pub fn is_expired(&self) -> bool {
        self.expires_at <= now_ms()
    }
}

/// Holds the guard file lock until dropped
struct Guard(File);

impl Drop for Guard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            warn!(error = %e, "Failed to unlock lock guard");
        }
    }
}

/// File-backed lock records
#[derive(Debug, Clone)]
pub struct LockStore {
    dir: PathBuf,
    ttl_ms: i64,
}

impl LockStore {
    /// Lock records in `dir` with the default TTL
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ttl_ms: DEFAULT_LOCK_TTL_MS,
        }
    }

    /// Override the TTL applied on acquire and heartbeat
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    fn guard(&self) -> Result<Guard, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(GUARD_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Guard(file))
    }

    fn read(&self, name: &str) -> Result<Option<LockRecord>, StoreError> {
        match fs::read_to_string(self.path_for(name)) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    // A torn record cannot name a live holder
                    warn!(%name, error = %e, "Ignoring unreadable lock record");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, record: &LockRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.session_name);
        let tmp = self.dir.join(format!(".{}.lock.tmp", record.session_name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string(record)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Acquire the lock for a session
    ///
    /// Rejects with `LockHeld` when an unexpired record exists for another
    /// holder. An expired record is taken over.
    pub fn acquire(&self, name: &str, holder: &str) -> Result<LockRecord, StoreError> {
        debug!(%name, %holder, "LockStore::acquire: called");
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let _guard = self.guard()?;

        if let Some(existing) = self.read(name)? {
            if !existing.is_expired() && existing.holder != holder {
                debug!(%name, holder = %existing.holder, "LockStore::acquire: held");
                return Err(StoreError::LockHeld {
                    name: name.to_string(),
                    holder: existing.holder,
                });
            }
            if existing.is_expired() {
                warn!(%name, stale_holder = %existing.holder, "Taking over expired session lock");
            }
        }

        let now = now_ms();
        let record = LockRecord {
            session_name: name.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            heartbeat_at: now,
            expires_at: now + self.ttl_ms,
        };
        self.write(&record)?;

        info!(session = %name, %holder, "Acquired session lock");
        Ok(record)
    }

    /// Refresh the expiry of a lock this holder owns
    ///
    /// Returns false when the lock is gone or owned by someone else.
    pub fn heartbeat(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        let _guard = self.guard()?;

        let Some(mut record) = self.read(name)? else {
            debug!(%name, "LockStore::heartbeat: no record");
            return Ok(false);
        };
        if record.holder != holder {
            debug!(%name, owner = %record.holder, %holder, "LockStore::heartbeat: not owner");
            return Ok(false);
        }

        let now = now_ms();
        record.heartbeat_at = now;
        record.expires_at = now + self.ttl_ms;
        self.write(&record)?;
        debug!(%name, "LockStore::heartbeat: refreshed");
        Ok(true)
    }

    /// Release a lock owned by this holder
    ///
    /// A lock owned by a different holder (after takeover) is left alone.
    pub fn release(&self, name: &str, holder: &str) -> Result<(), StoreError> {
        debug!(%name, %holder, "LockStore::release: called");
        let _guard = self.guard()?;

        match self.read(name)? {
            Some(record) if record.holder != holder => {
                warn!(%name, owner = %record.holder, %holder, "Not releasing lock owned by another holder");
                Ok(())
            }
            _ => match fs::remove_file(self.path_for(name)) {
                Ok(()) => {
                    info!(session = %name, %holder, "Released session lock");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Current lock record, expired or not
    pub fn get(&self, name: &str) -> Result<Option<LockRecord>, StoreError> {
        self.read(name)
    }

    /// True when an unexpired lock exists
    pub fn is_held(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.read(name)?.is_some_and(|r| !r.is_expired()))
    }

    /// All lock records in the directory
    pub fn list(&self) -> Result<Vec<LockRecord>, StoreError> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "lock") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str())
                && let Some(record) = self.read(name)?
            {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_then_reject_other_holder() {
        let temp = TempDir::new().unwrap();
        let locks = LockStore::new(temp.path());

        locks.acquire("amber-falcon", "job-a").unwrap();
        let err = locks.acquire("amber-falcon", "job-b").unwrap_err();
        match err {
            StoreError::LockHeld { holder, .. } => assert_eq!(holder, "job-a"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(locks.is_held("amber-falcon").unwrap());
    }

    #[test]
    fn test_release_allows_reacquire() {
        let temp = TempDir::new().unwrap();
        let locks = LockStore::new(temp.path());

        locks.acquire("amber-falcon", "job-a").unwrap();
        locks.release("amber-falcon", "job-a").unwrap();
        assert!(!locks.is_held("amber-falcon").unwrap());
        locks.acquire("amber-falcon", "job-b").unwrap();
    }

    #[test]
    fn test_expired_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let stale = LockStore::new(temp.path()).with_ttl_ms(-1);
        stale.acquire("amber-falcon", "job-a").unwrap();

        let locks = LockStore::new(temp.path());
        let record = locks.acquire("amber-falcon", "job-b").unwrap();
        assert_eq!(record.holder, "job-b");
    }

    #[test]
    fn test_release_ignores_foreign_holder() {
        let temp = TempDir::new().unwrap();
        let locks = LockStore::new(temp.path());

        locks.acquire("amber-falcon", "job-a").unwrap();
        locks.release("amber-falcon", "job-b").unwrap();
        assert!(locks.is_held("amber-falcon").unwrap());
    }

    #[test]
    fn test_heartbeat_extends_expiry() {
        let temp = TempDir::new().unwrap();
        let locks = LockStore::new(temp.path());

        let first = locks.acquire("amber-falcon", "job-a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(locks.heartbeat("amber-falcon", "job-a").unwrap());
        let after = locks.get("amber-falcon").unwrap().unwrap();
        assert!(after.expires_at > first.expires_at);

        assert!(!locks.heartbeat("amber-falcon", "job-b").unwrap());
        assert!(!locks.heartbeat("quiet-harbor", "job-a").unwrap());
    }

    #[test]
    fn test_list_records() {
        let temp = TempDir::new().unwrap();
        let locks = LockStore::new(temp.path());
        locks.acquire("amber-falcon", "job-a").unwrap();
        locks.acquire("quiet-harbor", "job-b").unwrap();

        let records = locks.list().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dir = dir.clone();
                std::thread::spawn(move || LockStore::new(&dir).acquire("amber-falcon", &format!("job-{i}")).is_ok())
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);
    }
}
