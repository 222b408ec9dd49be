//! In-flight registry: at most one running turn per session

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use sessionstore::{LockStore, StoreError};
use tracing::{debug, warn};

use crate::config::{JobsConfig, RegistryKind};

/// Exclusive per-session claim held while a turn runs
pub trait InFlightRegistry: Send + Sync {
    /// Claim the session for `holder`; false when someone else holds it
    fn try_acquire(&self, session: &str, holder: &str) -> Result<bool, StoreError>;

    /// Drop the claim if `holder` still owns it
    fn release(&self, session: &str, holder: &str) -> Result<(), StoreError>;

    /// Refresh the claim; false when `holder` no longer owns it
    fn heartbeat(&self, session: &str, holder: &str) -> Result<bool, StoreError>;

    fn is_held(&self, session: &str) -> Result<bool, StoreError>;
}

/// Volatile registry, lost on restart
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    held: Mutex<HashMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // Entries stay consistent even if a holder panicked mid-operation
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InFlightRegistry for MemoryRegistry {
    fn try_acquire(&self, session: &str, holder: &str) -> Result<bool, StoreError> {
        debug!(%session, %holder, "MemoryRegistry::try_acquire: called");
        let mut held = self.held();
        if let Some(current) = held.get(session) {
            return Ok(current == holder);
        }
        held.insert(session.to_string(), holder.to_string());
        Ok(true)
    }

    fn release(&self, session: &str, holder: &str) -> Result<(), StoreError> {
        debug!(%session, %holder, "MemoryRegistry::release: called");
        let mut held = self.held();
        if held.get(session).is_some_and(|h| h == holder) {
            held.remove(session);
        }
        Ok(())
    }

    fn heartbeat(&self, session: &str, holder: &str) -> Result<bool, StoreError> {
        Ok(self.held().get(session).is_some_and(|h| h == holder))
    }

    fn is_held(&self, session: &str) -> Result<bool, StoreError> {
        Ok(self.held().contains_key(session))
    }
}

/// Durable registry backed by lock record files
#[derive(Debug, Clone)]
pub struct LockFileRegistry {
    locks: LockStore,
}

impl LockFileRegistry {
    pub fn new(sessions_dir: impl AsRef<Path>, ttl_secs: u64) -> Self {
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            locks: LockStore::new(sessions_dir).with_ttl_ms(ttl_ms),
        }
    }
}

impl InFlightRegistry for LockFileRegistry {
    fn try_acquire(&self, session: &str, holder: &str) -> Result<bool, StoreError> {
        match self.locks.acquire(session, holder) {
            Ok(_) => Ok(true),
            Err(StoreError::LockHeld { holder: current, .. }) => {
                debug!(%session, %current, "LockFileRegistry::try_acquire: held");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn release(&self, session: &str, holder: &str) -> Result<(), StoreError> {
        self.locks.release(session, holder)
    }

    fn heartbeat(&self, session: &str, holder: &str) -> Result<bool, StoreError> {
        let refreshed = self.locks.heartbeat(session, holder)?;
        if !refreshed {
            warn!(%session, %holder, "Heartbeat for a lock this holder no longer owns");
        }
        Ok(refreshed)
    }

    fn is_held(&self, session: &str) -> Result<bool, StoreError> {
        self.locks.is_held(session)
    }
}

/// Registry selected by config
pub fn build_registry(config: &JobsConfig, sessions_dir: &Path) -> Arc<dyn InFlightRegistry> {
    debug!(registry = ?config.registry, "build_registry: called");
    match config.registry {
        RegistryKind::File => Arc::new(LockFileRegistry::new(sessions_dir, config.lock_ttl_secs)),
        RegistryKind::Memory => Arc::new(MemoryRegistry::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(registry: &dyn InFlightRegistry) {
        assert!(registry.try_acquire("amber-falcon", "job-1").unwrap());
        assert!(!registry.try_acquire("amber-falcon", "job-2").unwrap());
        assert!(registry.is_held("amber-falcon").unwrap());
        assert!(registry.heartbeat("amber-falcon", "job-1").unwrap());
        assert!(!registry.heartbeat("amber-falcon", "job-2").unwrap());

        // A stranger cannot release someone else's claim
        registry.release("amber-falcon", "job-2").unwrap();
        assert!(registry.is_held("amber-falcon").unwrap());

        registry.release("amber-falcon", "job-1").unwrap();
        assert!(!registry.is_held("amber-falcon").unwrap());
        assert!(registry.try_acquire("amber-falcon", "job-2").unwrap());
    }

    #[test]
    fn test_memory_registry() {
        exercise(&MemoryRegistry::new());
    }

    #[test]
    fn test_lock_file_registry() {
        let temp = TempDir::new().unwrap();
        exercise(&LockFileRegistry::new(temp.path(), 600));
    }

    #[test]
    fn test_lock_file_registry_survives_reopen() {
        let temp = TempDir::new().unwrap();
        assert!(LockFileRegistry::new(temp.path(), 600).try_acquire("s", "job-1").unwrap());

        let reopened = LockFileRegistry::new(temp.path(), 600);
        assert!(reopened.is_held("s").unwrap());
        assert!(!reopened.try_acquire("s", "job-2").unwrap());
    }

    #[test]
    fn test_expired_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let registry = LockFileRegistry::new(temp.path(), 0);
        assert!(registry.try_acquire("s", "job-1").unwrap());
        assert!(registry.try_acquire("s", "job-2").unwrap());
    }
}
