//! Core SessionStore implementation

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::lock::LockStore;
use crate::model::{ErrorMarker, Session, SessionSummary, Turn};
use crate::names::{generate_name, is_valid_name, timestamped_name};
use crate::{NAME_ATTEMPTS, now_ms};

/// File-per-session store
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory holding `<name>.json` files
    dir: PathBuf,
}

impl SessionStore {
    /// Open or create a session store at the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(?dir, "SessionStore::open: opened");
        Ok(Self { dir })
    }

    /// Directory this store writes to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn check_name(name: &str) -> Result<(), StoreError> {
        if is_valid_name(name) {
            Ok(())
        } else {
            Err(StoreError::InvalidName(name.to_string()))
        }
    }

    /// Check whether a session file exists
    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.path_for(name).exists()
    }

    /// Create a session under a freshly generated unique name
    ///
    /// Tries `NAME_ATTEMPTS` random adjective-noun pairs, then falls back to a
    /// timestamp-suffixed name. The empty session file reserves the name.
    pub fn create(&self) -> Result<Session, StoreError> {
        debug!("SessionStore::create: called");
        for attempt in 1..=NAME_ATTEMPTS {
            let name = generate_name();
            match self.create_named(&name) {
                Ok(session) => {
                    info!(session = %name, attempt, "Created session");
                    return Ok(session);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(%name, attempt, "SessionStore::create: name taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        let name = timestamped_name();
        warn!(%name, "Exhausted random session names, using timestamped fallback");
        self.create_named(&name)
    }

    /// Create an empty session with an explicit name
    pub fn create_named(&self, name: &str) -> Result<Session, StoreError> {
        Self::check_name(name)?;
        let session = Session::new(name);
        self.write_new(&session)?;
        Ok(session)
    }

    /// Write a session that must not already exist (O_EXCL reservation)
    fn write_new(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.path_for(&session.session_name);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(session.session_name.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let json = serde_json::to_string_pretty(session)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Atomically replace a session file (temp file + rename)
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        Self::check_name(&session.session_name)?;
        let path = self.path_for(&session.session_name);
        let tmp = self
            .dir
            .join(format!(".{}.json.tmp-{}", session.session_name, std::process::id()));

        let json = serde_json::to_string_pretty(session)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(session = %session.session_name, turns = session.turns.len(), "SessionStore::save: written");
        Ok(())
    }

    /// Read the raw session file, `None` when absent
    pub fn read_raw(&self, name: &str) -> Result<Option<String>, StoreError> {
        Self::check_name(name)?;
        match fs::read_to_string(self.path_for(name)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a session by name
    pub fn load(&self, name: &str) -> Result<Session, StoreError> {
        debug!(%name, "SessionStore::load: called");
        let content = self
            .read_raw(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Append a completed turn
    ///
    /// The turn number must be exactly the next one. The aggregate cost is
    /// recomputed and an error marker for this turn number is cleared.
    pub fn append_turn(&self, name: &str, turn: Turn) -> Result<Session, StoreError> {
        debug!(%name, turn_number = turn.turn_number, "SessionStore::append_turn: called");
        let mut session = self.load(name)?;

        let expected = session.next_turn_number();
        if turn.turn_number != expected {
            return Err(StoreError::TurnOutOfOrder {
                name: name.to_string(),
                expected,
                got: turn.turn_number,
            });
        }

        if session.error_for(turn.turn_number).is_some() {
            debug!(%name, "SessionStore::append_turn: clearing error marker");
            session.error = None;
        }

        session.turns.push(turn);
        session.recompute_total();
        session.updated_at = now_ms();
        self.save(&session)?;

        info!(session = %name, turns = session.turns.len(), usd = session.total_cost.usd, "Appended turn");
        Ok(session)
    }

    /// Persist an error marker for a turn that will never complete
    ///
    /// Creates the session record if it does not exist yet so a poller can
    /// always observe the failure.
    pub fn record_error(&self, name: &str, turn_number: u32, message: &str) -> Result<(), StoreError> {
        debug!(%name, turn_number, %message, "SessionStore::record_error: called");
        let mut session = match self.load(name) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => Session::new(name),
            Err(e) => return Err(e),
        };

        session.error = Some(ErrorMarker {
            turn_number,
            message: message.to_string(),
            recorded_at: now_ms(),
        });
        session.updated_at = now_ms();
        self.save(&session)?;

        warn!(session = %name, turn_number, "Recorded turn error");
        Ok(())
    }

    /// Remove any error marker from a session
    pub fn clear_error(&self, name: &str) -> Result<(), StoreError> {
        let mut session = self.load(name)?;
        if session.error.take().is_some() {
            debug!(%name, "SessionStore::clear_error: cleared");
            self.save(&session)?;
        }
        Ok(())
    }

    /// List session previews, most recently updated first
    pub fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        debug!(dir = ?self.dir, "SessionStore::list: called");
        let mut summaries = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_name(name) {
                continue;
            }

            match self.load(name) {
                Ok(session) => summaries.push(session.summary()),
                Err(e) => warn!(%name, error = %e, "Skipping unreadable session"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Rename a session
    ///
    /// Fails if the new name is taken or the session has a turn in flight.
    /// The record is written under the new name before the old file is removed.
    pub fn rename(&self, old: &str, new: &str) -> Result<Session, StoreError> {
        debug!(%old, %new, "SessionStore::rename: called");
        Self::check_name(new)?;
        let mut session = self.load(old)?;

        if old == new {
            return Ok(session);
        }

        self.ensure_unlocked(old)?;

        session.session_name = new.to_string();
        session.updated_at = now_ms();
        self.write_new(&session)?;
        fs::remove_file(self.path_for(old))?;

        info!(%old, %new, "Renamed session");
        Ok(session)
    }

    /// Delete a session
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        debug!(%name, "SessionStore::delete: called");
        Self::check_name(name)?;
        self.ensure_unlocked(name)?;
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => {
                info!(session = %name, "Deleted session");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail with `LockHeld` while a job holds an unexpired lock on `name`
    fn ensure_unlocked(&self, name: &str) -> Result<(), StoreError> {
        let locks = LockStore::new(&self.dir);
        match locks.get(name)?.filter(|l| !l.is_expired()) {
            Some(lock) => Err(StoreError::LockHeld {
                name: name.to_string(),
                holder: lock.holder,
            }),
            None => Ok(()),
        }
    }
}
