//! Durable directory-backed job queue
//!
//! ```text
//! {data_dir}/queue/
//! ├── pending/<job-id>_<session>_<turn>.json   # waiting for a worker
//! ├── claimed/<job-id>_<session>_<turn>.json   # owned by a running worker
//! └── failed/                                  # job files that could not be read
//! ```
//!
//! Claiming is an atomic rename from `pending` into `claimed`, so two workers
//! can never own the same job. Jobs left in `claimed` by a crash are moved
//! back on the next start, which makes delivery at-least-once. The file name
//! carries the session and turn so a job whose body is unreadable can still be
//! reported against its turn.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{Job, QueueError};

const PENDING: &str = "pending";
const CLAIMED: &str = "claimed";
const FAILED: &str = "failed";

/// A job owned by the caller until `finish`
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    /// Location of the claimed job file
    pub path: PathBuf,
}

/// A job file whose body could not be parsed, moved to `failed/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableJob {
    pub job_id: String,
    pub session_name: String,
    pub turn_number: u32,
    pub reason: String,
}

/// Result of taking the oldest pending job file
#[derive(Debug, Clone)]
pub enum Claim {
    Job(ClaimedJob),
    Unreadable(UnreadableJob),
}

impl Claim {
    /// The claimed job, if its file was readable
    pub fn into_job(self) -> Option<ClaimedJob> {
        match self {
            Claim::Job(claimed) => Some(claimed),
            Claim::Unreadable(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    pending: PathBuf,
    claimed: PathBuf,
    failed: PathBuf,
}

impl JobQueue {
    /// Open (creating if needed) the queue under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        let dir = dir.as_ref();
        debug!(?dir, "JobQueue::open: called");
        let queue = Self {
            pending: dir.join(PENDING),
            claimed: dir.join(CLAIMED),
            failed: dir.join(FAILED),
        };
        fs::create_dir_all(&queue.pending)?;
        fs::create_dir_all(&queue.claimed)?;
        fs::create_dir_all(&queue.failed)?;
        Ok(queue)
    }

    fn file_name(job: &Job) -> String {
        format!("{}_{}_{}.json", job.id, job.session_name, job.turn_number)
    }

    /// Split a job file stem into job id, session name and turn number
    ///
    /// Neither job ids nor session names contain `_`.
    fn parse_stem(stem: &str) -> Option<(String, String, u32)> {
        let (rest, turn) = stem.rsplit_once('_')?;
        let (id, session) = rest.split_once('_')?;
        Some((id.to_string(), session.to_string(), turn.parse().ok()?))
    }

    /// Job files in a directory, oldest id first
    fn job_files(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| n.starts_with('.'));
            if !hidden && path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Durably add a job to the pending set
    pub fn enqueue(&self, job: &Job) -> Result<PathBuf, QueueError> {
        debug!(job_id = %job.id, session = %job.session_name, "JobQueue::enqueue: called");
        let path = self.pending.join(Self::file_name(job));
        let tmp = self.pending.join(format!(".{}.tmp", job.id));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(job)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        info!(job_id = %job.id, session = %job.session_name, turn = job.turn_number, "Enqueued job");
        Ok(path)
    }

    /// Take ownership of the oldest pending job
    ///
    /// A file that cannot be parsed is moved to `failed/` and reported as
    /// [`Claim::Unreadable`] when its name identifies the turn; otherwise it is
    /// moved aside with a warning and the next file is tried.
    pub fn claim(&self) -> Result<Option<Claim>, QueueError> {
        for source in Self::job_files(&self.pending)? {
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = self.claimed.join(name);
            match fs::rename(&source, &target) {
                Ok(()) => {}
                // Another worker won the race
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let parsed = fs::read_to_string(&target)
                .map_err(QueueError::from)
                .and_then(|content| serde_json::from_str::<Job>(&content).map_err(QueueError::from));
            let reason = match parsed {
                Ok(job) => {
                    debug!(job_id = %job.id, "JobQueue::claim: claimed");
                    return Ok(Some(Claim::Job(ClaimedJob { job, path: target })));
                }
                Err(e) => e.to_string(),
            };

            warn!(path = ?target, %reason, "Moving unreadable job file to failed");
            fs::rename(&target, self.failed.join(name))?;

            let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if let Some((job_id, session_name, turn_number)) = Self::parse_stem(stem) {
                return Ok(Some(Claim::Unreadable(UnreadableJob {
                    job_id,
                    session_name,
                    turn_number,
                    reason,
                })));
            }
        }
        Ok(None)
    }

    /// Drop a claimed job once it has been fully handled
    pub fn finish(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        debug!(job_id = %claimed.job.id, "JobQueue::finish: called");
        match fs::remove_file(&claimed.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Return every claimed job to pending; call before any worker starts
    pub fn recover_orphans(&self) -> Result<usize, QueueError> {
        let mut recovered = 0;
        for path in Self::job_files(&self.claimed)? {
            if let Some(name) = path.file_name() {
                fs::rename(&path, self.pending.join(name))?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "Recovered orphaned jobs");
        }
        Ok(recovered)
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(Self::job_files(&self.pending)?.len())
    }

    pub fn claimed_count(&self) -> Result<usize, QueueError> {
        Ok(Self::job_files(&self.claimed)?.len())
    }

    pub fn failed_count(&self) -> Result<usize, QueueError> {
        Ok(Self::job_files(&self.failed)?.len())
    }
}
