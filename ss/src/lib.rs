//! SessionStore - durable per-session turn history
//!
//! Every session is a single JSON file named after the session. The file is the
//! whole of the durable state for that session: turn history, aggregate cost
//! and an optional error marker. There is no index or manifest.
//!
//! # Architecture
//!
//! ```text
//! {data_dir}/sessions/
//! ├── .locks.guard          # fs2 guard serializing lock acquisition
//! ├── amber-falcon.json     # Session record
//! ├── amber-falcon.lock     # LockRecord while a turn is in flight
//! └── quiet-harbor.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionstore::SessionStore;
//!
//! let store = SessionStore::open("/var/lib/chorus/sessions")?;
//! let session = store.create()?;
//! let loaded = store.load(&session.session_name)?;
//! ```

pub mod cli;
mod context;
mod error;
mod lock;
mod model;
mod names;
mod store;

pub use context::session_context;
pub use error::StoreError;
pub use lock::{LockRecord, LockStore};
pub use model::{Cost, ErrorMarker, Instruction, PerspectiveResult, Session, SessionSummary, Turn, TurnMode};
pub use names::{generate_name, is_valid_name};
pub use store::SessionStore;

/// Attempts at a unique adjective-noun name before falling back to a timestamp suffix
pub const NAME_ATTEMPTS: usize = 10;

/// Length of the prompt preview in session listings
pub const PREVIEW_CHARS: usize = 80;

/// Current time as unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
