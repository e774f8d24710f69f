//! Persistent record of message ids that have already been notified.
//!
//! The store is a bounded, insertion-ordered set. Every [`DedupStore::record`]
//! call rewrites the state file so a crash never loses more than the event
//! currently being handled.
//!
//! # Design
//!
//! - **Bounded**: at most `capacity` ids are kept, in memory and on disk. When
//!   the cap is exceeded the oldest ids are evicted first.
//! - **Best-effort persistence**: write failures are logged and swallowed; the
//!   in-memory set stays authoritative for the rest of the process lifetime.
//! - **Tolerant load**: a missing or corrupt state file yields an empty store.
//!   This may re-notify old events, which is accepted.
//! - **Atomic writes**: the state is written to a sibling `.tmp` file and
//!   renamed over the target.
//!
//! # File format
//!
//! ```json
//! {"processed_messages": [1203456789012345678, 1203456789012345679]}
//! ```
//!
//! Ids are stored oldest first.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::types::EventId;

/// Default number of ids retained.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Errors reading or writing the state file.
#[derive(Error, Debug)]
pub enum StateError {
    /// File system I/O error.
    #[error("state file I/O error: {0}")]
    Io(#[from] io::Error),

    /// The state file is not valid JSON or has the wrong shape.
    #[error("state file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRecord {
    #[serde(default)]
    processed_messages: Vec<EventId>,
}

/// Bounded set of processed event ids backed by a JSON file.
///
/// # Thread Safety
///
/// Not synchronized. The watcher owns the store and handles one event at a
/// time, so `contains` followed by `record` cannot interleave with another
/// event carrying the same id.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    capacity: usize,
    order: VecDeque<EventId>,
    members: HashSet<EventId>,
}

impl DedupStore {
    /// Creates an empty store that persists to `path`. Nothing is read.
    ///
    /// A `capacity` of zero is treated as one.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            path: path.into(),
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Loads the store from `path`.
    ///
    /// Never fails: a missing file starts fresh and an unreadable or corrupt
    /// file is logged and treated as empty. When the file holds more than
    /// `capacity` ids only the most recent ones are kept.
    ///
    /// # Example
    ///
    /// ```
    /// use discord_watcher::dedup::DedupStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = DedupStore::load(dir.path().join("state.json"), 1000);
    /// assert!(store.is_empty());
    /// ```
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let mut store = Self::new(path, capacity);

        if !store.path.exists() {
            info!(path = %store.path.display(), "No state file found, starting fresh");
            return store;
        }

        match read_record(&store.path) {
            Ok(record) => {
                for id in record.processed_messages {
                    store.insert(id);
                }
                info!(
                    path = %store.path.display(),
                    count = store.len(),
                    "Loaded processed message ids from state"
                );
            }
            Err(e) => {
                error!(
                    path = %store.path.display(),
                    error = %e,
                    "Failed to load state, starting with empty set"
                );
            }
        }

        store
    }

    /// Returns true if `id` has already been recorded.
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.members.contains(id)
    }

    /// Adds `id` to the set and persists the result.
    ///
    /// Returns `true` if the id was not present before. Recording an id that
    /// is already present changes nothing but still rewrites the file. Write
    /// failures are logged, never returned.
    pub fn record(&mut self, id: EventId) -> bool {
        let inserted = self.insert(id);

        if let Err(e) = self.flush() {
            error!(
                path = %self.path.display(),
                error = %e,
                "Failed to save state, keeping in-memory set"
            );
        }

        inserted
    }

    /// Writes the current set to the state file.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the parent directory cannot be created, the
    /// temporary file cannot be written, or the rename fails.
    pub fn flush(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = StateRecord {
            processed_messages: self.order.iter().cloned().collect(),
        };
        let json = serde_json::to_vec(&record)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            count = record.processed_messages.len(),
            "Saved processed message ids to state"
        );
        Ok(())
    }

    /// Number of ids currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tracked ids, oldest first.
    pub fn ids(&self) -> impl Iterator<Item = &EventId> {
        self.order.iter()
    }

    fn insert(&mut self, id: EventId) -> bool {
        if self.members.contains(&id) {
            return false;
        }

        self.members.insert(id.clone());
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }

        true
    }
}

fn read_record(path: &Path) -> Result<StateRecord, StateError> {
    let contents = fs::read(path)?;
    if contents.is_empty() {
        warn!(path = %path.display(), "State file is empty");
        return Ok(StateRecord::default());
    }
    Ok(serde_json::from_slice(&contents)?)
}
