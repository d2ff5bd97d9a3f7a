//! sightline-store — Persistence for enrolled identities.
//!
//! The engine only ever reads a [`Snapshot`]; all mutation goes through
//! [`ProfileStore`]. Every mutation that changes the profile list leaves the
//! selection set resynchronized before it returns.

pub mod memory;
pub mod sqlite;
pub mod transfer;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use transfer::{export_document, import_document, ExportDocument};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sightline_core::{Embedding, Gallery, MatchError, Profile, SelectionSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("profile {id} has {len} samples, no sample at index {index}")]
    SampleOutOfRange { id: String, index: usize, len: usize },
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("unsupported export version {0}")]
    UnsupportedVersion(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of `sightline list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub samples: usize,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Consistent view of the store taken at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub profiles: Vec<Profile>,
    pub selection: SelectionSet,
}

impl Snapshot {
    /// Active identities for matching; fails on the scan preconditions.
    pub fn gallery(&self) -> Result<Gallery, MatchError> {
        Gallery::snapshot(&self.profiles, &self.selection)
    }
}

/// Storage backend for profiles and the selection set.
pub trait ProfileStore {
    /// All profiles, in creation order.
    fn list(&self) -> Result<Vec<Profile>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Profile>, StoreError>;

    fn summaries(&self) -> Result<Vec<ProfileSummary>, StoreError>;

    /// Create an empty, selected profile with a fresh id.
    fn create_profile(&mut self, name: &str) -> Result<Profile, StoreError>;

    fn rename_profile(&mut self, id: &str, name: &str) -> Result<(), StoreError>;

    /// Append a sample; returns the new sample count.
    fn add_sample(&mut self, id: &str, sample: Embedding) -> Result<usize, StoreError>;

    /// Remove and return the sample at `index`.
    fn remove_sample(&mut self, id: &str, index: usize) -> Result<Embedding, StoreError>;

    fn clear_samples(&mut self, id: &str) -> Result<(), StoreError>;

    fn delete_profile(&mut self, id: &str) -> Result<(), StoreError>;

    /// Remove every profile.
    fn clear_all(&mut self) -> Result<(), StoreError>;

    /// Insert or wholly replace a profile (samples included), keeping `id`.
    fn put_profile(&mut self, profile: Profile, created_at: DateTime<Utc>) -> Result<(), StoreError>;

    fn selection(&self) -> Result<SelectionSet, StoreError>;

    fn set_selected(&mut self, id: &str, active: bool) -> Result<(), StoreError>;

    fn select_all(&mut self, active: bool) -> Result<(), StoreError>;

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            profiles: self.list()?,
            selection: self.selection()?,
        })
    }
}

pub(crate) fn new_profile_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
