//! JSON import/export of the whole store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sightline_core::{Profile, SelectionSet};

use crate::{ProfileStore, StoreError};

const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedProfile {
    #[serde(flatten)]
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

/// Portable dump of profiles, samples and selection flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub profiles: Vec<ExportedProfile>,
    #[serde(default)]
    pub selection: SelectionSet,
}

impl ExportDocument {
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let doc: ExportDocument = serde_json::from_str(raw)?;
        if doc.version != EXPORT_VERSION {
            return Err(StoreError::UnsupportedVersion(doc.version));
        }
        Ok(doc)
    }
}

pub fn export_document(store: &impl ProfileStore) -> Result<ExportDocument, StoreError> {
    let created: HashMap<String, DateTime<Utc>> = store
        .summaries()?
        .into_iter()
        .map(|s| (s.id, s.created_at))
        .collect();
    let snapshot = store.snapshot()?;

    let profiles = snapshot
        .profiles
        .into_iter()
        .map(|profile| {
            let created_at = created.get(&profile.id).copied().unwrap_or_else(Utc::now);
            ExportedProfile { profile, created_at }
        })
        .collect();

    Ok(ExportDocument {
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        profiles,
        selection: snapshot.selection,
    })
}

/// Merge `doc` into `store`. Profiles with an existing id are replaced.
///
/// Returns the number of profiles written.
pub fn import_document(store: &mut impl ProfileStore, doc: ExportDocument) -> Result<usize, StoreError> {
    let count = doc.profiles.len();
    let mut ids = Vec::with_capacity(count);

    for exported in doc.profiles {
        ids.push(exported.profile.id.clone());
        store.put_profile(exported.profile, exported.created_at)?;
    }
    for id in &ids {
        if doc.selection.contains(id) {
            store.set_selected(id, doc.selection.is_active(id))?;
        }
    }

    tracing::info!(profiles = count, "import complete");
    Ok(count)
}
