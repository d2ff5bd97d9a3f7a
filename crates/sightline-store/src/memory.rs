//! In-process profile store, for tests and ephemeral sessions.

use chrono::{DateTime, Utc};
use sightline_core::selection;
use sightline_core::{Embedding, Profile, SelectionSet};

use crate::{new_profile_id, ProfileStore, ProfileSummary, StoreError};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    profiles: Vec<(Profile, DateTime<Utc>)>,
    selection: SelectionSet,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &str) -> Result<usize, StoreError> {
        self.profiles
            .iter()
            .position(|(p, _)| p.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn profile_mut(&mut self, id: &str) -> Result<&mut Profile, StoreError> {
        let idx = self.position(id)?;
        Ok(&mut self.profiles[idx].0)
    }

    fn resync(&mut self) {
        let profiles: Vec<Profile> = self.profiles.iter().map(|(p, _)| p.clone()).collect();
        self.selection = selection::resync(&profiles, &self.selection);
    }
}

impl ProfileStore for MemoryStore {
    fn list(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(self.profiles.iter().map(|(p, _)| p.clone()).collect())
    }

    fn get(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.iter().find(|(p, _)| p.id == id).map(|(p, _)| p.clone()))
    }

    fn summaries(&self) -> Result<Vec<ProfileSummary>, StoreError> {
        Ok(self
            .profiles
            .iter()
            .map(|(p, created_at)| ProfileSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                samples: p.samples.len(),
                active: self.selection.is_active(&p.id),
                created_at: *created_at,
            })
            .collect())
    }

    fn create_profile(&mut self, name: &str) -> Result<Profile, StoreError> {
        let profile = Profile::new(new_profile_id(), name);
        self.profiles.push((profile.clone(), Utc::now()));
        self.resync();
        Ok(profile)
    }

    fn rename_profile(&mut self, id: &str, name: &str) -> Result<(), StoreError> {
        self.profile_mut(id)?.name = name.to_string();
        Ok(())
    }

    fn add_sample(&mut self, id: &str, sample: Embedding) -> Result<usize, StoreError> {
        let profile = self.profile_mut(id)?;
        profile.samples.push(sample);
        Ok(profile.samples.len())
    }

    fn remove_sample(&mut self, id: &str, index: usize) -> Result<Embedding, StoreError> {
        let profile = self.profile_mut(id)?;
        if index >= profile.samples.len() {
            return Err(StoreError::SampleOutOfRange {
                id: id.to_string(),
                index,
                len: profile.samples.len(),
            });
        }
        Ok(profile.samples.remove(index))
    }

    fn clear_samples(&mut self, id: &str) -> Result<(), StoreError> {
        self.profile_mut(id)?.samples.clear();
        Ok(())
    }

    fn delete_profile(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self.position(id)?;
        self.profiles.remove(idx);
        self.resync();
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        self.profiles.clear();
        self.resync();
        Ok(())
    }

    fn put_profile(&mut self, profile: Profile, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.profiles.iter_mut().find(|(p, _)| p.id == profile.id) {
            Some(slot) => slot.0 = profile,
            None => self.profiles.push((profile, created_at)),
        }
        self.resync();
        Ok(())
    }

    fn selection(&self) -> Result<SelectionSet, StoreError> {
        Ok(self.selection.clone())
    }

    fn set_selected(&mut self, id: &str, active: bool) -> Result<(), StoreError> {
        self.position(id)?;
        self.selection.set(id, active);
        Ok(())
    }

    fn select_all(&mut self, active: bool) -> Result<(), StoreError> {
        self.selection.set_all(active);
        Ok(())
    }
}
