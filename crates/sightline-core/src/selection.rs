//! Selection set: which enrolled profiles take part in a scan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Profile, ProfileId};

/// Mapping from profile id to an inclusion flag.
///
/// An id with no entry counts as selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet {
    flags: BTreeMap<ProfileId, bool>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.flags.get(id).copied().unwrap_or(true)
    }

    pub fn set(&mut self, id: impl Into<ProfileId>, active: bool) {
        self.flags.insert(id.into(), active);
    }

    pub fn set_all(&mut self, active: bool) {
        for flag in self.flags.values_mut() {
            *flag = active;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flags.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProfileId, bool)> {
        self.flags.iter().map(|(id, flag)| (id, *flag))
    }
}

impl FromIterator<(ProfileId, bool)> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = (ProfileId, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// Profiles whose selection flag is not explicitly `false`, in list order.
pub fn active_identities<'a>(profiles: &'a [Profile], selection: &SelectionSet) -> Vec<&'a Profile> {
    profiles.iter().filter(|p| selection.is_active(&p.id)).collect()
}

/// Bring `selection` in line with `profiles`: stale ids are dropped, new ids
/// are added as selected, existing flags are kept.
pub fn resync(profiles: &[Profile], selection: &SelectionSet) -> SelectionSet {
    profiles
        .iter()
        .map(|p| (p.id.clone(), selection.is_active(&p.id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles(ids: &[&str]) -> Vec<Profile> {
        ids.iter().map(|id| Profile::new(*id, id.to_uppercase())).collect()
    }

    #[test]
    fn test_absent_id_defaults_to_active() {
        let sel = SelectionSet::new();
        assert!(sel.is_active("anyone"));
    }

    #[test]
    fn test_active_identities_excludes_only_explicit_false() {
        let ps = profiles(&["a", "b", "c"]);
        let mut sel = SelectionSet::new();
        sel.set("a", true);
        sel.set("b", false);
        let active: Vec<_> = active_identities(&ps, &sel).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(active, ["a", "c"]);
    }

    #[test]
    fn test_resync_adds_and_removes() {
        let ps = profiles(&["a", "c"]);
        let mut sel = SelectionSet::new();
        sel.set("a", false);
        sel.set("b", true);

        let synced = resync(&ps, &sel);
        assert_eq!(synced.len(), 2);
        assert!(!synced.contains("b"));
        assert!(!synced.is_active("a"));
        assert!(synced.contains("c"));
        assert!(synced.is_active("c"));
    }

    #[test]
    fn test_resync_never_references_missing_ids() {
        let ps = profiles(&["x"]);
        let sel: SelectionSet = [("y".to_string(), true), ("z".to_string(), false)]
            .into_iter()
            .collect();
        let synced = resync(&ps, &sel);
        assert!(synced.iter().all(|(id, _)| ps.iter().any(|p| &p.id == id)));
    }

    #[test]
    fn test_set_all() {
        let mut sel = resync(&profiles(&["a", "b"]), &SelectionSet::new());
        sel.set_all(false);
        assert!(sel.iter().all(|(_, flag)| !flag));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut sel = SelectionSet::new();
        sel.set("a", false);
        assert_eq!(serde_json::to_string(&sel).unwrap(), r#"{"a":false}"#);
    }
}
