//! Tiered nearest-identity matching.
//!
//! A face is compared against every active identity; the closest identity is
//! classified by distance into FLAGGED (`d <= threshold`), POSSIBLE
//! (`threshold < d <= threshold + possible_band`) or no match. A zero band
//! gives plain matched/clear behaviour through the same code path.

use thiserror::Error;

use crate::config::MatchConfig;
use crate::distance::{best_distance_to_identity, DistanceError};
use crate::selection::{active_identities, SelectionSet};
use crate::types::{Embedding, MatchResult, Profile, Tier};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no active identities to compare against")]
    NoActiveIdentities,
    #[error("active identities have no enrolled samples")]
    NoSamples,
    #[error("malformed embedding: {0}")]
    Embedding(#[from] DistanceError),
}

/// Read-only snapshot of the active identities for one scan batch.
///
/// Built once before any image is processed; later profile edits do not
/// affect a snapshot already taken.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<Profile>,
}

impl Gallery {
    /// Snapshot the selected profiles, in list order.
    ///
    /// Fails when nothing is selected or no selected profile has a sample.
    pub fn snapshot(profiles: &[Profile], selection: &SelectionSet) -> Result<Self, MatchError> {
        let identities: Vec<Profile> = active_identities(profiles, selection)
            .into_iter()
            .cloned()
            .collect();

        if identities.is_empty() {
            return Err(MatchError::NoActiveIdentities);
        }
        if identities.iter().all(|p| p.samples.is_empty()) {
            return Err(MatchError::NoSamples);
        }

        tracing::debug!(
            identities = identities.len(),
            samples = identities.iter().map(|p| p.samples.len()).sum::<usize>(),
            "gallery snapshot taken"
        );

        Ok(Self { identities })
    }

    pub fn identities(&self) -> &[Profile] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.identities.iter().map(|p| p.samples.len()).sum()
    }
}

/// Strategy for comparing a probe embedding against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> Result<Option<MatchResult>, MatchError>;
}

/// Euclidean matcher with FLAGGED / POSSIBLE tiers.
///
/// Ties between equidistant identities go to the one listed first.
#[derive(Debug, Clone, Default)]
pub struct TieredMatcher {
    config: MatchConfig,
}

impl TieredMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }
}

impl Matcher for TieredMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> Result<Option<MatchResult>, MatchError> {
        let identities: Vec<&Profile> = gallery.identities().iter().collect();
        Ok(match_face(probe, &identities, &self.config)?)
    }
}

/// Match one face embedding against `identities`.
///
/// Identities without samples are skipped. Returns `None` when the closest
/// identity lies beyond the POSSIBLE band, or when nothing was comparable.
/// An empty `identities` slice also yields `None`, so outside callers go
/// through [`Gallery`], which turns that case into a [`MatchError`].
pub(crate) fn match_face(
    probe: &Embedding,
    identities: &[&Profile],
    cfg: &MatchConfig,
) -> Result<Option<MatchResult>, DistanceError> {
    let mut best: Option<(&Profile, f32)> = None;

    for identity in identities {
        let d = best_distance_to_identity(probe, identity)?;
        if d.is_infinite() {
            continue;
        }
        // Strict `<`: the first identity reaching a distance keeps it.
        let closer = match best {
            None => true,
            Some((_, best_d)) => d < best_d,
        };
        if closer {
            best = Some((identity, d));
        }
    }

    let Some((identity, distance)) = best else {
        return Ok(None);
    };

    Ok(classify(distance, cfg).map(|tier| MatchResult {
        identity_id: identity.id.clone(),
        name: identity.name.clone(),
        distance,
        confidence: confidence(distance, cfg),
        tier,
    }))
}

/// Tier for a best distance, or `None` when it clears every band.
pub fn classify(distance: f32, cfg: &MatchConfig) -> Option<Tier> {
    if distance <= cfg.threshold {
        Some(Tier::Flagged)
    } else if distance <= cfg.possible_limit() {
        Some(Tier::Possible)
    } else {
        None
    }
}

/// UX confidence score in 0–100.
///
/// Linear decay from 100 at distance 0 to 0 at
/// `threshold + possible_band + margin`. This is a display heuristic, not a
/// calibrated probability of identity.
pub fn confidence(distance: f32, cfg: &MatchConfig) -> u8 {
    let span = cfg.possible_limit() + cfg.margin;
    if span <= 0.0 {
        return 0;
    }
    let score = (1.0 - distance / span).clamp(0.0, 1.0);
    (100.0 * score).round() as u8
}
