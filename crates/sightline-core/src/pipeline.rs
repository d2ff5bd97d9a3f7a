//! Single-image pipeline: filter → cap → remap → match → aggregate.

use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate;
use crate::config::FilterConfig;
use crate::filter;
use crate::matcher::{Gallery, MatchError, Matcher};
use crate::types::{BoundingBox, FaceObservation, ImageDims, ImageVerdict, MatchResult};

/// One accepted face, ready for an annotated preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    /// Box in source-image pixels.
    pub source_box: BoundingBox,
    pub detector_score: f32,
    /// Upscale factor the detector ran at.
    pub detection_scale: f32,
    pub best: Option<MatchResult>,
}

/// Everything the presentation layer needs for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    pub verdict: ImageVerdict,
    pub faces: Vec<FaceReport>,
    /// Observations rejected as implausible.
    pub rejected: usize,
    /// Plausible observations dropped by the per-image cap.
    pub dropped: usize,
    /// Set when the detector failed and the image was treated as faceless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_error: Option<String>,
}

impl ImageReport {
    /// Report for an image whose detector call failed.
    pub fn detector_failed(message: impl Into<String>) -> Self {
        Self {
            verdict: ImageVerdict::clear(0),
            faces: Vec::new(),
            rejected: 0,
            dropped: 0,
            detector_error: Some(message.into()),
        }
    }

    /// Closest `n` matched identities.
    pub fn top(&self, n: usize) -> &[MatchResult] {
        let matched = &self.verdict.matched_identities;
        &matched[..n.min(matched.len())]
    }
}

/// Run one image's detector output through the engine.
///
/// Only the first `max_faces_per_image` plausible observations, in detector
/// order, are matched. A malformed embedding aborts the image.
pub fn scan_observations<M: Matcher>(
    observations: Vec<FaceObservation>,
    image: ImageDims,
    gallery: &Gallery,
    matcher: &M,
    filter_cfg: &FilterConfig,
) -> Result<ImageReport, MatchError> {
    let total = observations.len();
    let mut rejected = 0usize;
    let mut accepted = Vec::with_capacity(total.min(filter_cfg.max_faces_per_image));

    for obs in observations {
        match filter::check(&obs, image, filter_cfg) {
            Ok(()) => accepted.push(obs),
            Err(reason) => {
                rejected += 1;
                tracing::debug!(
                    reason = reason.as_str(),
                    score = obs.detector_score,
                    width = obs.bbox.width,
                    height = obs.bbox.height,
                    "implausible face rejected"
                );
            }
        }
    }

    let dropped = accepted.len().saturating_sub(filter_cfg.max_faces_per_image);
    if dropped > 0 {
        tracing::debug!(dropped, cap = filter_cfg.max_faces_per_image, "face cap reached");
        accepted.truncate(filter_cfg.max_faces_per_image);
    }

    let mut faces = Vec::with_capacity(accepted.len());
    for obs in accepted {
        let best = matcher.compare(&obs.embedding, gallery)?;
        faces.push(FaceReport {
            source_box: obs.bbox.to_source_space(obs.detection_scale),
            detector_score: obs.detector_score,
            detection_scale: obs.detection_scale,
            best,
        });
    }

    let verdict = aggregate(faces.iter().map(|f| f.best.as_ref()));

    tracing::debug!(
        detected = total,
        rejected,
        dropped,
        faces = verdict.face_count,
        tier = %verdict.tier,
        "image scanned"
    );

    Ok(ImageReport {
        verdict,
        faces,
        rejected,
        dropped,
        detector_error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::distance::DistanceError;
    use crate::matcher::TieredMatcher;
    use crate::selection::SelectionSet;
    use crate::types::{Embedding, Profile, Tier};

    const IMG: ImageDims = ImageDims {
        width: 1000.0,
        height: 1000.0,
    };

    fn face(x: f32, score: f32, emb: &[f32]) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox::new(x, 100.0, 100.0, 120.0),
            detector_score: score,
            embedding: Embedding::new(emb.to_vec()),
            detection_scale: 1.0,
        }
    }

    fn gallery() -> Gallery {
        let ps = vec![
            Profile::new("alice", "Alice").with_samples([Embedding::new(vec![0.0, 0.0])]),
            Profile::new("bob", "Bob").with_samples([Embedding::new(vec![5.0, 5.0])]),
        ];
        Gallery::snapshot(&ps, &SelectionSet::new()).unwrap()
    }

    fn matcher() -> TieredMatcher {
        TieredMatcher::new(MatchConfig {
            threshold: 0.6,
            possible_band: 0.1,
            margin: 0.25,
        })
    }

    #[test]
    fn test_duplicate_identity_reported_once_at_closest() {
        let obs = vec![face(0.0, 0.9, &[0.5, 0.0]), face(300.0, 0.9, &[0.3, 0.0])];
        let r = scan_observations(obs, IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap();
        assert_eq!(r.verdict.tier, Tier::Flagged);
        assert_eq!(r.verdict.face_count, 2);
        assert_eq!(r.verdict.matched_identities.len(), 1);
        assert_eq!(r.verdict.matched_identities[0].identity_id, "alice");
        assert!((r.verdict.matched_identities[0].distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_low_score_filtered_even_on_exact_match() {
        let obs = vec![face(0.0, 0.1, &[0.0, 0.0])];
        let r = scan_observations(obs, IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap();
        assert_eq!(r.rejected, 1);
        assert_eq!(r.verdict, ImageVerdict::clear(0));
        assert!(r.faces.is_empty());
    }

    #[test]
    fn test_no_observations_is_clear() {
        let r = scan_observations(vec![], IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap();
        assert_eq!(r.verdict, ImageVerdict::clear(0));
    }

    #[test]
    fn test_unmatched_face_counts() {
        let obs = vec![face(0.0, 0.9, &[2.5, 2.5])];
        let r = scan_observations(obs, IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap();
        assert_eq!(r.verdict.tier, Tier::Clear);
        assert_eq!(r.verdict.face_count, 1);
        assert!(r.faces[0].best.is_none());
    }

    #[test]
    fn test_cap_keeps_earliest_detections() {
        let cfg = FilterConfig {
            max_faces_per_image: 2,
            ..FilterConfig::default()
        };
        let obs = vec![
            face(0.0, 0.9, &[9.0, 9.0]),
            face(200.0, 0.9, &[9.0, 9.0]),
            face(400.0, 0.9, &[0.0, 0.0]),
        ];
        let r = scan_observations(obs, IMG, &gallery(), &matcher(), &cfg).unwrap();
        assert_eq!(r.dropped, 1);
        assert_eq!(r.verdict.face_count, 2);
        assert_eq!(r.verdict.tier, Tier::Clear);
    }

    #[test]
    fn test_boxes_reported_in_source_space() {
        let mut obs = face(400.0, 0.9, &[0.0, 0.0]);
        obs.detection_scale = 2.0;
        obs.bbox = BoundingBox::new(400.0, 200.0, 120.0, 140.0);
        let r = scan_observations(vec![obs], IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap();
        assert_eq!(r.faces[0].source_box, BoundingBox::new(200.0, 100.0, 60.0, 70.0));
        assert_eq!(r.faces[0].detection_scale, 2.0);
    }

    #[test]
    fn test_malformed_embedding_aborts_image() {
        let obs = vec![face(0.0, 0.9, &[0.0, 0.0, 0.0])];
        let err = scan_observations(obs, IMG, &gallery(), &matcher(), &FilterConfig::default()).unwrap_err();
        assert_eq!(
            err,
            MatchError::Embedding(DistanceError::DimensionMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_rescan_is_identical() {
        let obs = vec![
            face(0.0, 0.9, &[0.62, 0.0]),
            face(200.0, 0.9, &[5.0, 5.2]),
            face(400.0, 0.2, &[0.0, 0.0]),
        ];
        let g = gallery();
        let m = matcher();
        let cfg = FilterConfig::default();
        let first = scan_observations(obs.clone(), IMG, &g, &m, &cfg).unwrap();
        let second = scan_observations(obs, IMG, &g, &m, &cfg).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.verdict.tier, Tier::Flagged);
        assert_eq!(first.top(1)[0].identity_id, "bob");
        assert_eq!(first.top(10).len(), 2);
    }

    #[test]
    fn test_detector_failure_report() {
        let r = ImageReport::detector_failed("timeout");
        assert_eq!(r.verdict.face_count, 0);
        assert_eq!(r.verdict.tier, Tier::Clear);
        assert_eq!(r.detector_error.as_deref(), Some("timeout"));
    }
}
