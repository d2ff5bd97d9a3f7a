//! Plausibility filter for raw detector output.
//!
//! Small detectors run on upscaled, low-quality or crowded images report
//! spurious faces (limbs, torsos, texture patches). These are dropped before
//! matching so they neither match nor show up in previews.

use crate::config::FilterConfig;
use crate::types::{FaceObservation, ImageDims};

/// Why an observation was judged implausible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Detector confidence below `min_det_score`.
    LowScore,
    /// Shorter side below `min_face_px` in source pixels.
    TooSmall,
    /// Width/height outside `[min_aspect_ratio, max_aspect_ratio]`.
    AspectRatio,
    /// Wider or taller than `max_face_fraction` of the image.
    TooLarge,
    /// `detection_scale` not a positive finite number.
    BadScale,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::LowScore => "low_score",
            Rejection::TooSmall => "too_small",
            Rejection::AspectRatio => "aspect_ratio",
            Rejection::TooLarge => "too_large",
            Rejection::BadScale => "bad_scale",
        }
    }
}

/// Check an observation against the plausibility thresholds.
///
/// Box dimensions are remapped to source-image scale before any size test.
/// Every test is phrased as "must hold", so NaN values are rejected.
pub fn check(obs: &FaceObservation, image: ImageDims, cfg: &FilterConfig) -> Result<(), Rejection> {
    if !(obs.detector_score >= cfg.min_det_score) {
        return Err(Rejection::LowScore);
    }

    if !(obs.detection_scale.is_finite() && obs.detection_scale > 0.0) {
        return Err(Rejection::BadScale);
    }
    let b = obs.bbox.to_source_space(obs.detection_scale);

    if !(b.width >= cfg.min_face_px && b.height >= cfg.min_face_px) {
        return Err(Rejection::TooSmall);
    }

    let ar = b.aspect_ratio();
    if !(ar >= cfg.min_aspect_ratio && ar <= cfg.max_aspect_ratio) {
        return Err(Rejection::AspectRatio);
    }

    if !(b.width <= cfg.max_face_fraction * image.width && b.height <= cfg.max_face_fraction * image.height) {
        return Err(Rejection::TooLarge);
    }

    Ok(())
}

/// `true` when the observation passes every plausibility test.
pub fn accept(obs: &FaceObservation, image: ImageDims, cfg: &FilterConfig) -> bool {
    check(obs, image, cfg).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    fn obs(w: f32, h: f32, score: f32, scale: f32) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox::new(10.0, 10.0, w, h),
            detector_score: score,
            embedding: Embedding::new(vec![0.0; 4]),
            detection_scale: scale,
        }
    }

    const IMG: ImageDims = ImageDims {
        width: 1000.0,
        height: 800.0,
    };

    #[test]
    fn test_accepts_typical_face() {
        assert!(accept(&obs(100.0, 120.0, 0.9, 1.0), IMG, &FilterConfig::default()));
    }

    #[test]
    fn test_rejects_low_detector_score() {
        let cfg = FilterConfig::default();
        assert_eq!(check(&obs(100.0, 120.0, 0.1, 1.0), IMG, &cfg), Err(Rejection::LowScore));
        // Boundary: exactly at the threshold passes.
        assert!(accept(&obs(100.0, 120.0, cfg.min_det_score, 1.0), IMG, &cfg));
    }

    #[test]
    fn test_size_measured_in_source_pixels() {
        let cfg = FilterConfig::default();
        // 40px on a 2x upscaled surface is 20px in the source image.
        assert_eq!(check(&obs(40.0, 40.0, 0.9, 2.0), IMG, &cfg), Err(Rejection::TooSmall));
        assert!(accept(&obs(40.0, 40.0, 0.9, 1.0), IMG, &cfg));
    }

    #[test]
    fn test_rejects_implausible_aspect_ratio() {
        let cfg = FilterConfig::default();
        assert_eq!(check(&obs(300.0, 60.0, 0.9, 1.0), IMG, &cfg), Err(Rejection::AspectRatio));
        assert_eq!(check(&obs(60.0, 300.0, 0.9, 1.0), IMG, &cfg), Err(Rejection::AspectRatio));
    }

    #[test]
    fn test_rejects_oversized_box() {
        let cfg = FilterConfig::default();
        // 0.75 * 800 = 600 tall max.
        assert_eq!(check(&obs(500.0, 650.0, 0.9, 1.0), IMG, &cfg), Err(Rejection::TooLarge));
        assert!(accept(&obs(500.0, 590.0, 0.9, 1.0), IMG, &cfg));
    }

    #[test]
    fn test_thresholds_are_overridable() {
        let cfg = FilterConfig {
            min_det_score: 0.05,
            ..FilterConfig::default()
        };
        assert!(accept(&obs(100.0, 120.0, 0.1, 1.0), IMG, &cfg));
    }

    #[test]
    fn test_nan_fields_rejected() {
        let cfg = FilterConfig::default();
        assert_eq!(check(&obs(100.0, 120.0, f32::NAN, 1.0), IMG, &cfg), Err(Rejection::LowScore));
        assert_eq!(check(&obs(f32::NAN, 120.0, 0.9, 1.0), IMG, &cfg), Err(Rejection::TooSmall));
        assert_eq!(check(&obs(100.0, f32::NAN, 0.9, 1.0), IMG, &cfg), Err(Rejection::TooSmall));
        assert_eq!(check(&obs(100.0, 120.0, 0.9, f32::NAN), IMG, &cfg), Err(Rejection::BadScale));
    }

    #[test]
    fn test_nan_image_dims_reject_as_too_large() {
        let img = ImageDims::new(f32::NAN, 800.0);
        assert_eq!(
            check(&obs(100.0, 120.0, 0.9, 1.0), img, &FilterConfig::default()),
            Err(Rejection::TooLarge)
        );
    }

    #[test]
    fn test_nonpositive_scale_rejected() {
        let cfg = FilterConfig::default();
        assert_eq!(check(&obs(100.0, 120.0, 0.9, 0.0), IMG, &cfg), Err(Rejection::BadScale));
        assert_eq!(check(&obs(100.0, 120.0, 0.9, -1.0), IMG, &cfg), Err(Rejection::BadScale));
    }
}
