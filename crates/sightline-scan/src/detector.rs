//! Detector boundary.
//!
//! Face detection and embedding extraction live outside this workspace. A
//! [`Detector`] hands back raw observations for one image; nothing about
//! their order, count or normalization is assumed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sightline_core::{FaceObservation, ImageDims};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("detector failed: {0}")]
    Failed(String),
    #[error("no detector output for image {0}")]
    Unknown(String),
    #[error("image {0} listed more than once")]
    DuplicateImage(String),
    #[error("invalid detector output for image {image}: {reason}")]
    InvalidObservation { image: String, reason: String },
}

/// An image queued for scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanImage {
    /// Caller-chosen key, typically a file path.
    pub id: String,
    pub dims: ImageDims,
}

/// Source of face observations for an image.
///
/// Called from blocking worker threads, one image per call.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, image: &ScanImage) -> Result<Vec<FaceObservation>, DetectorError>;
}

/// One manifest entry: an image and the detector output recorded for it.
///
/// ```json
/// { "image": "crowd.jpg", "width": 1920, "height": 1080,
///   "faces": [ { "box": {...}, "detector_score": 0.91,
///                "embedding": { "values": [...] }, "detection_scale": 2.0 } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image: String,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
    /// Detector failure recorded for this image instead of faces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serves detector output captured ahead of time.
#[derive(Debug, Default)]
pub struct PrecomputedDetector {
    outputs: HashMap<String, Result<Vec<FaceObservation>, String>>,
}

impl PrecomputedDetector {
    /// Build from manifest entries, returning the scan queue in manifest order.
    pub fn from_manifest(entries: Vec<ManifestEntry>) -> Result<(Self, Vec<ScanImage>), DetectorError> {
        let mut outputs = HashMap::with_capacity(entries.len());
        let mut images = Vec::with_capacity(entries.len());

        for entry in entries {
            if outputs.contains_key(&entry.image) {
                return Err(DetectorError::DuplicateImage(entry.image));
            }
            validate_entry(&entry)?;
            images.push(ScanImage {
                id: entry.image.clone(),
                dims: ImageDims::new(entry.width, entry.height),
            });
            let output = match entry.error {
                Some(message) => Err(message),
                None => Ok(entry.faces),
            };
            outputs.insert(entry.image, output);
        }

        Ok((Self { outputs }, images))
    }
}

/// Image dimensions and detection scales must be finite and positive.
fn validate_entry(entry: &ManifestEntry) -> Result<(), DetectorError> {
    let invalid = |reason: String| DetectorError::InvalidObservation {
        image: entry.image.clone(),
        reason,
    };

    if !(entry.width.is_finite() && entry.width > 0.0 && entry.height.is_finite() && entry.height > 0.0) {
        return Err(invalid(format!(
            "image size must be positive, got {}x{}",
            entry.width, entry.height
        )));
    }
    for (i, face) in entry.faces.iter().enumerate() {
        let scale = face.detection_scale;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(invalid(format!("face {i}: detection_scale must be > 0, got {scale}")));
        }
    }
    Ok(())
}

impl Detector for PrecomputedDetector {
    fn detect(&self, image: &ScanImage) -> Result<Vec<FaceObservation>, DetectorError> {
        match self.outputs.get(&image.id) {
            Some(Ok(faces)) => Ok(faces.clone()),
            Some(Err(message)) => Err(DetectorError::Failed(message.clone())),
            None => Err(DetectorError::Unknown(image.id.clone())),
        }
    }
}
