use serde::{Deserialize, Serialize};

use crate::distance::{self, DistanceError};

/// Opaque, stable identifier of an enrolled profile.
pub type ProfileId = String;

/// Pixel dimensions of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: f32,
    pub height: f32,
}

impl ImageDims {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle. The coordinate space depends on where the box came
/// from; see [`crate::remap`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Width over height. Degenerate (zero-height) boxes report infinity.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            f32::INFINITY
        }
    }
}

/// Face embedding vector produced by an external recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "face-api-128").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to `other`. See [`distance::distance`].
    pub fn distance(&self, other: &Embedding) -> Result<f32, DistanceError> {
        distance::distance(self, other)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// An enrolled identity and its reference samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub samples: Vec<Embedding>,
}

impl Profile {
    pub fn new(id: impl Into<ProfileId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            samples: Vec::new(),
        }
    }

    pub fn with_samples(mut self, samples: impl IntoIterator<Item = Embedding>) -> Self {
        self.samples.extend(samples);
        self
    }
}

/// One raw face reported by a detector, in detection-surface coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub detector_score: f32,
    pub embedding: Embedding,
    /// Upscale factor applied to the source image before detection (> 0).
    #[serde(default = "unit_scale")]
    pub detection_scale: f32,
}

fn unit_scale() -> f32 {
    1.0
}

/// Severity bucket for a face or an image.
///
/// Ordered by severity so that `max` yields the worst tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Clear,
    Possible,
    Flagged,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Clear => "clear",
            Tier::Possible => "possible",
            Tier::Flagged => "flagged",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best candidate identity for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity_id: ProfileId,
    pub name: String,
    /// Euclidean distance to the closest sample of the identity (>= 0).
    pub distance: f32,
    /// Heuristic 0–100 score. Not a calibrated probability.
    pub confidence: u8,
    /// Never [`Tier::Clear`]: faces that clear every identity produce no result.
    pub tier: Tier,
}

/// Per-image outcome of matching and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVerdict {
    pub tier: Tier,
    /// At most one entry per identity, closest match first.
    pub matched_identities: Vec<MatchResult>,
    pub face_count: usize,
}

impl ImageVerdict {
    pub fn clear(face_count: usize) -> Self {
        Self {
            tier: Tier::Clear,
            matched_identities: Vec::new(),
            face_count,
        }
    }
}
