//! Engine tuning knobs.
//!
//! All thresholds have per-field defaults so a partial TOML document (or none
//! at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Defaults ---
const DEFAULT_THRESHOLD: f32 = 0.55;
const DEFAULT_POSSIBLE_BAND: f32 = 0.10;
const DEFAULT_MARGIN: f32 = 0.25;
const DEFAULT_MIN_DET_SCORE: f32 = 0.35;
const DEFAULT_MIN_FACE_PX: f32 = 24.0;
const DEFAULT_MIN_ASPECT_RATIO: f32 = 0.5;
const DEFAULT_MAX_ASPECT_RATIO: f32 = 1.8;
const DEFAULT_MAX_FACE_FRACTION: f32 = 0.75;
const DEFAULT_MAX_FACES_PER_IMAGE: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Distance thresholds for tier classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Distance at or below which a face is FLAGGED.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Extra distance span above `threshold` classified as POSSIBLE.
    /// Zero collapses matching to a binary matched/clear decision.
    #[serde(default = "default_possible_band")]
    pub possible_band: f32,
    /// How far past the POSSIBLE band the confidence heuristic decays to zero.
    #[serde(default = "default_margin")]
    pub margin: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            possible_band: DEFAULT_POSSIBLE_BAND,
            margin: DEFAULT_MARGIN,
        }
    }
}

impl MatchConfig {
    /// Binary matched/clear configuration: no POSSIBLE tier.
    pub fn binary(threshold: f32) -> Self {
        Self {
            threshold,
            possible_band: 0.0,
            ..Self::default()
        }
    }

    /// Upper distance bound of the POSSIBLE tier.
    pub fn possible_limit(&self) -> f32 {
        self.threshold + self.possible_band
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(invalid("threshold", format!("must be > 0, got {}", self.threshold)));
        }
        if !(self.possible_band.is_finite() && self.possible_band >= 0.0) {
            return Err(invalid(
                "possible_band",
                format!("must be >= 0, got {}", self.possible_band),
            ));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(invalid("margin", format!("must be >= 0, got {}", self.margin)));
        }
        Ok(())
    }
}

/// Plausibility thresholds applied to raw detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_det_score")]
    pub min_det_score: f32,
    /// Minimum face side, in source-image pixels.
    #[serde(default = "default_min_face_px")]
    pub min_face_px: f32,
    #[serde(default = "default_min_aspect_ratio")]
    pub min_aspect_ratio: f32,
    #[serde(default = "default_max_aspect_ratio")]
    pub max_aspect_ratio: f32,
    /// Largest allowed face width (height) as a fraction of the image width (height).
    #[serde(default = "default_max_face_fraction")]
    pub max_face_fraction: f32,
    /// Hard cap on faces matched per image; later detections are dropped.
    #[serde(default = "default_max_faces_per_image")]
    pub max_faces_per_image: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_det_score: DEFAULT_MIN_DET_SCORE,
            min_face_px: DEFAULT_MIN_FACE_PX,
            min_aspect_ratio: DEFAULT_MIN_ASPECT_RATIO,
            max_aspect_ratio: DEFAULT_MAX_ASPECT_RATIO,
            max_face_fraction: DEFAULT_MAX_FACE_FRACTION,
            max_faces_per_image: DEFAULT_MAX_FACES_PER_IMAGE,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_det_score) {
            return Err(invalid(
                "min_det_score",
                format!("must be within [0, 1], got {}", self.min_det_score),
            ));
        }
        if !(self.min_face_px >= 0.0) {
            return Err(invalid("min_face_px", format!("must be >= 0, got {}", self.min_face_px)));
        }
        if !(self.min_aspect_ratio > 0.0 && self.min_aspect_ratio <= self.max_aspect_ratio) {
            return Err(invalid(
                "min_aspect_ratio",
                format!(
                    "need 0 < min <= max, got [{}, {}]",
                    self.min_aspect_ratio, self.max_aspect_ratio
                ),
            ));
        }
        if !(self.max_face_fraction > 0.0 && self.max_face_fraction <= 1.0) {
            return Err(invalid(
                "max_face_fraction",
                format!("must be within (0, 1], got {}", self.max_face_fraction),
            ));
        }
        if self.max_faces_per_image == 0 {
            return Err(invalid("max_faces_per_image", "must be > 0"));
        }
        Ok(())
    }
}

/// Full engine configuration, as read from `config.toml`.
///
/// ```toml
/// [matching]
/// threshold = 0.55
/// possible_band = 0.10
///
/// [filter]
/// min_det_score = 0.35
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg = Self::parse(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without validating it, for callers that layer
    /// further overrides before calling [`validate`](Self::validate).
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        self.filter.validate()
    }

    /// Render as TOML, e.g. for `sightline config`.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_possible_band() -> f32 {
    DEFAULT_POSSIBLE_BAND
}

fn default_margin() -> f32 {
    DEFAULT_MARGIN
}

fn default_min_det_score() -> f32 {
    DEFAULT_MIN_DET_SCORE
}

fn default_min_face_px() -> f32 {
    DEFAULT_MIN_FACE_PX
}

fn default_min_aspect_ratio() -> f32 {
    DEFAULT_MIN_ASPECT_RATIO
}

fn default_max_aspect_ratio() -> f32 {
    DEFAULT_MAX_ASPECT_RATIO
}

fn default_max_face_fraction() -> f32 {
    DEFAULT_MAX_FACE_FRACTION
}

fn default_max_faces_per_image() -> usize {
    DEFAULT_MAX_FACES_PER_IMAGE
}
