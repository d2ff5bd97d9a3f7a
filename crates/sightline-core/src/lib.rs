//! sightline-core — Identity matching engine for detected faces.
//!
//! Takes face observations from an external detector, drops implausible
//! detections, compares embeddings against the enrolled identities selected
//! for a scan, and produces a FLAGGED / POSSIBLE / CLEAR verdict per image.

pub mod aggregate;
pub mod config;
pub mod distance;
pub mod filter;
pub mod matcher;
pub mod pipeline;
pub mod remap;
pub mod selection;
pub mod types;

pub use config::{ConfigError, EngineConfig, FilterConfig, MatchConfig};
pub use distance::DistanceError;
pub use matcher::{Gallery, MatchError, Matcher, TieredMatcher};
pub use pipeline::{scan_observations, FaceReport, ImageReport};
pub use selection::SelectionSet;
pub use types::{
    BoundingBox, Embedding, FaceObservation, ImageDims, ImageVerdict, MatchResult, Profile, ProfileId, Tier,
};
