//! sightline-scan — batch scanning over detector output.
//!
//! Takes a list of images, asks a [`Detector`] for their faces, and runs
//! each image through the core pipeline on the blocking pool. Outcomes are
//! delivered in input order regardless of completion order, and the batch
//! can be cancelled between images.

pub mod batch;
pub mod config;
pub mod detector;

pub use batch::{BatchScanner, BatchSummary, ImageError, ImageOutcome, ScanError};
pub use config::{load_engine_config, Config};
pub use detector::{Detector, DetectorError, ManifestEntry, PrecomputedDetector, ScanImage};

use std::path::Path;

/// Load a JSON manifest and build a detector serving its recorded output.
pub fn load_manifest(path: &Path) -> Result<(PrecomputedDetector, Vec<ScanImage>), ManifestError> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)?;
    tracing::debug!(path = %path.display(), images = entries.len(), "manifest loaded");
    Ok(PrecomputedDetector::from_manifest(entries)?)
}

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}
