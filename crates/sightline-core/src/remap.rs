//! Coordinate remapping between detection, source and display surfaces.
//!
//! Detectors often run on an upscaled copy of the source image. A box found on
//! that surface is divided by the upscale factor to land back in source-image
//! pixels, then multiplied by whatever scale a preview is drawn at. Scales are
//! always > 0; anything else is a caller bug.

use crate::types::BoundingBox;

impl BoundingBox {
    /// Scale position and size by `factor`.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Detection-surface box → source-image box.
    pub fn to_source_space(&self, detection_scale: f32) -> BoundingBox {
        debug_assert!(detection_scale > 0.0, "detection scale must be > 0");
        self.scaled(1.0 / detection_scale)
    }

    /// Source-image box → detection-surface box.
    pub fn to_detection_space(&self, detection_scale: f32) -> BoundingBox {
        debug_assert!(detection_scale > 0.0, "detection scale must be > 0");
        self.scaled(detection_scale)
    }

    /// Source-image box → display-surface box.
    pub fn to_display_space(&self, display_scale: f32) -> BoundingBox {
        debug_assert!(display_scale > 0.0, "display scale must be > 0");
        self.scaled(display_scale)
    }
}
