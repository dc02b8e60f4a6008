//! The per-frame entity carried through mosaic construction.

use pano_core::{Transform, YuvFrame};

/// One accepted input frame and its transform into mosaic space.
#[derive(Debug, Clone)]
pub struct MosaicFrame {
    pub image: YuvFrame,
    /// Frame-to-mosaic homogeneous transform.
    pub transform: Transform,
}

impl MosaicFrame {
    pub fn new(image: YuvFrame, transform: Transform) -> Self {
        Self { image, transform }
    }

    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }
}
