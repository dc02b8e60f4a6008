pub use pano_core as core;
pub use pano_mosaic as mosaic;

pub use pano_mosaic::stitcher::{Monitor, Mosaic, MosaicConfig};
pub use pano_mosaic::{BlendType, FrameStatus, RegistrationProvider, StripType};
