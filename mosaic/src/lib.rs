//! Panorama mosaicing engine.
//!
//! Takes a temporally ordered stream of overlapping camera frames, aligns
//! them into a common projective coordinate system, and blends them into a
//! single seamless output image:
//!
//! - [`align`]: running homography accumulation over an external
//!   registration provider.
//! - [`delaunay`]: quad-edge Delaunay triangulation of the projected frame
//!   centers, bounding each frame's zone of contribution.
//! - [`pyramid`] / [`interp`]: bordered 16-bit Laplacian pyramids and
//!   fixed-table bicubic sampling.
//! - [`blend`]: output bounds, per-frame ownership masks, pyramid
//!   projection, reconstruction, and auto-crop.
//! - [`stitcher`]: the `add_frame` / `create_mosaic` facade.

pub mod align;
pub mod blend;
pub mod delaunay;
pub mod frame;
pub mod interp;
pub mod pyramid;
pub mod stitcher;

pub use align::{Aligner, FrameStatus, RegistrationProvider};
pub use blend::{Blend, BlendType, StripType};
pub use frame::MosaicFrame;
pub use stitcher::{Monitor, Mosaic, MosaicConfig};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("degenerate geometry: {0}")]
    Degenerate(#[from] pano_core::Error),

    #[error("out of memory: {0}")]
    Memory(String),

    #[error("mosaic extent is unusable relative to the input frames")]
    MosaicTooBig,

    #[error("crop rectangle collapsed to an empty region")]
    EmptyCrop,

    #[error("computation cancelled")]
    Cancelled,

    #[error("not ready: {0}")]
    NotReady(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
