pub mod geometry;
pub mod image;
pub mod transform;

pub use geometry::*;
pub use image::*;
pub use transform::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("degenerate transform: {0}")]
    Degenerate(&'static str),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
}
