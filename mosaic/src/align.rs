//! Frame registration: running homography state over a frame stream.
//!
//! The aligner wraps an external feature-registration provider and chains
//! its per-frame homographies into a transform from each frame back to the
//! first accepted frame. Registration is sliding-window: after every
//! accepted frame the reference is re-anchored to that frame, so drift over
//! a long sweep is expected and accepted (there is no bundle adjustment).

use crate::{Error, Result};
use log::{debug, warn};
use pano_core::transform::{self, Transform};

/// Fewest reference corners the first frame may have and still bootstrap
/// tracking.
pub const MIN_REF_CORNERS: usize = 25;

/// Fewest inliers a registration may have before the aligner falls back to
/// dead reckoning.
pub const MIN_INLIERS: usize = 10;

/// External feature-registration engine.
///
/// The aligner treats this as an opaque capability: it only inspects the
/// corner/inlier counts and the emitted homography. The homography returned
/// by [`register`](RegistrationProvider::register) maps *reference-frame*
/// coordinates to *current-frame* coordinates; the aligner inverts it when
/// chaining.
pub trait RegistrationProvider {
    /// Called once with the frame geometry before any frame is registered.
    fn initialize(&mut self, width: usize, height: usize) -> Result<()>;

    /// Registers `luma` (a `width * height` Y plane) against the current
    /// reference frame.
    fn register(&mut self, luma: &[u8]) -> Result<Transform>;

    /// Number of corners detected on the current reference frame.
    fn reference_corner_count(&self) -> usize;

    /// Number of inliers supporting the last [`register`](Self::register).
    fn inlier_count(&self) -> usize;

    /// Re-anchors the reference frame to `luma`.
    fn update_reference(&mut self, luma: &[u8], quarter_res: bool) -> Result<()>;
}

/// Per-frame outcome of [`Aligner::add_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Frame registered and accepted.
    Ok,
    /// Too few inliers; frame accepted with a dead-reckoned transform.
    FewInliers,
    /// First frame had too little texture to serve as a reference; rejected.
    LowTexture,
    /// Camera judged stationary; near-duplicate frame rejected.
    Stationary,
}

impl FrameStatus {
    /// Whether the frame was retained and must enter the frame store.
    pub fn accepted(&self) -> bool {
        matches!(self, FrameStatus::Ok | FrameStatus::FewInliers)
    }
}

/// Running alignment state across one mosaic session.
pub struct Aligner {
    provider: Box<dyn RegistrationProvider>,
    width: usize,
    height: usize,
    quarter_res: bool,
    still_threshold: f64,
    /// Transform of the current frame relative to the sliding reference;
    /// identity whenever the reference has just been re-anchored.
    h_curr: Transform,
    /// Accumulated transform from the sliding reference back to frame 0.
    h_prev: Transform,
    /// Accepted frames, including the reference.
    frame_count: usize,
    avg_tx: f64,
    avg_ty: f64,
}

impl Aligner {
    pub fn new(
        mut provider: Box<dyn RegistrationProvider>,
        width: usize,
        height: usize,
        quarter_res: bool,
        still_threshold: f64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput("zero frame dimensions".into()));
        }
        provider.initialize(width, height)?;
        Ok(Self {
            provider,
            width,
            height,
            quarter_res,
            still_threshold,
            h_curr: Transform::identity(),
            h_prev: Transform::identity(),
            frame_count: 0,
            avg_tx: 0.0,
            avg_ty: 0.0,
        })
    }

    /// Registers one luma plane and advances the running transform chain.
    pub fn add_frame(&mut self, luma: &[u8]) -> Result<FrameStatus> {
        if luma.len() < self.width * self.height {
            return Err(Error::InvalidInput(format!(
                "luma plane is {} bytes, expected at least {}",
                luma.len(),
                self.width * self.height
            )));
        }

        if self.frame_count == 0 {
            // Force the first frame to be the registration reference.
            self.provider.update_reference(luma, self.quarter_res)?;
            let corners = self.provider.reference_corner_count();
            if corners < MIN_REF_CORNERS {
                debug!("reference rejected: {corners} corners < {MIN_REF_CORNERS}");
                return Ok(FrameStatus::LowTexture);
            }
            self.h_curr = Transform::identity();
            self.h_prev = Transform::identity();
            self.frame_count = 1;
            return Ok(FrameStatus::Ok);
        }

        let mut status = FrameStatus::Ok;
        let mut h_curr = transform::normalized(&self.provider.register(luma)?)?;

        if self.provider.inlier_count() < MIN_INLIERS {
            // Dead-reckon from the running average translation rather than
            // failing outright.
            warn!(
                "only {} inliers, substituting average motion ({:.1}, {:.1})",
                self.provider.inlier_count(),
                self.avg_tx,
                self.avg_ty
            );
            h_curr = transform::translation(self.avg_tx, self.avg_ty);
            status = FrameStatus::FewInliers;
        }

        if h_curr[(0, 2)].abs() < self.still_threshold
            && h_curr[(1, 2)].abs() < self.still_threshold
        {
            return Ok(FrameStatus::Stationary);
        }

        // Running mean of per-frame translation over tracked frames, used
        // only for the dead-reckoning fallback above.
        let tracked = self.frame_count as f64;
        self.avg_tx = (self.avg_tx * (tracked - 1.0) + h_curr[(0, 2)]) / tracked;
        self.avg_ty = (self.avg_ty * (tracked - 1.0) + h_curr[(1, 2)]) / tracked;

        // Chain onto the accumulated transform and slide the reference
        // window up to this frame.
        let mut h_prev = transform::invert(&h_curr)? * self.h_prev;
        transform::normalize(&mut h_prev)?;
        self.h_prev = h_prev;
        self.h_curr = Transform::identity();
        self.provider.update_reference(luma, self.quarter_res)?;
        self.frame_count += 1;

        debug!(
            "frame {} aligned at ({:.1}, {:.1})",
            self.frame_count,
            self.h_prev[(0, 2)],
            self.h_prev[(1, 2)]
        );
        Ok(status)
    }

    /// Transform of the most recently accepted frame into mosaic space.
    pub fn last_transform(&self) -> Result<Transform> {
        if self.frame_count == 0 {
            return Err(Error::NotReady("no frame has been aligned"));
        }
        let inv = transform::invert(&transform::normalized(&self.h_curr)?)?;
        let mut out = self.h_prev * inv;
        transform::normalize(&mut out)?;
        Ok(out)
    }

    /// Accepted frames so far, including the reference.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }
}
