//! The mosaicing facade: feed frames in capture order, then ask for the
//! blended image. Wraps the aligner and blender behind one stateful object
//! and a shareable progress/cancellation monitor.

use crate::align::{Aligner, FrameStatus, RegistrationProvider};
use crate::blend::{Blend, BlendType, StripType};
use crate::frame::MosaicFrame;
use crate::{Error, Result};
use image::RgbImage;
use log::info;
use pano_core::YuvFrame;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Share of total progress attributed to the alignment phase; blending
/// reports the rest.
const TIME_PERCENT_ALIGN: f32 = 20.0;

/// Default cap on frames per mosaic session.
pub const MAX_FRAMES_DEFAULT: usize = 200;

/// Session parameters, built with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    /// Input frame width in pixels; every frame must match.
    pub width: usize,
    /// Input frame height in pixels.
    pub height: usize,
    pub blend_type: BlendType,
    pub strip_type: StripType,
    /// Register frames at quarter resolution, trading accuracy for speed.
    pub quarter_res: bool,
    /// Per-frame translation (pixels) below which the camera is considered
    /// stationary and the frame dropped.
    pub still_threshold: f64,
    pub max_frames: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            blend_type: BlendType::Horizontal,
            strip_type: StripType::Thin,
            quarter_res: false,
            still_threshold: 0.5,
            max_frames: MAX_FRAMES_DEFAULT,
        }
    }
}

impl MosaicConfig {
    pub fn with_dimensions(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_blend_type(mut self, blend_type: BlendType) -> Self {
        self.blend_type = blend_type;
        self
    }

    pub fn with_strip_type(mut self, strip_type: StripType) -> Self {
        self.strip_type = strip_type;
        self
    }

    pub fn with_quarter_res(mut self, quarter_res: bool) -> Self {
        self.quarter_res = quarter_res;
        self
    }

    pub fn with_still_threshold(mut self, threshold: f64) -> Self {
        self.still_threshold = threshold;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }
}

/// Progress and cancellation shared between the stitching thread and its
/// observers. Progress runs 0..100 and is monotone within one session.
#[derive(Debug, Default)]
pub struct Monitor {
    /// f32 percentage, stored as raw bits.
    progress: AtomicU32,
    cancel: AtomicBool,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Relaxed))
    }

    pub fn set_progress(&self, value: f32) {
        self.progress.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add_progress(&self, delta: f32) {
        let _ = self
            .progress
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f32::from_bits(bits) + delta).to_bits())
            });
    }

    /// Requests cancellation; the pipeline stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Fails with [`Error::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Clears both progress and the cancellation flag for a new session.
    pub fn reset(&self) {
        self.set_progress(0.0);
        self.cancel.store(false, Ordering::Relaxed);
    }
}

/// One mosaicing session: accumulates aligned frames, then blends them.
pub struct Mosaic {
    config: MosaicConfig,
    aligner: Aligner,
    blend: Blend,
    frames: Vec<MosaicFrame>,
    monitor: Arc<Monitor>,
}

impl Mosaic {
    pub fn new(config: MosaicConfig, provider: Box<dyn RegistrationProvider>) -> Result<Self> {
        let aligner = Aligner::new(
            provider,
            config.width,
            config.height,
            config.quarter_res,
            config.still_threshold,
        )?;
        let blend = Blend::new(
            config.blend_type,
            config.strip_type,
            config.width,
            config.height,
        )?;
        Ok(Self {
            config,
            aligner,
            blend,
            frames: Vec::new(),
            monitor: Arc::new(Monitor::new()),
        })
    }

    /// Shared handle for observing progress or cancelling from another
    /// thread.
    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    /// Registers one planar YVU frame and, if it is accepted, retains it for
    /// blending.
    pub fn add_frame(&mut self, image: YuvFrame) -> Result<FrameStatus> {
        if self.frames.len() >= self.config.max_frames {
            return Err(Error::InvalidInput(format!(
                "frame capacity of {} reached",
                self.config.max_frames
            )));
        }
        if image.width() != self.config.width || image.height() != self.config.height {
            return Err(Error::InvalidInput(format!(
                "frame is {}x{}, session expects {}x{}",
                image.width(),
                image.height(),
                self.config.width,
                self.config.height
            )));
        }
        self.monitor.checkpoint()?;

        let status = self.aligner.add_frame(image.y())?;
        if status.accepted() {
            let transform = self.aligner.last_transform()?;
            self.frames.push(MosaicFrame::new(image, transform));
            self.monitor
                .add_progress(TIME_PERCENT_ALIGN / self.config.max_frames as f32);
        }
        Ok(status)
    }

    /// Converts an RGB image and registers it like [`add_frame`](Self::add_frame).
    pub fn add_frame_rgb(&mut self, rgb: &RgbImage) -> Result<FrameStatus> {
        self.add_frame(YuvFrame::from_rgb(rgb))
    }

    /// Blends everything accepted so far into the final mosaic. With no
    /// accepted frames there is nothing to blend and `Ok(None)` is returned.
    ///
    /// Consumes the session's alignment: frame transforms are re-based
    /// during blending, so feed a fresh session afterwards.
    pub fn create_mosaic(&mut self) -> Result<Option<YuvFrame>> {
        self.monitor.checkpoint()?;
        if self.frames.is_empty() {
            self.monitor.set_progress(100.0);
            return Ok(None);
        }
        info!("creating mosaic from {} frames", self.frames.len());
        let image = self.blend.run(&mut self.frames, &self.monitor)?;
        self.monitor.set_progress(100.0);
        Ok(Some(image))
    }

    /// Convenience wrapper returning the mosaic as RGB.
    pub fn create_mosaic_rgb(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.create_mosaic()?.map(|f| f.to_rgb()))
    }

    /// Frames accepted so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_accumulates_progress() {
        let m = Monitor::new();
        assert_eq!(m.progress(), 0.0);
        m.add_progress(12.5);
        m.add_progress(12.5);
        assert_eq!(m.progress(), 25.0);
        m.set_progress(100.0);
        assert_eq!(m.progress(), 100.0);
    }

    #[test]
    fn monitor_cancellation_trips_checkpoints() {
        let m = Monitor::new();
        assert!(m.checkpoint().is_ok());
        m.cancel();
        assert!(m.is_cancelled());
        assert!(matches!(m.checkpoint(), Err(Error::Cancelled)));
        m.reset();
        assert!(m.checkpoint().is_ok());
        assert_eq!(m.progress(), 0.0);
    }

    #[test]
    fn config_builders_apply() {
        let c = MosaicConfig::default()
            .with_dimensions(320, 240)
            .with_blend_type(BlendType::Full)
            .with_strip_type(StripType::Wide)
            .with_quarter_res(true)
            .with_still_threshold(1.25)
            .with_max_frames(40);
        assert_eq!(c.width, 320);
        assert_eq!(c.height, 240);
        assert_eq!(c.blend_type, BlendType::Full);
        assert_eq!(c.strip_type, StripType::Wide);
        assert!(c.quarter_res);
        assert_eq!(c.still_threshold, 1.25);
        assert_eq!(c.max_frames, 40);
    }
}
