//! Smoke tests for the top-level re-exports: RGB in, RGB out.

use image::{Rgb, RgbImage};
use pano::core::transform::{translation, Transform};
use pano::mosaic::Result;
use pano::{BlendType, FrameStatus, Mosaic, MosaicConfig, RegistrationProvider, StripType};

struct FixedPan {
    step: Transform,
}

impl RegistrationProvider for FixedPan {
    fn initialize(&mut self, _w: usize, _h: usize) -> Result<()> {
        Ok(())
    }
    fn register(&mut self, _luma: &[u8]) -> Result<Transform> {
        Ok(self.step)
    }
    fn reference_corner_count(&self) -> usize {
        200
    }
    fn inlier_count(&self) -> usize {
        40
    }
    fn update_reference(&mut self, _luma: &[u8], _quarter_res: bool) -> Result<()> {
        Ok(())
    }
}

#[test]
fn rgb_frames_round_trip_through_the_facade() {
    let provider = FixedPan {
        step: translation(-8.0, 0.0),
    };
    let config = MosaicConfig::default()
        .with_dimensions(64, 64)
        .with_blend_type(BlendType::Full)
        .with_strip_type(StripType::Thin);
    let mut m = Mosaic::new(config, Box::new(provider)).unwrap();

    let frame = RgbImage::from_pixel(64, 64, Rgb([180, 90, 60]));
    assert_eq!(m.add_frame_rgb(&frame).unwrap(), FrameStatus::Ok);
    assert_eq!(m.add_frame_rgb(&frame).unwrap(), FrameStatus::Ok);

    let out = m.create_mosaic_rgb().unwrap().unwrap();
    // 8 px of pan widens the mosaic, rounded up to a multiple of 4
    assert_eq!(out.width(), 72);
    assert_eq!(out.height(), 64);

    let Rgb([r, g, b]) = *out.get_pixel(36, 32);
    assert!((r as i32 - 180).abs() <= 8, "r = {r}");
    assert!((g as i32 - 90).abs() <= 8, "g = {g}");
    assert!((b as i32 - 60).abs() <= 8, "b = {b}");
}
