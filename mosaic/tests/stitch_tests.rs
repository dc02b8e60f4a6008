//! End-to-end stitching tests driving the facade with a scripted
//! registration provider.

use std::collections::VecDeque;

use pano_core::transform::{translation, Transform};
use pano_core::YuvFrame;
use pano_mosaic::{
    BlendType, Error, FrameStatus, Mosaic, MosaicConfig, RegistrationProvider, Result, StripType,
};

/// Registration stub that replays a fixed list of homographies.
struct ScriptedProvider {
    transforms: VecDeque<Transform>,
    inliers: VecDeque<usize>,
    corners: usize,
}

impl ScriptedProvider {
    fn new(transforms: Vec<Transform>) -> Box<Self> {
        Box::new(Self {
            transforms: transforms.into(),
            inliers: VecDeque::new(),
            corners: 500,
        })
    }
}

impl RegistrationProvider for ScriptedProvider {
    fn initialize(&mut self, _width: usize, _height: usize) -> Result<()> {
        Ok(())
    }

    fn register(&mut self, _luma: &[u8]) -> Result<Transform> {
        Ok(self
            .transforms
            .pop_front()
            .unwrap_or_else(Transform::identity))
    }

    fn reference_corner_count(&self) -> usize {
        self.corners
    }

    fn inlier_count(&self) -> usize {
        50
    }

    fn update_reference(&mut self, _luma: &[u8], _quarter_res: bool) -> Result<()> {
        Ok(())
    }
}

/// Variant that also scripts the inlier count per registration.
struct StarvingProvider {
    inner: ScriptedProvider,
    last_inliers: usize,
}

impl RegistrationProvider for StarvingProvider {
    fn initialize(&mut self, w: usize, h: usize) -> Result<()> {
        self.inner.initialize(w, h)
    }

    fn register(&mut self, luma: &[u8]) -> Result<Transform> {
        self.last_inliers = self.inner.inliers.pop_front().unwrap_or(50);
        self.inner.register(luma)
    }

    fn reference_corner_count(&self) -> usize {
        self.inner.corners
    }

    fn inlier_count(&self) -> usize {
        self.last_inliers
    }

    fn update_reference(&mut self, luma: &[u8], q: bool) -> Result<()> {
        self.inner.update_reference(luma, q)
    }
}

fn uniform_frame(w: usize, h: usize, y: u8) -> YuvFrame {
    let plane = w * h;
    let mut data = vec![y; plane];
    data.resize(3 * plane, 128);
    YuvFrame::from_planar(data, w, h).unwrap()
}

fn config(blend: BlendType, strip: StripType) -> MosaicConfig {
    MosaicConfig::default()
        .with_dimensions(100, 100)
        .with_blend_type(blend)
        .with_strip_type(strip)
}

#[test]
fn two_shifted_frames_blend_into_a_padded_mosaic() {
    // The camera pans 10 px right, so the provider sees the reference move
    // 10 px left in the new frame.
    let provider = ScriptedProvider::new(vec![translation(-10.0, 0.0)]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();

    assert_eq!(m.add_frame(uniform_frame(100, 100, 100)).unwrap(), FrameStatus::Ok);
    assert_eq!(m.add_frame(uniform_frame(100, 100, 100)).unwrap(), FrameStatus::Ok);
    assert_eq!(m.frame_count(), 2);

    let out = m.create_mosaic().unwrap().unwrap();
    // 110 px of coverage, rounded up to a multiple of 4
    assert_eq!(out.width(), 112);
    assert_eq!(out.height(), 100);

    // interior pixels reproduce the uniform input
    let y = out.y();
    let center = y[50 * 112 + 56];
    assert!(
        (center as i32 - 100).abs() <= 1,
        "center luma {center} deviates from input"
    );
    // chroma stays neutral
    assert!((out.v()[50 * 112 + 56] as i32 - 128).abs() <= 1);

    // the padding column outside all frames is the gray border
    assert_eq!(y[111], 96);

    assert_eq!(m.monitor().progress(), 100.0);
}

#[test]
fn single_frame_mosaic_is_the_frame_itself() {
    let provider = ScriptedProvider::new(vec![]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    m.add_frame(uniform_frame(100, 100, 80)).unwrap();

    let out = m.create_mosaic().unwrap().unwrap();
    assert_eq!(out.width(), 100);
    assert_eq!(out.height(), 100);
    let center = out.y()[50 * 100 + 50];
    assert!((center as i32 - 80).abs() <= 1);
}

#[test]
fn horizontal_mode_crops_to_a_multiple_of_eight() {
    let provider = ScriptedProvider::new(vec![translation(-10.0, 0.0)]);
    let mut m = Mosaic::new(config(BlendType::Horizontal, StripType::Thin), provider).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();

    let out = m.create_mosaic().unwrap().unwrap();
    assert_eq!(out.width() % 8, 0);
    assert_eq!(out.height() % 8, 0);
    assert_eq!((out.width(), out.height()), (104, 96));

    // no gray border survives the crop
    assert!(out.y().iter().all(|&y| y != 96));
}

#[test]
fn padding_gray_never_bleeds_into_covered_pixels() {
    // Coverage ends at column 109 while the output is padded to 112; the
    // pad columns must stay border gray without the coarse pyramid levels
    // mixing that gray back into reconstructed interior pixels.
    let provider = ScriptedProvider::new(vec![translation(-10.0, 0.0)]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();

    let out = m.create_mosaic().unwrap().unwrap();
    assert_eq!((out.width(), out.height()), (112, 100));

    let y = out.y();
    for row in 0..100 {
        for col in 0..110 {
            let v = y[row * 112 + col] as i32;
            assert!(
                (v - 100).abs() <= 1,
                "covered pixel ({col},{row}) reconstructed as {v}"
            );
        }
        for col in 110..112 {
            assert_eq!(y[row * 112 + col], 96, "pad column {col} in row {row}");
        }
    }
}

#[test]
fn wide_strips_cross_fade_between_frames() {
    let steps: Vec<Transform> = (0..4).map(|_| translation(-12.0, 0.0)).collect();
    let provider = ScriptedProvider::new(steps);
    let mut m = Mosaic::new(config(BlendType::CylindricalPan, StripType::Wide), provider).unwrap();
    for i in 0..5 {
        let status = m.add_frame(uniform_frame(100, 100, 60 + 20 * i)).unwrap();
        assert!(status.accepted());
    }

    let out = m.create_mosaic().unwrap().unwrap();
    assert_eq!(out.width(), 148);
    assert_eq!(out.height(), 100);
    // center of the sweep lands between the first and last frame's luma
    let center = out.y()[50 * 148 + 74];
    assert!((60..=140).contains(&(center as i32)), "center luma {center}");
}

#[test]
fn runaway_sweep_is_rejected_as_too_big() {
    // Three frames 300 px apart cover 700 px with no overlap: more than
    // five times one frame's area.
    let provider = ScriptedProvider::new(vec![
        translation(-300.0, 0.0),
        translation(-300.0, 0.0),
    ]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    for _ in 0..3 {
        m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    }
    assert!(matches!(m.create_mosaic(), Err(Error::MosaicTooBig)));
}

#[test]
fn cancellation_aborts_blending() {
    let provider = ScriptedProvider::new(vec![translation(-10.0, 0.0)]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    m.add_frame(uniform_frame(100, 100, 100)).unwrap();

    m.monitor().cancel();
    assert!(matches!(m.create_mosaic(), Err(Error::Cancelled)));
}

#[test]
fn low_texture_first_frame_is_rejected() {
    let mut provider = ScriptedProvider::new(vec![]);
    provider.corners = 10;
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    assert_eq!(
        m.add_frame(uniform_frame(100, 100, 100)).unwrap(),
        FrameStatus::LowTexture
    );
    assert_eq!(m.frame_count(), 0);
    // with nothing retained, creating the mosaic is a no-op success
    assert!(m.create_mosaic().unwrap().is_none());
    assert_eq!(m.monitor().progress(), 100.0);
}

#[test]
fn zero_frames_is_a_noop_success() {
    let provider = ScriptedProvider::new(vec![]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    assert!(m.create_mosaic().unwrap().is_none());
    assert!(m.create_mosaic_rgb().unwrap().is_none());
    assert_eq!(m.monitor().progress(), 100.0);
}

#[test]
fn stationary_frames_are_dropped() {
    let provider = ScriptedProvider::new(vec![translation(0.1, 0.0)]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    assert_eq!(m.add_frame(uniform_frame(100, 100, 100)).unwrap(), FrameStatus::Ok);
    assert_eq!(
        m.add_frame(uniform_frame(100, 100, 100)).unwrap(),
        FrameStatus::Stationary
    );
    assert_eq!(m.frame_count(), 1);
}

#[test]
fn starved_registration_falls_back_to_dead_reckoning() {
    let mut inner = ScriptedProvider::new(vec![
        translation(-20.0, 0.0),
        translation(500.0, 500.0), // nonsense transform with too few inliers
    ]);
    inner.inliers = VecDeque::from(vec![50, 5]);
    let provider = Box::new(StarvingProvider {
        inner: *inner,
        last_inliers: 50,
    });
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();

    m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    assert_eq!(m.add_frame(uniform_frame(100, 100, 100)).unwrap(), FrameStatus::Ok);
    assert_eq!(
        m.add_frame(uniform_frame(100, 100, 100)).unwrap(),
        FrameStatus::FewInliers
    );
    assert_eq!(m.frame_count(), 3);
}

#[test]
fn mismatched_frame_dimensions_are_refused() {
    let provider = ScriptedProvider::new(vec![]);
    let mut m = Mosaic::new(config(BlendType::Full, StripType::Thin), provider).unwrap();
    assert!(matches!(
        m.add_frame(uniform_frame(64, 64, 100)),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn frame_capacity_is_enforced() {
    let steps: Vec<Transform> = (0..4).map(|_| translation(-20.0, 0.0)).collect();
    let provider = ScriptedProvider::new(steps);
    let cfg = config(BlendType::Full, StripType::Thin).with_max_frames(3);
    let mut m = Mosaic::new(cfg, provider).unwrap();
    for _ in 0..3 {
        m.add_frame(uniform_frame(100, 100, 100)).unwrap();
    }
    assert!(matches!(
        m.add_frame(uniform_frame(100, 100, 100)),
        Err(Error::InvalidInput(_))
    ));
}
