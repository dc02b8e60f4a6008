//! Mosaic assembly: output bounds, per-pixel frame ownership, Laplacian
//! blending across the seams, and the final crop.
//!
//! The blender never composites whole frames. Each output pixel is owned by
//! the frame whose projected centroid is nearest (a Voronoi assignment,
//! bounded by the Delaunay neighbor graph), and only a band around each seam
//! mixes two frames, level by level, through the mosaic pyramids.

use crate::delaunay::{self, Triangulation};
use crate::frame::MosaicFrame;
use crate::interp::cubic_sample;
use crate::pyramid::{Pyramid, BORDER};
use crate::stitcher::Monitor;
use crate::{Error, Result};
use log::{debug, info};
use pano_core::geometry::{clip_to_segment, hypot_sq, in_segment, quad_centroid, Bounds, IntRect};
use pano_core::transform::{self, Transform};
use pano_core::YuvFrame;
use rayon::prelude::*;

/// Pyramid levels used for blending.
pub const BLEND_RANGE_DEFAULT: usize = 6;

/// Seam overlap slack, in pixels, kept on both sides of a Voronoi bisector.
const ROUNDOFF_OVERLAP: f64 = 1.5;

/// Minimum projected-center travel before a frame contributes a wide strip.
const STRIP_SEPARATION_THRESHOLD_PXLS: f64 = 10.0;

/// Half-width of the cross-fade band around a wide-strip seam.
const STRIP_CROSS_FADE_WIDTH_PXLS: usize = 2;

/// Deepest pyramid level that still cross-fades; coarser levels blend fully.
const STRIP_CROSS_FADE_MAX_PYR_LEVEL: usize = 2;

/// The mosaic may cover at most this multiple of one frame's area.
const LIMIT_SIZE_MULTIPLIER: f64 = 5.0;

/// The mosaic's short side may be at most this multiple of the frame height.
const LIMIT_HEIGHT_MULTIPLIER: f64 = 2.5;

const TIME_PERCENT_BLEND: f32 = 75.0;
const TIME_PERCENT_FINAL: f32 = 5.0;

/// Owner-plane value for pixels no frame covers.
const UNASSIGNED: u8 = 255;
const GRAY_Y: u8 = 96;
const NEUTRAL_CHROMA: u8 = 128;

/// Output projection applied on top of frame alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendType {
    /// Raw projective mosaic, re-based on the middle frame.
    Full,
    /// Like [`Full`](BlendType::Full) but intended for free-form panning.
    Pan,
    /// Cylindrical unwarp without the final crop.
    CylindricalPan,
    /// Cylindrical unwarp plus auto-crop to the clean interior.
    Horizontal,
}

/// How much of each frame survives into the mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripType {
    /// Every frame contributes a sliver around its Voronoi cell.
    Thin,
    /// Distant frames are subsampled and cross-faded over wider bands.
    Wide,
}

/// Cylindrical unwarp parameters, fitted once per blend from the sweep of
/// the projected frame centers.
#[derive(Debug, Clone, Copy, Default)]
struct WarpGeometry {
    /// Total sector angle of the sweep; 0 disables the unwarp.
    theta: f64,
    /// Arc length of the sweep, i.e. the unwarped strip width.
    width: f64,
    radius: f64,
    direction: f64,
    correction: f64,
    x: f64,
    y: f64,
    /// Major sweep axis.
    horizontal: bool,
}

/// One blending site: a selected frame, its projected footprint, and the
/// footprint clipped against its Voronoi neighbors.
struct Site {
    frame: usize,
    center: (f64, f64),
    brect: Bounds,
    vcrect: Bounds,
}

/// The three mask planes, reused as the output image. Y holds the owning
/// site index per pixel (255 = none), V the cross-fade partner index, and U
/// the cross-fade weight in percent.
struct MaskPlanes {
    y: Vec<u8>,
    v: Vec<u8>,
    u: Vec<u8>,
    width: usize,
    height: usize,
}

impl MaskPlanes {
    fn new(width: usize, height: usize) -> Result<Self> {
        let alloc = |fill: u8| -> Result<Vec<u8>> {
            let mut p = Vec::new();
            p.try_reserve_exact(width * height)
                .map_err(|_| Error::Memory(format!("mosaic plane {width}x{height}")))?;
            p.resize(width * height, fill);
            Ok(p)
        };
        Ok(Self {
            y: alloc(UNASSIGNED)?,
            v: alloc(NEUTRAL_CHROMA)?,
            u: alloc(NEUTRAL_CHROMA)?,
            width,
            height,
        })
    }

    #[inline]
    fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    fn y_at(&self, x: usize, y: usize) -> u8 {
        self.y[self.idx(x, y)]
    }

    #[inline]
    fn v_at(&self, x: usize, y: usize) -> u8 {
        self.v[self.idx(x, y)]
    }

    #[inline]
    fn u_at(&self, x: usize, y: usize) -> u8 {
        self.u[self.idx(x, y)]
    }

    #[inline]
    fn set_y(&mut self, x: usize, y: usize, val: u8) {
        let i = self.idx(x, y);
        self.y[i] = val;
    }

    #[inline]
    fn set_v(&mut self, x: usize, y: usize, val: u8) {
        let i = self.idx(x, y);
        self.v[i] = val;
    }

    #[inline]
    fn set_u(&mut self, x: usize, y: usize, val: u8) {
        let i = self.idx(x, y);
        self.u[i] = val;
    }

    fn into_yuv(self) -> Result<YuvFrame> {
        let (w, h) = (self.width, self.height);
        let mut data = self.y;
        data.extend_from_slice(&self.v);
        data.extend_from_slice(&self.u);
        YuvFrame::from_planar(data, w, h).map_err(Error::from)
    }
}

/// The blend engine. One instance serves one frame geometry; [`run`](Blend::run)
/// may be called repeatedly as more frames accumulate.
pub struct Blend {
    blend_type: BlendType,
    strip_type: StripType,
    frame_width: usize,
    frame_height: usize,
    levels: usize,
    levels_c: usize,
    warp: WarpGeometry,
}

impl Blend {
    pub fn new(
        blend_type: BlendType,
        strip_type: StripType,
        frame_width: usize,
        frame_height: usize,
    ) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(Error::InvalidInput("zero frame dimensions".into()));
        }
        let levels = BLEND_RANGE_DEFAULT
            .min(Pyramid::max_levels(frame_width, frame_height))
            .max(1);
        Ok(Self {
            blend_type,
            strip_type,
            frame_width,
            frame_height,
            levels,
            levels_c: levels,
            warp: WarpGeometry::default(),
        })
    }

    /// Blends the accepted frames into one mosaic image.
    ///
    /// Frame transforms are re-based in place for the projective modes, so
    /// the caller should treat the slice as consumed.
    pub fn run(&mut self, frames: &mut [MosaicFrame], monitor: &Monitor) -> Result<YuvFrame> {
        if frames.is_empty() {
            return Err(Error::NotReady("no frames accepted for blending"));
        }
        // The owner plane stores site indices in a byte, with 255 reserved.
        if frames.len() >= UNASSIGNED as usize {
            return Err(Error::InvalidInput(format!(
                "{} frames exceed the {} supported per mosaic",
                frames.len(),
                UNASSIGNED as usize - 1
            )));
        }

        if matches!(self.blend_type, BlendType::Full | BlendType::Pan) {
            align_to_middle_frame(frames)?;
        }

        let sel: Vec<usize> = match self.strip_type {
            StripType::Thin => (0..frames.len()).collect(),
            StripType::Wide => self.select_relevant_frames(frames)?,
        };

        self.compute_blend_parameters(frames, &sel, true)?;

        // Project every selected frame to find the mosaic extent, the crop
        // seeds, and the site centers.
        let mut sites: Vec<Site> = Vec::with_capacity(sel.len());
        let mut global = Bounds::empty();
        let mut x_left = [f64::INFINITY; 2];
        let mut x_right = [f64::NEG_INFINITY; 2];
        let mut y_top = [f64::INFINITY; 2];
        let mut y_bottom = [f64::NEG_INFINITY; 2];

        for &fi in &sel {
            let mb = &frames[fi];
            let brect = self.frame_to_mosaic_rect(mb.width(), mb.height(), &mb.transform)?;
            global.include_bounds(&brect);

            let w1 = mb.width() as f64 - 1.0;
            let h1 = mb.height() as f64 - 1.0;
            let c0 = self.frame_to_mosaic(&mb.transform, 0.0, 0.0)?;
            let c1 = self.frame_to_mosaic(&mb.transform, 0.0, h1)?;
            let c2 = self.frame_to_mosaic(&mb.transform, w1, h1)?;
            let c3 = self.frame_to_mosaic(&mb.transform, w1, 0.0)?;

            // Track the corner pairs of the extreme frames; they seed the
            // crop so the gray wedges at the mosaic ends are excluded.
            if c0.0 < x_left[0] || c1.0 < x_left[1] {
                x_left = [c0.0, c1.0];
            }
            if c3.0 > x_right[0] || c2.0 > x_right[1] {
                x_right = [c3.0, c2.0];
            }
            if c0.1 < y_top[0] || c3.1 < y_top[1] {
                y_top = [c0.1, c3.1];
            }
            if c1.1 > y_bottom[0] || c2.1 > y_bottom[1] {
                y_bottom = [c1.1, c2.1];
            }

            let center = quad_centroid(&[c0, c1, c2, c3]);
            sites.push(Site {
                frame: fi,
                center,
                brect,
                vcrect: brect,
            });
        }

        let full = IntRect {
            left: global.x_min.floor() as i32,
            top: global.y_min.floor() as i32,
            right: global.x_max.ceil() as i32,
            bottom: global.y_max.ceil() as i32,
        };
        // Exact blend-rect size; the pyramids are allocated at this size so
        // reconstruction never mixes in texels no site ever wrote.
        let pw = (full.right - full.left + 1) as usize;
        let ph = (full.bottom - full.top + 1) as usize;

        // Rounding inward so the seeds never include the gray border.
        let x_left_most = (x_left[0].max(x_left[1]) - full.left as f64 + 1.0).max(0.0) as i32;
        let x_right_most =
            ((pw as f64 - 1.0).min(x_right[0].min(x_right[1]) - full.left as f64 - 1.0)) as i32;
        let y_top_most = (y_top[0].max(y_top[1]) - full.top as f64 + 1.0).max(0.0) as i32;
        let y_bottom_most =
            ((ph as f64 - 1.0).min(y_bottom[0].min(y_bottom[1]) - full.top as f64 - 1.0)) as i32;

        if x_right_most <= x_left_most || y_bottom_most <= y_top_most {
            return Err(Error::EmptyCrop);
        }

        // Only the output planes are rounded up to a multiple of 4; the pad
        // columns and rows stay unassigned and come out border gray.
        let mw = (pw + 3) & !3;
        let mh = (ph + 3) & !3;
        self.mosaic_size_check(mw, mh)?;

        let mut planes = MaskPlanes::new(mw, mh)?;

        let centers: Vec<(f64, f64)> = sites.iter().map(|s| s.center).collect();
        let tri = delaunay::triangulate(&centers, self.frame_width, self.frame_height);

        info!(
            "blending {} of {} frames into a {}x{} mosaic",
            sites.len(),
            frames.len(),
            mw,
            mh
        );

        let mut crop = IntRect {
            left: 0,
            top: 0,
            right: mw as i32 - 1,
            bottom: mh as i32 - 1,
        };
        if self.warp.horizontal {
            crop.left = x_left_most;
            crop.right = x_right_most;
        } else {
            crop.top = y_top_most;
            crop.bottom = y_bottom_most;
        }

        let mut mos_y = Pyramid::new(pw, ph, self.levels, BORDER)?;
        let mut mos_u = Pyramid::new(pw, ph, self.levels_c, BORDER)?;
        let mut mos_v = Pyramid::new(pw, ph, self.levels_c, BORDER)?;

        // Ownership pass: assign each mosaic pixel to its nearest site.
        for k in 0..sites.len() {
            monitor.checkpoint()?;
            let mut vc = sites[k].brect;
            clip_blend_rect(&centers, &tri, k, &mut vc);
            sites[k].vcrect = vc;
            self.compute_mask(&sites[k], &centers, &tri, k, full, &mut planes);
        }

        if self.strip_type == StripType::Wide {
            mark_cross_fade(&mut planes, self.warp.horizontal);
        }

        // Blending pass: project each frame's Laplacian pyramid into the
        // mosaic pyramids over the region it owns.
        let mut frame_y = Pyramid::new(self.frame_width, self.frame_height, self.levels, BORDER)?;
        let mut frame_u =
            Pyramid::new(self.frame_width, self.frame_height, self.levels_c, BORDER)?;
        let mut frame_v =
            Pyramid::new(self.frame_width, self.frame_height, self.levels_c, BORDER)?;

        for k in 0..sites.len() {
            monitor.checkpoint()?;
            let mb = &frames[sites[k].frame];
            self.fill_frame_pyramid(mb, &mut frame_y, &mut frame_u, &mut frame_v);
            self.process_pyramid_for_frame(
                &sites[k],
                &mb.transform,
                full,
                &mut planes,
                k as u8,
                &frame_y,
                &frame_u,
                &frame_v,
                &mut mos_y,
                &mut mos_u,
                &mut mos_v,
            )?;
            monitor.add_progress(TIME_PERCENT_BLEND / sites.len() as f32);
        }

        self.perform_final_blending(&mut planes, &mut mos_y, &mut mos_u, &mut mos_v, &mut crop);
        if crop.width() <= 0 || crop.height() <= 0 {
            return Err(Error::EmptyCrop);
        }
        monitor.add_progress(TIME_PERCENT_FINAL);

        debug!(
            "final mosaic {}x{}, crop {:?}",
            planes.width, planes.height, crop
        );

        if self.blend_type == BlendType::Horizontal {
            crop_final_mosaic(&planes, &crop)
        } else {
            planes.into_yuv()
        }
    }

    fn mosaic_size_check(&self, mw: usize, mh: usize) -> Result<()> {
        let (fw, fh) = (self.frame_width, self.frame_height);
        if mw < fw || mh < fh {
            return Err(Error::MosaicTooBig);
        }
        if (mw * mh) as f64 > (fw * fh) as f64 * LIMIT_SIZE_MULTIPLIER {
            return Err(Error::MosaicTooBig);
        }
        // Excessive travel in the secondary direction; the short side bounds
        // it whichever way the device was held.
        if mw.min(mh) as f64 > fh as f64 * LIMIT_HEIGHT_MULTIPLIER {
            return Err(Error::MosaicTooBig);
        }
        Ok(())
    }

    /// Keeps the first and last frames and any frame whose projected center
    /// moved far enough from the previously kept one.
    fn select_relevant_frames(&self, frames: &[MosaicFrame]) -> Result<Vec<usize>> {
        let n = frames.len();
        if n == 1 {
            return Ok(vec![0]);
        }
        let mid_x = frames[n - 1].width() as f64 / 2.0;
        let mid_y = frames[n - 1].height() as f64 / 2.0;
        let project = |t: &Transform| -> Result<(f64, f64)> {
            transform::apply(t, mid_x, mid_y).ok_or_else(point_at_infinity)
        };

        let (mut px, mut py) = project(&frames[0].transform)?;
        let mut sel = vec![0usize];
        for (i, mb) in frames.iter().enumerate().take(n - 1) {
            let (cx, cy) = project(&mb.transform)?;
            if (cx - px).abs() > STRIP_SEPARATION_THRESHOLD_PXLS
                || (cy - py).abs() > STRIP_SEPARATION_THRESHOLD_PXLS
            {
                sel.push(i);
                px = cx;
                py = cy;
            }
        }
        sel.push(n - 1);
        Ok(sel)
    }

    /// Fits the cylindrical unwarp to the sweep of projected frame centers.
    /// Projective modes leave `theta` at zero, which disables the unwarp.
    fn compute_blend_parameters(
        &mut self,
        frames: &[MosaicFrame],
        sel: &[usize],
        is_360: bool,
    ) -> Result<()> {
        self.warp = WarpGeometry::default();
        let first = &frames[sel[0]];
        let last = &frames[sel[sel.len() - 1]];

        let (fxpos, fypos) = (first.transform[(0, 2)], first.transform[(1, 2)]);
        let (lxpos, lypos) = (last.transform[(0, 2)], last.transform[(1, 2)]);
        self.warp.horizontal = (lxpos - fxpos).abs() > (lypos - fypos).abs();

        if !matches!(
            self.blend_type,
            BlendType::CylindricalPan | BlendType::Horizontal
        ) {
            return Ok(());
        }

        let mid_x = last.width() as f64 / 2.0;
        let mid_y = last.height() as f64 / 2.0;
        let project = |t: &Transform, x: f64, y: f64| -> Result<(f64, f64)> {
            transform::apply(t, x, y).ok_or_else(point_at_infinity)
        };

        let (first_x, first_y) = project(&first.transform, mid_x, mid_y)?;
        let (mut prev_x, mut prev_y) = (first_x, first_y);

        // Arc length of the sweep: the sum of chords between consecutive
        // projected image centers.
        let mut arc_length = 0.0;
        let mut last_theta = 0.0;
        for &fi in sel {
            let (cx, cy) = project(&frames[fi].transform, mid_x, mid_y)?;
            arc_length += hypot_sq(cx - prev_x, cy - prev_y).sqrt();
            if !is_360 {
                let this_theta = frames[fi].transform[(1, 0)].asin();
                self.warp.theta += this_theta - last_theta;
                last_theta = this_theta;
            }
            prev_x = cx;
            prev_y = cy;
        }

        self.warp.width = arc_length;
        if is_360 {
            // Sector angle from the accumulated in-plane rotation.
            self.warp.theta = last.transform[(1, 0)].asin();
        }
        if self.warp.theta == 0.0 {
            return Ok(());
        }

        let mut dx = prev_x - first_x;
        let mut dy = prev_y - first_y;

        if self.warp.horizontal {
            let radius_theta = dx / (std::f64::consts::FRAC_PI_2 - self.warp.theta).cos();
            self.warp.radius = (dy + radius_theta * self.warp.theta.cos()).abs();

            if is_360 {
                self.warp.x = first_x;
            } else if lxpos - fxpos < 0.0 {
                self.warp.x = first_x + mid_x;
                (prev_x, prev_y) = project(&last.transform, 0.0, mid_y)?;
            } else {
                self.warp.x = first_x - mid_x;
                (prev_x, prev_y) = project(&last.transform, last.width() as f64 - 1.0, mid_y)?;
            }
            dy = prev_y - first_y;
            self.warp.direction = if dy < 0.0 { 1.0 } else { -1.0 };
            self.warp.y = first_y - self.warp.radius * self.warp.direction;
            if dy * self.warp.theta > 0.0 {
                self.warp.width = -self.warp.width;
            }
        } else {
            let radius_theta = dy / (std::f64::consts::FRAC_PI_2 - self.warp.theta).cos();
            self.warp.radius = (dx + radius_theta * self.warp.theta.cos()).abs();

            if is_360 {
                self.warp.y = first_y;
            } else if lypos - fypos < 0.0 {
                self.warp.y = first_y + mid_y;
                (prev_x, prev_y) = project(&last.transform, mid_x, 0.0)?;
            } else {
                self.warp.y = first_y - mid_y;
                (prev_x, prev_y) = project(&last.transform, mid_x, last.height() as f64 - 1.0)?;
            }
            dx = prev_x - first_x;
            self.warp.direction = if dx < 0.0 { 1.0 } else { -1.0 };
            self.warp.x = first_x - self.warp.radius * self.warp.direction;
            if dx * self.warp.theta > 0.0 {
                self.warp.width = -self.warp.width;
            }
        }

        // Correction factor that keeps both strip ends at the same offset.
        let delta_x = prev_x - self.warp.x;
        let delta_y = prev_y - self.warp.y;
        let length = hypot_sq(delta_x, delta_y).sqrt();
        let delta = if self.warp.horizontal { delta_x } else { delta_y };
        let delta_theta = (delta / length).asin();
        self.warp.correction =
            ((self.warp.radius - length) * self.warp.direction) / (delta_theta / self.warp.theta);
        Ok(())
    }

    /// Frame coordinates to mosaic coordinates, including the cylindrical
    /// unwarp when one is active. Fails when the point projects to infinity.
    fn frame_to_mosaic(&self, trs: &Transform, x: f64, y: f64) -> Result<(f64, f64)> {
        let (xm, ym) = transform::apply(trs, x, y).ok_or_else(point_at_infinity)?;

        let wb = &self.warp;
        if wb.theta == 0.0 {
            Ok((xm, ym))
        } else if wb.horizontal {
            let dx = xm - wb.x;
            let dy = ym - wb.y;
            let length = hypot_sq(dx, dy).sqrt();
            let alpha = (dx / length).asin() / wb.theta;
            Ok((
                alpha * wb.width * wb.direction,
                (length - wb.radius) * wb.direction + alpha * wb.correction,
            ))
        } else {
            let dx = xm - wb.x;
            let dy = ym - wb.y;
            let length = hypot_sq(dx, dy).sqrt();
            let alpha = (dy / length).asin() / wb.theta;
            Ok((
                (length - wb.radius) * wb.direction + alpha * wb.correction,
                alpha * wb.width * wb.direction,
            ))
        }
    }

    /// Mosaic coordinates back into a frame, through the inverted transform.
    fn mosaic_to_frame(&self, inv: &Transform, x: f64, y: f64) -> Result<(f64, f64)> {
        let wb = &self.warp;
        let (xw, yw) = if wb.theta == 0.0 {
            (x, y)
        } else if wb.horizontal {
            let alpha = x * wb.direction / wb.width;
            let length = (y - alpha * wb.correction) * wb.direction + wb.radius;
            let s = (wb.theta * alpha).sin();
            let c = (1.0 - s * s).sqrt() * wb.direction;
            (length * s + wb.x, length * c + wb.y)
        } else {
            let alpha = y * wb.direction / wb.width;
            let length = (x - alpha * wb.correction) * wb.direction + wb.radius;
            let s = (wb.theta * alpha).sin();
            let c = (1.0 - s * s).sqrt() * wb.direction;
            (length * c + wb.x, length * s + wb.y)
        };
        transform::apply(inv, xw, yw).ok_or_else(point_at_infinity)
    }

    /// Projected footprint of a frame, walking the full perimeter because
    /// the unwarp bends straight borders.
    fn frame_to_mosaic_rect(
        &self,
        width: usize,
        height: usize,
        trs: &Transform,
    ) -> Result<Bounds> {
        let mut b = Bounds::empty();
        let last_x = width as f64 - 1.0;
        let last_y = height as f64 - 1.0;
        for i in 0..width {
            let (x, y) = self.frame_to_mosaic(trs, i as f64, 0.0)?;
            b.include(x, y);
            let (x, y) = self.frame_to_mosaic(trs, i as f64, last_y)?;
            b.include(x, y);
        }
        for i in 0..height {
            let (x, y) = self.frame_to_mosaic(trs, 0.0, i as f64)?;
            b.include(x, y);
            let (x, y) = self.frame_to_mosaic(trs, last_x, i as f64)?;
            b.include(x, y);
        }
        Ok(b)
    }

    /// Stamps `site_idx` into the owner plane wherever this site is at least
    /// as close to the pixel as every Voronoi neighbor.
    fn compute_mask(
        &self,
        site: &Site,
        centers: &[(f64, f64)],
        tri: &Triangulation,
        site_idx: usize,
        full: IntRect,
        planes: &mut MaskPlanes,
    ) {
        let (l, b, r, t) = clipped_level_rect(
            &site.vcrect,
            &site.brect,
            full,
            planes.width,
            planes.height,
            0,
            0.0,
        );
        for j in b..=t {
            if j < 0 || j >= planes.height as isize {
                continue;
            }
            let sj = (j + full.top as isize) as f64;
            for i in l..=r {
                if i < 0 || i >= planes.width as isize {
                    continue;
                }
                let si = (i + full.left as isize) as f64;

                let dself = hypot_sq(site.center.0 - si, site.center.1 - sj);
                let owned = tri
                    .neighbors(site_idx)
                    .all(|nb| hypot_sq(centers[nb].0 - si, centers[nb].1 - sj) >= dself);
                if owned {
                    planes.set_y(i as usize, j as usize, site_idx as u8);
                }
            }
        }
    }

    /// Loads one frame into the scratch pyramids: samples enter scaled by 8,
    /// then the stack is reduced and converted to Laplacian form.
    fn fill_frame_pyramid(
        &self,
        mb: &MosaicFrame,
        py: &mut Pyramid,
        pu: &mut Pyramid,
        pv: &mut Pyramid,
    ) {
        let (w, h) = (mb.width(), mb.height());
        let (ysrc, vsrc, usrc) = (mb.image.y(), mb.image.v(), mb.image.u());
        for row in 0..h {
            for col in 0..w {
                let i = row * w + col;
                py.level_mut(0)
                    .set(col as isize, row as isize, (ysrc[i] as i16) << 3);
                pu.level_mut(0)
                    .set(col as isize, row as isize, (usrc[i] as i16) << 3);
                pv.level_mut(0)
                    .set(col as isize, row as isize, (vsrc[i] as i16) << 3);
            }
        }
        for p in [&mut *py, &mut *pu, &mut *pv] {
            p.level_mut(0).border_spread(BORDER, BORDER, BORDER, BORDER);
        }
        py.reduce(self.levels);
        py.expand(self.levels, -1);
        pu.reduce(self.levels_c);
        pu.expand(self.levels_c, -1);
        pv.reduce(self.levels_c);
        pv.expand(self.levels_c, -1);
    }

    /// Warps one frame's Laplacian pyramid into the mosaic pyramids over the
    /// pixels this site owns (or cross-fades into).
    #[allow(clippy::too_many_arguments)]
    fn process_pyramid_for_frame(
        &self,
        site: &Site,
        trs: &Transform,
        full: IntRect,
        planes: &mut MaskPlanes,
        site_idx: u8,
        fy: &Pyramid,
        fu: &Pyramid,
        fv: &Pyramid,
        my: &mut Pyramid,
        mu: &mut Pyramid,
        mv: &mut Pyramid,
    ) -> Result<()> {
        let inv = transform::invert(trs)?;
        let (fw1, fh1) = (self.frame_width as f64 - 1.0, self.frame_height as f64 - 1.0);

        for dscale in 0..self.levels {
            let with_chroma = dscale < self.levels_c;
            let (lw, lh) = (my.level(dscale).width(), my.level(dscale).height());
            let (l, b, r, t) =
                clipped_level_rect(&site.vcrect, &site.brect, full, lw, lh, dscale, 0.5);
            let (sw, sh) = (fy.level(dscale).width(), fy.level(dscale).height());

            for j in b..=t {
                let jj = j << dscale;
                let sj = (jj + full.top as isize) as f64;
                for i in l..=r {
                    let ii = i << dscale;
                    let si = (ii + full.left as isize) as f64;

                    let in_mask = ii >= 0
                        && jj >= 0
                        && (ii as usize) < planes.width
                        && (jj as usize) < planes.height;
                    let (mx, mjy) = if in_mask {
                        (ii as usize, jj as usize)
                    } else {
                        (0, 0)
                    };

                    if in_mask
                        && planes.y_at(mx, mjy) != site_idx
                        && planes.v_at(mx, mjy) != site_idx
                        && planes.y_at(mx, mjy) != UNASSIGNED
                    {
                        continue;
                    }

                    // wt0 weighs the value already in the mosaic pyramid,
                    // wt1 the incoming frame sample.
                    let mut wt0 = 0.0;
                    let mut wt1 = 1.0;
                    if self.strip_type == StripType::Wide
                        && in_mask
                        && planes.y_at(mx, mjy) != UNASSIGNED
                    {
                        if planes.v_at(mx, mjy) == NEUTRAL_CHROMA
                            || dscale > STRIP_CROSS_FADE_MAX_PYR_LEVEL
                        {
                            wt0 = 0.0;
                            wt1 = 1.0;
                        } else {
                            wt0 = 1.0;
                            let w = planes.u_at(mx, mjy) as f64 / 100.0;
                            wt1 = if planes.y_at(mx, mjy) == site_idx {
                                w
                            } else {
                                1.0 - w
                            };
                        }
                    }

                    let (mut xx, mut yy) = self.mosaic_to_frame(&inv, si, sj)?;
                    if xx < 0.0 || yy < 0.0 || xx > fw1 || yy > fh1 {
                        if in_mask {
                            planes.set_y(mx, mjy, UNASSIGNED);
                            wt0 = 0.0;
                            wt1 = 1.0;
                        }
                    }

                    let scale = (1usize << dscale) as f64;
                    xx /= scale;
                    yy /= scale;
                    let x1 = xx.floor() as isize;
                    let y1 = yy.floor() as isize;

                    if in_segment(x1, sw, BORDER - 1) && in_segment(y1, sh, BORDER - 1) {
                        let s = cubic_sample(fy.level(dscale), xx, yy);
                        let d = my.level(dscale).at(i, j) as f64;
                        my.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                        if with_chroma {
                            let s = cubic_sample(fu.level(dscale), xx, yy);
                            let d = mu.level(dscale).at(i, j) as f64;
                            mu.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                            let s = cubic_sample(fv.level(dscale), xx, yy);
                            let d = mv.level(dscale).at(i, j) as f64;
                            mv.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                        }
                    } else {
                        let x1 = clip_to_segment(x1, sw, BORDER);
                        let y1 = clip_to_segment(y1, sh, BORDER);
                        let s = fy.level(dscale).at(x1, y1) as f64;
                        let d = my.level(dscale).at(i, j) as f64;
                        my.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                        if with_chroma {
                            let s = fv.level(dscale).at(x1, y1) as f64;
                            let d = mv.level(dscale).at(i, j) as f64;
                            mv.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                            let s = fu.level(dscale).at(x1, y1) as f64;
                            let d = mu.level(dscale).at(i, j) as f64;
                            mu.level_mut(dscale).set(i, j, (wt0 * d + 0.5 + wt1 * s) as i16);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Collapses the mosaic pyramids into the output planes, paints the gray
    /// border, and shrinks the crop past any row or column that still
    /// contains border pixels.
    fn perform_final_blending(
        &self,
        planes: &mut MaskPlanes,
        my: &mut Pyramid,
        mu: &mut Pyramid,
        mv: &mut Pyramid,
        crop: &mut IntRect,
    ) {
        my.expand(self.levels, 1);
        mu.expand(self.levels_c, 1);
        mv.expand(self.levels_c, 1);

        let (w, h) = (planes.width, planes.height);
        let mut invalid = vec![false; w * h];
        let (ly, lu, lv) = (my.level(0), mu.level(0), mv.level(0));
        let clamp8 = |v: i16| -> u8 { (v >> 3).clamp(0, 255) as u8 };

        planes
            .y
            .par_chunks_mut(w)
            .zip(planes.v.par_chunks_mut(w))
            .zip(planes.u.par_chunks_mut(w))
            .zip(invalid.par_chunks_mut(w))
            .enumerate()
            .for_each(|(j, (((yrow, vrow), urow), inv_row))| {
                for i in 0..w {
                    if yrow[i] < UNASSIGNED {
                        yrow[i] = clamp8(ly.at(i as isize, j as isize));
                        urow[i] = clamp8(lu.at(i as isize, j as isize));
                        vrow[i] = clamp8(lv.at(i as isize, j as isize));
                    } else {
                        yrow[i] = GRAY_Y;
                        urow[i] = NEUTRAL_CHROMA;
                        vrow[i] = NEUTRAL_CHROMA;
                        inv_row[i] = true;
                    }
                }
            });

        if self.warp.horizontal {
            let (lo, hi) = (crop.left.max(0) as usize, crop.right.max(0) as usize);
            for j in 0..h {
                if (lo..hi).all(|i| !invalid[j * w + i]) {
                    crop.top = j as i32;
                    break;
                }
            }
            for j in (0..h).rev() {
                if (lo..hi).all(|i| !invalid[j * w + i]) {
                    crop.bottom = j as i32;
                    break;
                }
            }
        } else {
            let (lo, hi) = (crop.top.max(0) as usize, crop.bottom.max(0) as usize);
            for i in 0..w {
                if (lo..hi).all(|j| !invalid[j * w + i]) {
                    crop.left = i as i32;
                    break;
                }
            }
            for i in (0..w).rev() {
                if (lo..hi).all(|j| !invalid[j * w + i]) {
                    crop.right = i as i32;
                    break;
                }
            }
        }

        // Crop dimensions rounded down to a multiple of 8.
        crop.bottom -= crop.height() & 7;
        crop.right -= crop.width() & 7;
    }
}

fn point_at_infinity() -> Error {
    pano_core::Error::Degenerate("point projects to infinity").into()
}

fn align_to_middle_frame(frames: &mut [MosaicFrame]) -> Result<()> {
    let inv = transform::invert(&frames[frames.len() / 2].transform)?;
    for mb in frames.iter_mut() {
        let mut t = inv * mb.transform;
        transform::normalize(&mut t)?;
        mb.transform = t;
    }
    Ok(())
}

/// Shrinks a site's footprint against the perpendicular bisectors to its
/// Voronoi neighbors, with a small overlap so seams never leave gaps.
fn clip_blend_rect(centers: &[(f64, f64)], tri: &Triangulation, k: usize, rect: &mut Bounds) {
    const EPSILON: f64 = 1e-5;
    let (cx, cy) = centers[k];
    for nb in tri.neighbors(k) {
        let dx = centers[nb].0 - cx;
        let dy = centers[nb].1 - cy;
        let xmid = cx + dx / 2.0;
        let ymid = cy + dy / 2.0;

        if dx > EPSILON {
            let yref = if dy >= 0.0 { rect.y_min } else { rect.y_max };
            let inter = ROUNDOFF_OVERLAP + xmid - dy * (yref - ymid) / dx;
            if inter < rect.x_max {
                rect.x_max = inter;
            }
        } else if dx < -EPSILON {
            let yref = if dy >= 0.0 { rect.y_min } else { rect.y_max };
            let inter = -ROUNDOFF_OVERLAP + xmid - dy * (yref - ymid) / dx;
            if inter > rect.x_min {
                rect.x_min = inter;
            }
        }
        if dy > EPSILON {
            let xref = if dx >= 0.0 { rect.x_min } else { rect.x_max };
            let inter = ROUNDOFF_OVERLAP + ymid - dx * (xref - xmid) / dy;
            if inter < rect.y_max {
                rect.y_max = inter;
            }
        } else if dy < -EPSILON {
            let xref = if dx >= 0.0 { rect.x_min } else { rect.x_max };
            let inter = -ROUNDOFF_OVERLAP + ymid - dx * (xref - xmid) / dy;
            if inter > rect.y_min {
                rect.y_min = inter;
            }
        }
    }
}

/// Level rectangle of a site's clipped footprint, widened by the pyramid
/// border along any side that was not clipped by a neighbor.
#[allow(clippy::too_many_arguments)]
fn clipped_level_rect(
    vc: &Bounds,
    br: &Bounds,
    full: IntRect,
    lw: usize,
    lh: usize,
    dscale: usize,
    half: f64,
) -> (isize, isize, isize, isize) {
    let scale = (1usize << dscale) as f64;
    let mut l = ((vc.x_min - full.left as f64) / scale) as isize;
    let mut b = ((vc.y_min - full.top as f64) / scale) as isize;
    let mut r = ((vc.x_max - full.left as f64) / scale + half) as isize;
    let mut t = ((vc.y_max - full.top as f64) / scale + half) as isize;

    let border = BORDER as isize;
    let (lw, lh) = (lw as isize, lh as isize);

    if vc.x_min == br.x_min {
        l = if l <= 0 { -border } else { l - border };
    } else if l < -border {
        l = -border;
    }
    if vc.y_min == br.y_min {
        b = if b <= 0 { -border } else { b - border };
    } else if b < -border {
        b = -border;
    }
    if vc.x_max == br.x_max {
        r = if r >= lw { lw + border - 1 } else { r + border };
    } else if r >= lw + border {
        r = lw + border - 1;
    }
    if vc.y_max == br.y_max {
        t = if t >= lh { lh + border - 1 } else { t + border };
    } else if t >= lh + border {
        t = lh + border - 1;
    }
    (l, b, r, t)
}

/// Wide-strip seam marking: wherever the owner plane changes between two
/// assigned pixels, paint the partner index into V and a ramp of mixing
/// weights into U across the cross-fade band.
fn mark_cross_fade(planes: &mut MaskPlanes, horizontal: bool) {
    let tw = STRIP_CROSS_FADE_WIDTH_PXLS;
    if tw == 0 {
        return;
    }
    let (w, h) = (planes.width, planes.height);

    if horizontal {
        for y in 0..h {
            let mut x = tw;
            while x + tw < w {
                let a = planes.y_at(x, y);
                let b = planes.y_at(x + 1, y);
                if a != b && a != UNASSIGNED && b != UNASSIGNED {
                    for o in (0..=tw).rev() {
                        planes.set_v(x - o, y, b);
                        planes.set_u(x - o, y, (50 + (99 - 50) * o / tw) as u8);
                    }
                    for o in 1..=tw {
                        planes.set_v(x + o, y, a);
                        let mirrored = planes.u_at(x - o, y);
                        planes.set_u(x + o, y, mirrored);
                    }
                    x += tw + 1;
                } else {
                    x += 1;
                }
            }
        }
    } else {
        for x in 0..w {
            let mut y = tw;
            while y + tw < h {
                let a = planes.y_at(x, y);
                let b = planes.y_at(x, y + 1);
                if a != b && a != UNASSIGNED && b != UNASSIGNED {
                    for o in (0..=tw).rev() {
                        planes.set_v(x, y - o, b);
                        planes.set_u(x, y - o, (50 + (99 - 50) * o / tw) as u8);
                    }
                    for o in 1..=tw {
                        planes.set_v(x, y + o, a);
                        let mirrored = planes.u_at(x, y - o);
                        planes.set_u(x, y + o, mirrored);
                    }
                    y += tw + 1;
                } else {
                    y += 1;
                }
            }
        }
    }
}

fn crop_final_mosaic(planes: &MaskPlanes, crop: &IntRect) -> Result<YuvFrame> {
    let cw = crop.width() as usize;
    let ch = crop.height() as usize;
    let mut data = Vec::new();
    data.try_reserve_exact(3 * cw * ch)
        .map_err(|_| Error::Memory(format!("cropped mosaic {cw}x{ch}")))?;

    for plane in [&planes.y, &planes.v, &planes.u] {
        for j in crop.top..=crop.bottom {
            let row = j as usize * planes.width;
            let lo = row + crop.left as usize;
            data.extend_from_slice(&plane[lo..lo + cw]);
        }
    }
    YuvFrame::from_planar(data, cw, ch).map_err(Error::from)
}
