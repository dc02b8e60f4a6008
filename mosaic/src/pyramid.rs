//! Bordered 16-bit image pyramids for Burt-Adelson multi-band blending.
//!
//! Every level carries a replicated border so the 5-tap reduce and 3-tap
//! expand kernels never need bounds checks near the edges. Samples are
//! stored pre-scaled by 8 (three fractional bits) so the integer kernels
//! keep sub-pixel precision across six levels.

use crate::{Error, Result};

/// Border width carried on every pyramid level, in pixels.
pub const BORDER: usize = 8;

/// One pyramid level: a `width x height` interior surrounded by a border on
/// all four sides. Coordinates are signed; `(-border, -border)` addresses
/// the top-left border corner.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    width: usize,
    height: usize,
    border: usize,
    stride: usize,
    data: Vec<i16>,
}

impl PyramidLevel {
    fn new(width: usize, height: usize, border: usize) -> Result<Self> {
        let stride = width + 2 * border;
        let len = stride * (height + 2 * border);
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::Memory(format!("pyramid level {width}x{height}")))?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            border,
            stride,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn border(&self) -> usize {
        self.border
    }

    #[inline]
    fn idx(&self, x: isize, y: isize) -> usize {
        debug_assert!(x >= -(self.border as isize) && x < (self.width + self.border) as isize);
        debug_assert!(y >= -(self.border as isize) && y < (self.height + self.border) as isize);
        (y + self.border as isize) as usize * self.stride + (x + self.border as isize) as usize
    }

    #[inline]
    pub fn at(&self, x: isize, y: isize) -> i16 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: isize, y: isize, v: i16) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    pub fn fill(&mut self, v: i16) {
        self.data.fill(v);
    }

    /// Replicates the interior edge pixels outward into the border region.
    pub fn border_spread(&mut self, left: usize, right: usize, top: usize, bottom: usize) {
        let w = self.width as isize;
        let h = self.height as isize;
        if left > 0 || right > 0 {
            for y in 0..h {
                let lv = self.at(0, y);
                for x in 1..=left as isize {
                    self.set(-x, y, lv);
                }
                let rv = self.at(w - 1, y);
                for x in 0..right as isize {
                    self.set(w + x, y, rv);
                }
            }
        }
        if top > 0 || bottom > 0 {
            for x in -(left as isize)..w + right as isize {
                let tv = self.at(x, 0);
                for y in 1..=top as isize {
                    self.set(x, -y, tv);
                }
                let bv = self.at(x, h - 1);
                for y in 0..bottom as isize {
                    self.set(x, h + y, bv);
                }
            }
        }
    }
}

/// A stack of levels; level 0 is full resolution and each level above it
/// halves both dimensions (rounding up).
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    pub fn new(width: usize, height: usize, levels: usize, border: usize) -> Result<Self> {
        let mut stack = Vec::with_capacity(levels);
        let (mut w, mut h) = (width, height);
        for _ in 0..levels {
            stack.push(PyramidLevel::new(w, h, border)?);
            w = (w + 1) / 2;
            h = (h + 1) / 2;
        }
        Ok(Self { levels: stack })
    }

    /// Deepest level count usable for a `width x height` base image.
    pub fn max_levels(width: usize, height: usize) -> usize {
        let short_side = width.min(height).max(1) as f64;
        let max = (short_side.log2().ceil() as isize) - 2;
        max.max(1) as usize
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> &PyramidLevel {
        &self.levels[i]
    }

    pub fn level_mut(&mut self, i: usize) -> &mut PyramidLevel {
        &mut self.levels[i]
    }

    /// Fills every level above 0 by low-pass downsampling the level below it
    /// with the separable 1-4-6-4-1/16 kernel.
    pub fn reduce(&mut self, nlev: usize) {
        for i in 1..nlev.min(self.levels.len()) {
            let (head, tail) = self.levels.split_at_mut(i);
            let src = &mut head[i - 1];
            let b = src.border;
            src.border_spread(b, b, b, b);
            reduce_into(src, &mut tail[0]);
        }
    }

    /// Walks the expansion chain: `mode < 0` turns levels `0..nlev-1` into a
    /// Laplacian stack by subtracting each level's upsampled parent;
    /// `mode > 0` reverses that, collapsing the stack back to level 0.
    pub fn expand(&mut self, nlev: usize, mode: i32) {
        let nlev = nlev.min(self.levels.len());
        if nlev < 2 {
            return;
        }
        if mode < 0 {
            for i in 0..nlev - 1 {
                self.expand_step(i, -1);
            }
        } else {
            for i in (0..nlev - 1).rev() {
                self.expand_step(i, 1);
            }
        }
    }

    fn expand_step(&mut self, i: usize, sign: i32) {
        let (head, tail) = self.levels.split_at_mut(i + 1);
        let dst = &mut head[i];
        let src = &mut tail[0];
        let b = src.border;
        src.border_spread(b, b, b, b);
        for y in 0..dst.height as isize {
            for x in 0..dst.width as isize {
                let e = expanded_sample(src, x, y);
                let v = dst.at(x, y) as i32 + sign * e;
                dst.set(x, y, v as i16);
            }
        }
    }
}

fn reduce_into(src: &PyramidLevel, dst: &mut PyramidLevel) {
    for y in 0..dst.height as isize {
        for x in 0..dst.width as isize {
            let (sx, sy) = (2 * x, 2 * y);
            let mut col = [0i32; 5];
            for (j, c) in col.iter_mut().enumerate() {
                let yy = sy + j as isize - 2;
                let a = src.at(sx - 2, yy) as i32;
                let b = src.at(sx - 1, yy) as i32;
                let m = src.at(sx, yy) as i32;
                let d = src.at(sx + 1, yy) as i32;
                let e = src.at(sx + 2, yy) as i32;
                *c = (a + e + ((b + d) << 2) + 6 * m + 8) >> 4;
            }
            let v = (col[0] + col[4] + ((col[1] + col[3]) << 2) + 6 * col[2] + 8) >> 4;
            dst.set(x, y, v as i16);
        }
    }
}

/// Upsampled value of `src` at full-resolution coordinate `(x, y)`.
///
/// Even taps blend three parent pixels as (a + 6c + b + 4) >> 3, odd taps
/// average the two flanking parents. Applied separably, this is the exact
/// integer adjoint of the reduce kernel's even/odd phases.
fn expanded_sample(src: &PyramidLevel, x: isize, y: isize) -> i32 {
    let hx = x >> 1;
    let hy = y >> 1;
    let row = |yy: isize| -> i32 {
        if x & 1 == 0 {
            let a = src.at(hx - 1, yy) as i32;
            let c = src.at(hx, yy) as i32;
            let b = src.at(hx + 1, yy) as i32;
            (6 * c + a + b + 4) >> 3
        } else {
            let a = src.at(hx, yy) as i32;
            let b = src.at(hx + 1, yy) as i32;
            (a + b + 1) >> 1
        }
    };
    if y & 1 == 0 {
        let a = row(hy - 1);
        let c = row(hy);
        let b = row(hy + 1);
        (6 * c + a + b + 4) >> 3
    } else {
        let a = row(hy);
        let b = row(hy + 1);
        (a + b + 1) >> 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(level: &mut PyramidLevel) {
        for y in 0..level.height() as isize {
            for x in 0..level.width() as isize {
                let v = (((x * 7 + y * 13) % 251) as i16) << 3;
                level.set(x, y, v);
            }
        }
    }

    #[test]
    fn border_spread_replicates_edges() {
        let mut p = Pyramid::new(4, 4, 1, BORDER).unwrap();
        let lvl = p.level_mut(0);
        checkerboard(lvl);
        let b = lvl.border();
        lvl.border_spread(b, b, b, b);
        assert_eq!(lvl.at(-3, 2), lvl.at(0, 2));
        assert_eq!(lvl.at(5, 1), lvl.at(3, 1));
        assert_eq!(lvl.at(2, -8), lvl.at(2, 0));
        assert_eq!(lvl.at(-1, -1), lvl.at(0, 0));
        assert_eq!(lvl.at(4, 4), lvl.at(3, 3));
    }

    #[test]
    fn levels_halve_rounding_up() {
        let p = Pyramid::new(101, 37, 4, BORDER).unwrap();
        assert_eq!(p.level(1).width(), 51);
        assert_eq!(p.level(1).height(), 19);
        assert_eq!(p.level(2).width(), 26);
        assert_eq!(p.level(3).width(), 13);
    }

    #[test]
    fn expand_nearly_inverts_reduce_on_smooth_input() {
        // Reconstructing level 0 purely from the reduced level 1 must stay
        // close to the original on low-frequency content; both kernels are
        // exact on linear ramps up to integer rounding and edge replication.
        let mut p = Pyramid::new(48, 40, 2, BORDER).unwrap();
        for y in 0..40isize {
            for x in 0..48isize {
                p.level_mut(0).set(x, y, ((2 * x + 3 * y) as i16) << 3);
            }
        }
        let original: Vec<i16> = (0..40)
            .flat_map(|y| (0..48).map(move |x| (x, y)))
            .map(|(x, y)| p.level(0).at(x, y))
            .collect();

        p.reduce(2);
        p.level_mut(0).fill(0);
        p.expand(2, 1);

        let mut abs_err = 0.0f64;
        for (i, (y, x)) in (0..40).flat_map(|y| (0..48).map(move |x| (y, x))).enumerate() {
            let got = p.level(0).at(x, y) as f64 / 8.0;
            let want = original[i] as f64 / 8.0;
            abs_err += (got - want).abs();
        }
        let mae = abs_err / (48.0 * 40.0);
        assert!(mae < 2.0, "mean absolute reconstruction error {mae}");
    }

    #[test]
    fn max_levels_tracks_short_side() {
        assert_eq!(Pyramid::max_levels(640, 480), 7);
        assert_eq!(Pyramid::max_levels(64, 64), 4);
        assert_eq!(Pyramid::max_levels(4, 1000), 1);
    }
}
