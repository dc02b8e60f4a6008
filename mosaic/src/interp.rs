//! Fixed-table bicubic sampling over pyramid levels.
//!
//! Sub-pixel positions are quantized to tenths and looked up in a
//! precomputed 10x4 Catmull-Rom weight table, trading a little placement
//! precision for never re-deriving the polynomial per pixel. Fraction 0 maps
//! to the weights `[0, 1, 0, 0]`, so integer-translation warps copy samples
//! exactly.

use crate::pyramid::PyramidLevel;
use std::sync::LazyLock;

/// Number of quantized fractional steps per pixel.
const STEPS: usize = 10;

/// Catmull-Rom (tension -0.5) tap weights for each quantized fraction.
static WEIGHTS: LazyLock<[[f64; 4]; STEPS]> = LazyLock::new(|| {
    let mut table = [[0.0f64; 4]; STEPS];
    for (i, row) in table.iter_mut().enumerate() {
        let t = i as f64 / STEPS as f64;
        let t2 = t * t;
        let t3 = t2 * t;
        row[0] = 0.5 * (-t + 2.0 * t2 - t3);
        row[1] = 0.5 * (2.0 - 5.0 * t2 + 3.0 * t3);
        row[2] = 0.5 * (t + 4.0 * t2 - 3.0 * t3);
        row[3] = 0.5 * (t3 - t2);
    }
    table
});

#[inline]
fn weights_for(frac: f64) -> &'static [f64; 4] {
    let i = (frac * STEPS as f64) as usize;
    &WEIGHTS[i.min(STEPS - 1)]
}

/// Bicubic sample of `img` at the fractional position `(x, y)`.
///
/// Reads the 4x4 neighborhood around the floor position, so the caller must
/// guarantee `(x, y)` lies at least one pixel inside the bordered extent.
/// Returns the unrounded value; the blender folds it into a weighted sum
/// before quantizing.
pub fn cubic_sample(img: &PyramidLevel, x: f64, y: f64) -> f64 {
    let xi = x.floor() as isize;
    let yi = y.floor() as isize;
    let wx = weights_for(x - xi as f64);
    let wy = weights_for(y - yi as f64);

    let mut acc = 0.0;
    for (j, wyj) in wy.iter().enumerate() {
        let yy = yi - 1 + j as isize;
        let mut row = 0.0;
        for (i, wxi) in wx.iter().enumerate() {
            row += wxi * img.at(xi - 1 + i as isize, yy) as f64;
        }
        acc += wyj * row;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::{Pyramid, BORDER};
    use approx::assert_relative_eq;

    #[test]
    fn zero_fraction_is_an_exact_copy_weight() {
        let w = weights_for(0.0);
        assert_eq!(*w, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn weights_are_a_partition_of_unity() {
        for i in 0..10 {
            let w = weights_for(i as f64 / 10.0);
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn integer_positions_sample_exactly() {
        let mut p = Pyramid::new(8, 8, 1, BORDER).unwrap();
        let lvl = p.level_mut(0);
        for y in 0..8 {
            for x in 0..8 {
                lvl.set(x, y, ((x * 31 + y * 17) as i16) << 3);
            }
        }
        lvl.border_spread(BORDER, BORDER, BORDER, BORDER);
        for y in 1..7 {
            for x in 1..7 {
                assert_eq!(
                    cubic_sample(p.level(0), x as f64, y as f64),
                    p.level(0).at(x, y) as f64
                );
            }
        }
    }

    #[test]
    fn ramp_interpolates_monotonically() {
        let mut p = Pyramid::new(8, 8, 1, BORDER).unwrap();
        let lvl = p.level_mut(0);
        for y in 0..8 {
            for x in 0..8 {
                lvl.set(x, y, (x as i16) * 80);
            }
        }
        lvl.border_spread(BORDER, BORDER, BORDER, BORDER);
        let a = cubic_sample(p.level(0), 3.0, 4.0);
        let b = cubic_sample(p.level(0), 3.5, 4.0);
        let c = cubic_sample(p.level(0), 4.0, 4.0);
        assert!(a < b && b < c);
        // a pure ramp is reproduced exactly by a cubic
        assert_relative_eq!(b, 280.0, epsilon = 1e-9);
    }
}
