//! Planar YVU frame buffers and fixed-coefficient color conversion.
//!
//! The pipeline's pixel format is planar, 8-bit, `[Y][V][U]` contiguous with
//! no padding. The RGB<->YVU coefficients are integer BT.601-like constants
//! (scaled by 1000 forward, by 256 inverse) and must stay bit-for-bit stable
//! for compatibility with existing capture pipelines.

use crate::{Error, Result};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

// Forward (RGB -> YVU) coefficients, scaled by 1000.
const RED_Y: i32 = 257;
const RED_V: i32 = 439;
const RED_U: i32 = 148;
const GREEN_Y: i32 = 504;
const GREEN_V: i32 = 368;
const GREEN_U: i32 = 291;
const BLUE_Y: i32 = 98;
const BLUE_V: i32 = 71;
const BLUE_U: i32 = 439;

// Inverse (YVU -> RGB) coefficients, scaled by 256.
const INV_Y: i32 = 298;
const INV_RV: i32 = 409;
const INV_GV: i32 = 208;
const INV_GU: i32 = 100;
const INV_BU: i32 = 516;

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Converts one RGB pixel to YVU with the fixed integer coefficients.
pub fn rgb_to_yvu_pixel(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (RED_Y * r + GREEN_Y * g + BLUE_Y * b) / 1000 + 16;
    let v = (RED_V * r - GREEN_V * g - BLUE_V * b) / 1000 + 128;
    let u = (-RED_U * r - GREEN_U * g + BLUE_U * b) / 1000 + 128;
    (clamp_u8(y), clamp_u8(v), clamp_u8(u))
}

/// Converts one YVU pixel back to RGB.
pub fn yvu_to_rgb_pixel(y: u8, v: u8, u: u8) -> (u8, u8, u8) {
    let y = y as i32 - 16;
    let v = v as i32 - 128;
    let u = u as i32 - 128;
    let r = (INV_Y * y + INV_RV * v) >> 8;
    let g = (INV_Y * y - INV_GV * v - INV_GU * u) >> 8;
    let b = (INV_Y * y + INV_BU * u) >> 8;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// One planar YVU frame: `[Y: w*h][V: w*h][U: w*h]`, row-major planes.
#[derive(Debug, Clone)]
pub struct YuvFrame {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl YuvFrame {
    /// Neutral (black) frame.
    pub fn new(width: usize, height: usize) -> Self {
        let plane = width * height;
        let mut data = vec![16u8; plane];
        data.resize(3 * plane, 128);
        Self {
            data,
            width,
            height,
        }
    }

    /// Wraps an existing planar buffer; the length must be `3 * w * h`.
    pub fn from_planar(data: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        if data.len() != 3 * width * height {
            return Err(Error::DimensionMismatch(format!(
                "planar YVU buffer is {} bytes, expected {}",
                data.len(),
                3 * width * height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Converts an RGB image into a planar YVU frame, one row per task.
    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let plane = width * height;
        let mut data = vec![0u8; 3 * plane];
        let (ydata, rest) = data.split_at_mut(plane);
        let (vdata, udata) = rest.split_at_mut(plane);
        let src = rgb.as_raw();

        ydata
            .par_chunks_mut(width)
            .zip(vdata.par_chunks_mut(width))
            .zip(udata.par_chunks_mut(width))
            .enumerate()
            .for_each(|(row, ((yrow, vrow), urow))| {
                let rgb_row = &src[row * width * 3..(row + 1) * width * 3];
                for x in 0..width {
                    let (y, v, u) =
                        rgb_to_yvu_pixel(rgb_row[x * 3], rgb_row[x * 3 + 1], rgb_row[x * 3 + 2]);
                    yrow[x] = y;
                    vrow[x] = v;
                    urow[x] = u;
                }
            });

        Self {
            data,
            width,
            height,
        }
    }

    /// Converts back to an RGB image.
    pub fn to_rgb(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width as u32, self.height as u32);
        let (y, v, u) = (self.y(), self.v(), self.u());
        for (i, px) in out.pixels_mut().enumerate() {
            let (r, g, b) = yvu_to_rgb_pixel(y[i], v[i], u[i]);
            *px = Rgb([r, g, b]);
        }
        out
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn plane(&self) -> usize {
        self.width * self.height
    }

    pub fn y(&self) -> &[u8] {
        &self.data[..self.plane()]
    }

    pub fn v(&self) -> &[u8] {
        let p = self.plane();
        &self.data[p..2 * p]
    }

    pub fn u(&self) -> &[u8] {
        let p = self.plane();
        &self.data[2 * p..]
    }

    pub fn as_planar(&self) -> &[u8] {
        &self.data
    }

    pub fn into_planar(self) -> Vec<u8> {
        self.data
    }
}
