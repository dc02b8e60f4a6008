//! Rectangle and centroid helpers shared by the blending pipeline.

/// Axis-aligned bounding box over real-valued mosaic coordinates.
///
/// Starts inverted (empty) and grows to include points; `y_min`/`y_max`
/// follow image convention (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Bounds {
    pub fn empty() -> Self {
        Self {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    pub fn include(&mut self, x: f64, y: f64) {
        self.x_min = self.x_min.min(x);
        self.y_min = self.y_min.min(y);
        self.x_max = self.x_max.max(x);
        self.y_max = self.y_max.max(y);
    }

    pub fn include_bounds(&mut self, other: &Bounds) {
        self.x_min = self.x_min.min(other.x_min);
        self.y_min = self.y_min.min(other.y_min);
        self.x_max = self.x_max.max(other.x_max);
        self.y_max = self.y_max.max(other.y_max);
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// Integer rectangle with inclusive edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub fn width(&self) -> i32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top + 1
    }
}

/// Squared Euclidean distance between two displacement components.
pub fn hypot_sq(dx: f64, dy: f64) -> f64 {
    dx * dx + dy * dy
}

fn triangle_centroid(
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
) -> (f64, f64, f64) {
    let mass = 0.5 * ((x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0)).abs();
    ((x0 + x1 + x2) / 3.0, (y0 + y1 + y2) / 3.0, mass)
}

/// Area-weighted centroid of a quadrilateral, split into two triangles at the
/// (0, 2) diagonal. Degenerate (zero-area) quads fall back to the corner mean.
pub fn quad_centroid(corners: &[(f64, f64); 4]) -> (f64, f64) {
    let [(x0, y0), (x1, y1), (x2, y2), (x3, y3)] = *corners;
    let (cx0, cy0, m0) = triangle_centroid(x0, y0, x1, y1, x2, y2);
    let (cx1, cy1, m1) = triangle_centroid(x0, y0, x2, y2, x3, y3);
    let mass = m0 + m1;
    if mass == 0.0 {
        return ((x0 + x1 + x2 + x3) / 4.0, (y0 + y1 + y2 + y3) / 4.0);
    }
    ((cx0 * m0 + cx1 * m1) / mass, (cy0 * m0 + cy1 * m1) / mass)
}

/// True when `x` sits far enough inside `[0, len)` that a filter may read
/// `margin` samples on either side without leaving the bordered plane.
pub fn in_segment(x: isize, len: usize, margin: usize) -> bool {
    let margin = margin as isize;
    x > -margin && x < len as isize - 1 + margin
}

/// Clamps `x` into the bordered segment `[-border, len + border)`.
pub fn clip_to_segment(x: isize, len: usize, border: usize) -> isize {
    let border = border as isize;
    x.clamp(-border, len as isize + border - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_grow_to_include_points() {
        let mut b = Bounds::empty();
        b.include(2.0, -1.0);
        b.include(-3.0, 4.0);
        assert_eq!(b.x_min, -3.0);
        assert_eq!(b.x_max, 2.0);
        assert_eq!(b.y_min, -1.0);
        assert_eq!(b.y_max, 4.0);
        assert_eq!(b.width(), 5.0);
    }

    #[test]
    fn square_centroid_is_center() {
        let corners = [(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        let (cx, cy) = quad_centroid(&corners);
        assert!((cx - 5.0).abs() < 1e-12);
        assert!((cy - 5.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_quad_falls_back_to_corner_mean() {
        let corners = [(1.0, 1.0), (1.0, 1.0), (1.0, 1.0), (1.0, 1.0)];
        assert_eq!(quad_centroid(&corners), (1.0, 1.0));
    }

    #[test]
    fn segment_predicates() {
        assert!(in_segment(0, 10, 7));
        assert!(in_segment(-6, 10, 7));
        assert!(!in_segment(-7, 10, 7));
        assert!(in_segment(15, 10, 7));
        assert!(!in_segment(16, 10, 7));
        assert_eq!(clip_to_segment(-20, 10, 8), -8);
        assert_eq!(clip_to_segment(30, 10, 8), 17);
        assert_eq!(clip_to_segment(3, 10, 8), 3);
    }
}
