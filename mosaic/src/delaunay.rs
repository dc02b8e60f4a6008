//! Guibas-Stolfi divide-and-conquer Delaunay triangulation over a quad-edge
//! arena, with axis-switching recursion for point sets that are much longer
//! in one direction than the other (the common shape of a panorama sweep).
//!
//! The triangulation of the projected frame centers tells the blender which
//! frames are Voronoi neighbors, bounding each frame's zone of contribution
//! without comparing every frame pair.

use std::ops::Range;

/// Directed neighbor edges of a triangulation, grouped by source site.
#[derive(Debug, Clone)]
pub struct Triangulation {
    edges: Vec<(usize, usize)>,
    ranges: Vec<Range<usize>>,
}

impl Triangulation {
    /// Sites whose Voronoi cells border `site`'s cell.
    pub fn neighbors(&self, site: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges[self.ranges[site].clone()].iter().map(|&(_, n)| n)
    }

    pub fn neighbor_count(&self, site: usize) -> usize {
        self.ranges[site].len()
    }

    /// All directed edges, sorted by source site.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }
}

/// Triangulates `centers` and drops any neighbor pair separated by more than
/// one frame extent in either axis; such frames cannot overlap and their
/// seam would be meaningless.
pub fn triangulate(centers: &[(f64, f64)], width: usize, height: usize) -> Triangulation {
    let n = centers.len();
    if n < 2 {
        return Triangulation {
            edges: Vec::new(),
            ranges: vec![0..0; n],
        };
    }

    let mut b = Builder::new(centers);
    b.sort_segment(0, n - 1, Axis::X);
    let rows = (0.5 + (n as f64 / (n as f64).ln()).sqrt()) as i32;
    b.build(0, n - 1, rows);
    b.into_triangulation(width, height)
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

// A quad-edge is four consecutive slots: e, rot(e), sym(e), rot⁻¹(e).
// Only the onext ring is stored; every other traversal operator is derived
// from it and the slot index arithmetic below.

#[inline]
fn rot(e: i32) -> i32 {
    (e & !3) | ((e + 1) & 3)
}

#[inline]
fn rot_inv(e: i32) -> i32 {
    (e & !3) | ((e + 3) & 3)
}

#[inline]
fn sym(e: i32) -> i32 {
    (e & !3) | ((e + 2) & 3)
}

struct Builder<'a> {
    sites: &'a [(f64, f64)],
    /// Site ids, permuted by the recursive coordinate sorts.
    sp: Vec<usize>,
    /// onext pointer per quad-edge slot.
    next: Vec<i32>,
    /// Origin site per half-edge (two per quad).
    org: Vec<i32>,
    avail: Vec<i32>,
    freed: Vec<bool>,
}

impl<'a> Builder<'a> {
    fn new(sites: &'a [(f64, f64)]) -> Self {
        let n = sites.len();
        Self {
            sites,
            sp: (0..n).collect(),
            next: Vec::with_capacity(12 * n),
            org: Vec::with_capacity(6 * n),
            avail: Vec::new(),
            freed: Vec::with_capacity(3 * n),
        }
    }

    #[inline]
    fn onext(&self, e: i32) -> i32 {
        self.next[e as usize]
    }

    #[inline]
    fn set_onext(&mut self, e: i32, v: i32) {
        self.next[e as usize] = v;
    }

    #[inline]
    fn oprev(&self, e: i32) -> i32 {
        rot(self.onext(rot(e)))
    }

    #[inline]
    fn lnext(&self, e: i32) -> i32 {
        rot(self.onext(rot_inv(e)))
    }

    #[inline]
    fn lprev(&self, e: i32) -> i32 {
        sym(self.onext(e))
    }

    #[inline]
    fn rprev(&self, e: i32) -> i32 {
        self.onext(sym(e))
    }

    #[inline]
    fn orig(&self, e: i32) -> i32 {
        self.org[(e >> 1) as usize]
    }

    #[inline]
    fn set_orig(&mut self, e: i32, s: i32) {
        self.org[(e >> 1) as usize] = s;
    }

    #[inline]
    fn dest(&self, e: i32) -> i32 {
        self.orig(sym(e))
    }

    fn alloc_edge(&mut self) -> i32 {
        if let Some(q) = self.avail.pop() {
            self.freed[(q >> 2) as usize] = false;
            q
        } else {
            let e = self.next.len() as i32;
            self.next.extend_from_slice(&[0; 4]);
            self.org.extend_from_slice(&[0; 2]);
            self.freed.push(false);
            e
        }
    }

    fn free_edge(&mut self, e: i32) {
        let q = e & !3;
        self.freed[(q >> 2) as usize] = true;
        self.avail.push(q);
    }

    fn make_edge(&mut self, origin: usize, destination: usize) -> i32 {
        let e = self.alloc_edge();
        self.set_onext(e, e);
        self.set_onext(e + 1, e + 3);
        self.set_onext(e + 2, e + 2);
        self.set_onext(e + 3, e + 1);
        self.set_orig(e, origin as i32);
        self.set_orig(e + 2, destination as i32);
        e
    }

    fn splice(&mut self, a: i32, b: i32) {
        let alpha = rot(self.onext(a));
        let beta = rot(self.onext(b));

        let t = self.onext(alpha);
        self.set_onext(alpha, self.onext(beta));
        self.set_onext(beta, t);

        let t = self.onext(a);
        self.set_onext(a, self.onext(b));
        self.set_onext(b, t);
    }

    fn connect_left(&mut self, a: i32, b: i32) -> i32 {
        let e = self.make_edge(self.dest(a) as usize, self.orig(b) as usize);
        self.splice(e, self.lnext(a));
        self.splice(sym(e), b);
        e
    }

    fn connect_right(&mut self, a: i32, b: i32) -> i32 {
        let e = self.make_edge(self.dest(a) as usize, self.orig(b) as usize);
        self.splice(e, sym(a));
        self.splice(sym(e), self.oprev(b));
        e
    }

    fn delete_edge(&mut self, e: i32) {
        let p = self.oprev(e);
        self.splice(e, p);
        let p = self.oprev(sym(e));
        self.splice(sym(e), p);
        self.free_edge(e);
    }

    /// Strictly counterclockwise test on three sites.
    fn ccw(&self, a: i32, b: i32, c: i32) -> bool {
        let (ax, ay) = self.sites[a as usize];
        let (bx, by) = self.sites[b as usize];
        let (cx, cy) = self.sites[c as usize];
        (ax - cx) * (by - cy) - (bx - cx) * (ay - cy) > 0.0
    }

    /// Strictly-inside incircle test; cocircular points report false, which
    /// keeps the merge loop from flickering between equivalent diagonals.
    fn incircle(&self, a: i32, b: i32, c: i32, d: i32) -> bool {
        let (dx, dy) = self.sites[d as usize];
        let (adx, ady) = (self.sites[a as usize].0 - dx, self.sites[a as usize].1 - dy);
        let (bdx, bdy) = (self.sites[b as usize].0 - dx, self.sites[b as usize].1 - dy);
        let (cdx, cdy) = (self.sites[c as usize].0 - dx, self.sites[c as usize].1 - dy);
        let nad = adx * adx + ady * ady;
        let nbd = bdx * bdx + bdy * bdy;
        let ncd = cdx * cdx + cdy * cdy;
        nad * (bdx * cdy - bdy * cdx) + nbd * (cdx * ady - cdy * adx)
            + ncd * (adx * bdy - ady * bdx)
            > 0.0
    }

    /// `l` is above the merge base line.
    fn valid(&self, basel: i32, l: i32) -> bool {
        self.ccw(self.orig(basel), self.dest(l), self.dest(basel))
    }

    fn sort_segment(&mut self, low: usize, high: usize, axis: Axis) {
        let sites = self.sites;
        self.sp[low..=high].sort_unstable_by(|&a, &b| {
            let (pa, pb) = (sites[a], sites[b]);
            let key = |p: (f64, f64)| match axis {
                Axis::X => (p.0, p.1),
                Axis::Y => (p.1, p.0),
            };
            key(pa).partial_cmp(&key(pb)).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Recursive triangulation of `sp[low..=high]`; returns the ccw convex
    /// hull edges out of the leftmost and rightmost sites. `rows` counts the
    /// remaining divisions before the split axis flips from x to y.
    fn build(&mut self, low: usize, high: usize, mut rows: i32) -> (i32, i32) {
        if low + 2 < high {
            // four or more sites: divide and merge
            let minx = self.sp[low] as i32;
            let maxx = self.sp[high] as i32;
            if rows == 1 {
                self.sort_segment(low, high, Axis::Y);
                rows = 65536;
            }
            let lowrows = rows / 2;
            let left = (0.5 + (high - low + 1) as f64 * (lowrows as f64 / rows as f64)) as usize;
            let split = low + left.max(1) - 1;
            let (mut ldo, ldi) = self.build(low, split, lowrows);
            let (rdi, mut rdo) = self.build(split + 1, high, rows - lowrows);
            self.do_merge(&mut ldo, ldi, rdi, &mut rdo);
            while self.orig(ldo) != minx {
                ldo = self.rprev(ldo);
            }
            while self.orig(rdo) != maxx {
                rdo = self.lprev(rdo);
            }
            (ldo, rdo)
        } else if low + 1 >= high {
            // two sites: one edge
            let a = self.make_edge(self.sp[low], self.sp[high]);
            (a, sym(a))
        } else {
            // three sites: a triangle in either orientation, or a chain
            let (s1, s2, s3) = (self.sp[low], self.sp[low + 1], self.sp[high]);
            let a = self.make_edge(s1, s2);
            let b = self.make_edge(s2, s3);
            self.splice(sym(a), b);
            if self.ccw(s1 as i32, s3 as i32, s2 as i32) {
                let c = self.connect_left(b, a);
                (sym(c), c)
            } else {
                if self.ccw(s1 as i32, s2 as i32, s3 as i32) {
                    self.connect_left(b, a);
                }
                (a, sym(b))
            }
        }
    }

    fn do_merge(&mut self, ldo: &mut i32, mut ldi: i32, mut rdi: i32, rdo: &mut i32) {
        // Find the lower common tangent of the two hulls.
        loop {
            while self.ccw(self.orig(ldi), self.dest(ldi), self.orig(rdi)) {
                ldi = self.lnext(ldi);
            }
            if self.ccw(self.dest(rdi), self.orig(rdi), self.orig(ldi)) {
                rdi = self.rprev(rdi);
            } else {
                break;
            }
        }

        let mut basel = self.connect_left(sym(rdi), ldi);
        let mut lcand = self.rprev(basel);
        let mut rcand = self.oprev(basel);
        if self.orig(basel) == self.orig(*rdo) {
            *rdo = basel;
        }
        if self.dest(basel) == self.orig(*ldo) {
            *ldo = sym(basel);
        }

        // Zip upward, at each step connecting whichever candidate edge wins
        // the incircle test and deleting candidates it invalidates.
        loop {
            let mut t = self.onext(lcand);
            if self.valid(basel, t) {
                while self.incircle(
                    self.dest(lcand),
                    self.dest(t),
                    self.orig(lcand),
                    self.orig(basel),
                ) {
                    self.delete_edge(lcand);
                    lcand = t;
                    t = self.onext(lcand);
                }
            }

            let mut t = self.oprev(rcand);
            if self.valid(basel, t) {
                while self.incircle(
                    self.dest(t),
                    self.dest(rcand),
                    self.orig(rcand),
                    self.dest(basel),
                ) {
                    self.delete_edge(rcand);
                    rcand = t;
                    t = self.oprev(rcand);
                }
            }

            let lvalid = self.valid(basel, lcand);
            let rvalid = self.valid(basel, rcand);
            if !lvalid && !rvalid {
                return;
            }

            if !lvalid
                || (rvalid
                    && self.incircle(
                        self.dest(lcand),
                        self.orig(lcand),
                        self.orig(rcand),
                        self.dest(rcand),
                    ))
            {
                basel = self.connect_left(rcand, sym(basel));
                rcand = self.lnext(sym(basel));
            } else {
                basel = sym(self.connect_right(lcand, basel));
                lcand = self.rprev(basel);
            }
        }
    }

    fn into_triangulation(self, width: usize, height: usize) -> Triangulation {
        let n = self.sites.len();
        let mut edges = Vec::with_capacity(2 * self.freed.len());
        for (q, &freed) in self.freed.iter().enumerate() {
            if freed {
                continue;
            }
            let e = (q as i32) << 2;
            let s = self.orig(e) as usize;
            let d = self.dest(e) as usize;

            // Reject neighbor pairs whose centers are more than one frame
            // apart; those frames share no pixels.
            let dx = (self.sites[s].0 - self.sites[d].0).abs() as i64;
            let dy = (self.sites[s].1 - self.sites[d].1).abs() as i64;
            if dx <= width as i64 && dy <= height as i64 {
                edges.push((s, d));
                edges.push((d, s));
            }
        }
        edges.sort_unstable();

        let mut ranges = vec![0..0; n];
        let mut i = 0;
        for (s, range) in ranges.iter_mut().enumerate() {
            let start = i;
            while i < edges.len() && edges[i].0 == s {
                i += 1;
            }
            *range = start..i;
        }
        Triangulation { edges, ranges }
    }
}
