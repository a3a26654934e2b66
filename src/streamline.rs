//! In-memory streamlines: 3D polylines in physical coordinates, plus the reference grid they belong to.

use std::fmt;
use std::path::Path;

use crate::affine::Point3;
use crate::error::{AlicError, Result};
use crate::tck;
use crate::traits::VoxelSpace;
use crate::volume::VoxelGrid;


/// An ordered sequence of at least 2 points in millimeters. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Streamline {
    points: Vec<Point3>,
}


impl Streamline {

    pub fn new(points: Vec<Point3>) -> Result<Streamline> {
        if points.len() < 2 {
            return Err(AlicError::DegenerateStreamline(points.len()));
        }
        Ok(Streamline { points })
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> Point3 {
        self.points[0]
    }

    pub fn end(&self) -> Point3 {
        self.points[self.points.len() - 1]
    }

    /// Both terminal points.
    pub fn endpoints(&self) -> [Point3; 2] {
        [self.start(), self.end()]
    }

    /// The same polyline traversed from end to start.
    pub fn reversed(&self) -> Streamline {
        let mut points = self.points.clone();
        points.reverse();
        Streamline { points }
    }

    /// Resample to `n` points equally spaced along the arc length, keeping both endpoints.
    pub fn resample(&self, n: usize) -> Vec<Point3> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![self.start()];
        }

        let mut cumulative = Vec::with_capacity(self.points.len());
        cumulative.push(0.0);
        for w in self.points.windows(2) {
            let last = cumulative[cumulative.len() - 1];
            cumulative.push(last + distance(w[0], w[1]));
        }
        let total = cumulative[cumulative.len() - 1];
        if total <= 0.0 {
            return vec![self.start(); n];
        }

        let mut out = Vec::with_capacity(n);
        let mut seg = 0;
        for i in 0..n {
            let target = total * i as f64 / (n - 1) as f64;
            while seg + 2 < cumulative.len() && cumulative[seg + 1] < target {
                seg += 1;
            }
            let seg_len = cumulative[seg + 1] - cumulative[seg];
            let t = if seg_len > 0.0 { ((target - cumulative[seg]) / seg_len).clamp(0.0, 1.0) } else { 0.0 };
            let (a, b) = (self.points[seg], self.points[seg + 1]);
            out.push([a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1]), a[2] + t * (b[2] - a[2])]);
        }
        out
    }
}


/// Euclidean distance between two points.
pub fn distance(a: Point3, b: Point3) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}


/// A collection of streamlines sharing a reference voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamlineSet {
    pub streamlines: Vec<Streamline>,
    pub grid: VoxelGrid,
}


impl VoxelSpace for StreamlineSet {
    fn grid(&self) -> &VoxelGrid {
        &self.grid
    }
}


impl StreamlineSet {

    pub fn new(streamlines: Vec<Streamline>, grid: VoxelGrid) -> StreamlineSet {
        StreamlineSet { streamlines, grid }
    }

    pub fn empty(grid: VoxelGrid) -> StreamlineSet {
        StreamlineSet { streamlines: Vec::new(), grid }
    }

    /// Read a tck file and attach the reference grid of the image the tracks were generated on.
    pub fn from_tck<P: AsRef<Path>>(path: P, grid: VoxelGrid) -> Result<StreamlineSet> {
        Ok(StreamlineSet { streamlines: tck::read_tck(path)?, grid })
    }

    pub fn to_tck<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tck::write_tck(path, &self.streamlines)
    }

    pub fn len(&self) -> usize {
        self.streamlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamlines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Streamline> {
        self.streamlines.iter()
    }

    /// The streamlines for which `keep` is true, in their original order.
    ///
    /// # Panics
    ///
    /// If `keep` does not have one entry per streamline.
    pub fn subset(&self, keep: &[bool]) -> StreamlineSet {
        assert_eq!(keep.len(), self.streamlines.len(), "Selection vector length must match the number of streamlines.");
        let streamlines = self.streamlines.iter()
            .zip(keep.iter())
            .filter(|(_, k)| **k)
            .map(|(s, _)| s.clone())
            .collect();
        StreamlineSet { streamlines, grid: self.grid }
    }

    /// Flip streamlines so that the whole bundle follows one start/end convention.
    ///
    /// The axis along which the endpoints are, on average, furthest apart defines the
    /// convention: after orienting, every streamline starts at its lower coordinate on that axis.
    pub fn oriented(&self) -> StreamlineSet {
        if self.streamlines.is_empty() {
            return self.clone();
        }
        let axis = self.dominant_axis();
        let streamlines = self.streamlines.iter()
            .map(|s| if s.end()[axis] < s.start()[axis] { s.reversed() } else { s.clone() })
            .collect();
        StreamlineSet { streamlines, grid: self.grid }
    }

    /// Axis with the largest mean absolute endpoint displacement.
    pub fn dominant_axis(&self) -> usize {
        let mut span = [0.0f64; 3];
        for s in self.streamlines.iter() {
            for (d, value) in span.iter_mut().enumerate() {
                *value += (s.end()[d] - s.start()[d]).abs();
            }
        }
        let mut best = 0;
        for d in 1..3 {
            if span[d] > span[best] {
                best = d;
            }
        }
        best
    }

    /// Whether every streamline already follows the bundle convention.
    pub fn is_oriented(&self) -> bool {
        let axis = self.dominant_axis();
        self.streamlines.iter().all(|s| s.end()[axis] >= s.start()[axis])
    }
}


impl fmt::Display for StreamlineSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Streamline set with {} streamlines on a {:?} grid.", self.streamlines.len(), self.grid.shape)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(from: Point3, to: Point3, n: usize) -> Streamline {
        let pts = (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                [from[0] + t * (to[0] - from[0]), from[1] + t * (to[1] - from[1]), from[2] + t * (to[2] - from[2])]
            })
            .collect();
        Streamline::new(pts).unwrap()
    }

    #[test]
    fn single_point_streamlines_are_rejected() {
        assert!(Streamline::new(vec![[0., 0., 0.]]).is_err());
    }

    #[test]
    fn resampling_keeps_endpoints_and_spacing() {
        let s = Streamline::new(vec![[0., 0., 0.], [1., 0., 0.], [10., 0., 0.]]).unwrap();
        let r = s.resample(11);
        assert_eq!(11, r.len());
        assert_eq!([0., 0., 0.], r[0]);
        assert_abs_diff_eq!(10.0, r[10][0], epsilon = 1e-12);
        for (i, p) in r.iter().enumerate() {
            assert_abs_diff_eq!(i as f64, p[0], epsilon = 1e-9);
        }
    }

    #[test]
    fn orienting_flips_against_the_dominant_axis() {
        let grid = VoxelGrid::new(crate::affine::Affine::identity(), [10, 10, 10]);
        let set = StreamlineSet::new(vec![
            line([0., 0., 0.], [0., 20., 1.], 5),
            line([1., 25., 0.], [1., 2., 0.], 5),
        ], grid);
        assert_eq!(1, set.dominant_axis());
        assert!(!set.is_oriented());

        let oriented = set.oriented();
        assert!(oriented.is_oriented());
        assert_eq!([1., 2., 0.], oriented.streamlines[1].start());
        assert_eq!(set.streamlines[0], oriented.streamlines[0]);
    }

    #[test]
    fn subsets_keep_the_original_order() {
        let grid = VoxelGrid::new(crate::affine::Affine::identity(), [10, 10, 10]);
        let set = StreamlineSet::new(vec![
            line([0., 0., 0.], [1., 0., 0.], 2),
            line([0., 1., 0.], [1., 1., 0.], 2),
            line([0., 2., 0.], [1., 2., 0.], 2),
        ], grid);
        let sub = set.subset(&[true, false, true]);
        assert_eq!(2, sub.len());
        assert_eq!([0., 2., 0.], sub.streamlines[1].start());
    }
}
