//! Slice-wise centroid trajectories of density maps.
//!
//! A trajectory holds one intensity-weighted center of mass per slice along the
//! anterior-posterior voxel axis, in physical coordinates. Slices without any
//! density after masking do not produce a point.

use ndarray::Axis;
use tracing::debug;

use std::fmt;

use crate::affine::Point3;
use crate::error::{AlicError, Result};
use crate::volume::{AnatomicalMask, Volume};


/// The centroid of one slice: the slice index along the anterior-posterior voxel axis and the physical position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidPoint {
    pub slice: usize,
    pub position: Point3,
}


/// Centroids ordered by increasing slice index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CentroidTrajectory {
    pub points: Vec<CentroidPoint>,
}


impl CentroidTrajectory {

    pub fn new(points: Vec<CentroidPoint>) -> CentroidTrajectory {
        CentroidTrajectory { points }
    }

    pub fn empty() -> CentroidTrajectory {
        CentroidTrajectory { points: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CentroidPoint> {
        self.points.iter()
    }

    /// The physical positions, without slice indices.
    pub fn positions(&self) -> Vec<Point3> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// The same slices with new positions, e.g. after mapping to another coordinate space.
    ///
    /// # Panics
    ///
    /// If `positions` does not have one entry per centroid.
    pub fn with_positions(&self, positions: Vec<Point3>) -> CentroidTrajectory {
        assert_eq!(positions.len(), self.points.len(), "Need one position per centroid.");
        let points = self.points.iter()
            .zip(positions)
            .map(|(p, position)| CentroidPoint { slice: p.slice, position })
            .collect();
        CentroidTrajectory { points }
    }
}


impl fmt::Display for CentroidTrajectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => write!(f, "Centroid trajectory with {} points over slices {}..={}.", self.points.len(), first.slice, last.slice),
            _ => write!(f, "Empty centroid trajectory."),
        }
    }
}


/// Compute the centroid trajectory of a density map restricted to a region of interest.
///
/// The mask is resampled onto the density grid (nearest neighbour) and multiplied in. Then, for each
/// slice along `ap_axis`, the intensity-weighted center of mass of the 2D cross-section is computed in
/// voxel coordinates and mapped to physical space with the density map's affine. Slices with zero total
/// intensity are dropped, so a density map without support inside the mask gives an empty trajectory.
///
/// # Panics
///
/// If `ap_axis` is not 0, 1 or 2.
///
/// # Examples
///
/// ```no_run
/// use alic_pathways::{centroid, AnatomicalMask, Volume};
/// let density = Volume::from_file("density.nii.gz").unwrap();
/// let alic = AnatomicalMask::from_file("ALIC_left.nii.gz").unwrap();
/// let trajectory = centroid::extract(&density, &alic, 1).unwrap();
/// println!("{}", trajectory);
/// ```
pub fn extract(density: &Volume, roi: &AnatomicalMask, ap_axis: usize) -> Result<CentroidTrajectory> {
    if ap_axis > 2 {
        return Err(AlicError::InvalidConfig(format!("the anterior-posterior axis must be 0, 1 or 2, not {}", ap_axis)));
    }
    let restricted = density.restrict_to(roi)?;

    let mut points = Vec::new();
    for (slice, section) in restricted.data.axis_iter(Axis(ap_axis)).enumerate() {
        let mut total = 0.0;
        let mut weighted = [0.0f64; 2];
        for ((a, b), v) in section.indexed_iter() {
            if *v == 0.0 {
                continue;
            }
            total += v;
            weighted[0] += v * a as f64;
            weighted[1] += v * b as f64;
        }
        if total == 0.0 || !total.is_finite() {
            continue;
        }

        let in_plane = [weighted[0] / total, weighted[1] / total];
        let mut ijk = [0.0f64; 3];
        let mut next = 0;
        for (d, value) in ijk.iter_mut().enumerate() {
            if d == ap_axis {
                *value = slice as f64;
            } else {
                *value = in_plane[next];
                next += 1;
            }
        }
        points.push(CentroidPoint { slice, position: restricted.grid.to_physical(ijk) });
    }

    debug!(slices = points.len(), "extracted centroid trajectory");
    Ok(CentroidTrajectory { points })
}


/// Check that the coordinates along one physical axis are strictly increasing or strictly decreasing.
///
/// Returns `true` for increasing, `false` for decreasing sequences, and a [`AlicError::NonMonotonicTrajectory`]
/// naming `subject` otherwise. Sequences with fewer than 2 points count as increasing.
pub fn monotonic_direction(trajectory: &CentroidTrajectory, axis: usize, subject: &str) -> Result<bool> {
    let coords: Vec<f64> = trajectory.points.iter().map(|p| p.position[axis]).collect();
    if coords.len() < 2 {
        return Ok(true);
    }
    if coords.windows(2).all(|w| w[1] > w[0]) {
        Ok(true)
    } else if coords.windows(2).all(|w| w[1] < w[0]) {
        Ok(false)
    } else {
        Err(AlicError::NonMonotonicTrajectory(subject.to_string()))
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::affine::Affine;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    #[test]
    fn only_the_three_spatial_axes_can_be_sliced() {
        let density = Volume::new(Array3::ones((2, 2, 2)), Affine::identity());
        let everywhere = AnatomicalMask::new(Array3::from_elem((2, 2, 2), true), Affine::identity());
        assert!(matches!(extract(&density, &everywhere, 3), Err(AlicError::InvalidConfig(_))));
        assert_eq!(2, extract(&density, &everywhere, 2).unwrap().len());
    }

    #[test]
    fn centroids_are_weighted_per_slice() {
        let mut data = Array3::zeros((5, 4, 5));
        data[[1, 2, 1]] = 1.0;
        data[[3, 2, 3]] = 3.0;
        let density = Volume::new(data, Affine::identity());
        let everywhere = AnatomicalMask::new(Array3::from_elem((5, 4, 5), true), Affine::identity());

        let traj = extract(&density, &everywhere, 1).unwrap();
        assert_eq!(1, traj.len());
        assert_eq!(2, traj.points[0].slice);
        assert_abs_diff_eq!(2.5, traj.points[0].position[0], epsilon = 1e-12);
        assert_abs_diff_eq!(2.0, traj.points[0].position[1], epsilon = 1e-12);
        assert_abs_diff_eq!(2.5, traj.points[0].position[2], epsilon = 1e-12);
    }

    #[test]
    fn masking_removes_density_outside_the_roi() {
        let mut data = Array3::zeros((3, 3, 3));
        data[[0, 0, 0]] = 5.0;
        data[[2, 1, 2]] = 1.0;
        let density = Volume::new(data, Affine::identity());
        let mut roi = Array3::from_elem((3, 3, 3), false);
        roi[[2, 1, 2]] = true;
        let roi = AnatomicalMask::new(roi, Affine::identity());

        let traj = extract(&density, &roi, 1).unwrap();
        assert_eq!(vec![[2.0, 1.0, 2.0]], traj.positions());
    }

    #[test]
    fn monotonic_direction_is_detected() {
        let traj = |ys: &[f64]| CentroidTrajectory::new(ys.iter().enumerate()
            .map(|(i, y)| CentroidPoint { slice: i, position: [0.0, *y, 0.0] })
            .collect());
        assert!(monotonic_direction(&traj(&[1.0, 2.0, 3.0]), 1, "s1").unwrap());
        assert!(!monotonic_direction(&traj(&[3.0, 2.0, 1.0]), 1, "s1").unwrap());
        assert!(matches!(monotonic_direction(&traj(&[1.0, 3.0, 2.0]), 1, "s1"),
            Err(AlicError::NonMonotonicTrajectory(s)) if s == "s1"));
    }
}
