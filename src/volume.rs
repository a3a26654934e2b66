//! Scalar volumes and boolean masks on voxel grids.
//!
//! Both types carry a [`VoxelGrid`], so that data from images with different
//! resolutions or fields of view can be combined after nearest-neighbour resampling.

use ndarray::{Array3, Axis};

use std::path::Path;

use crate::affine::{Affine, Point3};
use crate::error::{AlicError, Result};
use crate::nifti::{NiftiDataType, NiftiImage};
use crate::traits::VoxelSpace;

/// Tolerance used when deciding whether two affines describe the same grid.
const GRID_EPSILON: f64 = 1e-4;


/// The geometry of a 3D image: voxel-to-physical affine and number of voxels per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub affine: Affine,
    pub shape: [usize; 3],
}


impl VoxelGrid {

    pub fn new(affine: Affine, shape: [usize; 3]) -> VoxelGrid {
        VoxelGrid { affine, shape }
    }

    /// Fail with [`AlicError::ShapeMismatch`] unless the grid has the `expected` shape.
    pub fn ensure_shape(&self, expected: [usize; 3]) -> Result<()> {
        if self.shape != expected {
            return Err(AlicError::ShapeMismatch(expected, self.shape));
        }
        Ok(())
    }

    /// Whether both grids have the same shape and (within tolerance) the same affine.
    pub fn same_as(&self, other: &VoxelGrid) -> bool {
        self.shape == other.shape && self.affine.approx_eq(&other.affine, GRID_EPSILON)
    }

    /// Precompute the physical-to-voxel lookup for this grid.
    pub fn locator(&self) -> Result<VoxelLocator> {
        Ok(VoxelLocator {
            inverse: self.affine.inverse()?,
            shape: self.shape,
        })
    }

    /// Physical coordinates of a (possibly fractional) voxel index.
    pub fn to_physical(&self, ijk: Point3) -> Point3 {
        self.affine.apply(ijk)
    }
}


/// Maps physical coordinates to the nearest voxel of a grid.
#[derive(Debug, Clone, Copy)]
pub struct VoxelLocator {
    inverse: Affine,
    shape: [usize; 3],
}


impl VoxelLocator {

    /// Continuous voxel coordinates of a physical point.
    pub fn continuous(&self, p: Point3) -> Point3 {
        self.inverse.apply(p)
    }

    /// Index of the voxel containing the physical point, or `None` if it lies outside the grid.
    ///
    /// Voxel centers sit at integer coordinates, so a point belongs to `floor(x + 0.5)`.
    pub fn index(&self, p: Point3) -> Option<[usize; 3]> {
        nearest_index(self.inverse.apply(p), self.shape)
    }
}


/// Round continuous voxel coordinates to the nearest voxel, `None` if outside of `shape`.
pub fn nearest_index(ijk: Point3, shape: [usize; 3]) -> Option<[usize; 3]> {
    let mut idx = [0usize; 3];
    for d in 0..3 {
        let v = (ijk[d] + 0.5).floor();
        if !v.is_finite() || v < 0.0 || v >= shape[d] as f64 {
            return None;
        }
        idx[d] = v as usize;
    }
    Some(idx)
}


fn resample_nearest<T: Clone>(data: &Array3<T>, source: &VoxelGrid, target: &VoxelGrid, fill: T) -> Result<Array3<T>> {
    let target_to_source = source.affine.inverse()?.compose(&target.affine);
    let shape = (target.shape[0], target.shape[1], target.shape[2]);
    Ok(Array3::from_shape_fn(shape, |(i, j, k)| {
        let src = target_to_source.apply([i as f64, j as f64, k as f64]);
        match nearest_index(src, source.shape) {
            Some([a, b, c]) => data[[a, b, c]].clone(),
            None => fill.clone(),
        }
    }))
}


fn dims(data_shape: &[usize]) -> [usize; 3] {
    [data_shape[0], data_shape[1], data_shape[2]]
}


/// A 3D scalar image, e.g. a parcellation, a density map or a reference anatomy.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f64>,
    pub grid: VoxelGrid,
}


impl VoxelSpace for Volume {
    fn grid(&self) -> &VoxelGrid {
        &self.grid
    }
}


impl Volume {

    pub fn new(data: Array3<f64>, affine: Affine) -> Volume {
        let shape = dims(data.shape());
        Volume { data, grid: VoxelGrid::new(affine, shape) }
    }

    pub fn zeros(grid: &VoxelGrid) -> Volume {
        let shape = (grid.shape[0], grid.shape[1], grid.shape[2]);
        Volume { data: Array3::zeros(shape), grid: *grid }
    }

    /// Read the first frame of a NIfTI image.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Volume> {
        let img = NiftiImage::from_file(path)?;
        Ok(img.first_volume())
    }

    /// Write the volume as a single-frame NIfTI image.
    pub fn to_file<P: AsRef<Path>>(&self, path: P, dtype: NiftiDataType) -> Result<()> {
        NiftiImage::from_volume(self).to_file(path, dtype)
    }

    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }

    /// Nearest-neighbour resampling onto another grid. Voxels outside of this volume become 0.
    pub fn resample_nearest(&self, target: &VoxelGrid) -> Result<Volume> {
        if self.grid.same_as(target) {
            return Ok(self.clone());
        }
        let data = resample_nearest(&self.data, &self.grid, target, 0.0)?;
        Ok(Volume { data, grid: *target })
    }

    /// Zero all voxels outside of the mask. The mask is resampled onto this grid first if needed.
    pub fn restrict_to(&self, mask: &AnatomicalMask) -> Result<Volume> {
        let mask = mask.on_grid(&self.grid)?;
        let weights = mask.data.mapv(|m| if m { 1.0 } else { 0.0 });
        Ok(Volume { data: &self.data * &weights, grid: self.grid })
    }

    /// Integer labels, rounding voxel values.
    pub fn label_at(&self, idx: [usize; 3]) -> i32 {
        self.data[idx].round() as i32
    }
}


/// A boolean region of interest on a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct AnatomicalMask {
    pub data: Array3<bool>,
    pub grid: VoxelGrid,
}


impl VoxelSpace for AnatomicalMask {
    fn grid(&self) -> &VoxelGrid {
        &self.grid
    }
}


impl AnatomicalMask {

    pub fn new(data: Array3<bool>, affine: Affine) -> AnatomicalMask {
        let shape = dims(data.shape());
        AnatomicalMask { data, grid: VoxelGrid::new(affine, shape) }
    }

    pub fn empty(grid: &VoxelGrid) -> AnatomicalMask {
        let shape = (grid.shape[0], grid.shape[1], grid.shape[2]);
        AnatomicalMask { data: Array3::from_elem(shape, false), grid: *grid }
    }

    /// Voxels of a parcellation carrying any of the given labels.
    pub fn from_labels(parcellation: &Volume, labels: &[i32]) -> AnatomicalMask {
        let data = parcellation.data.mapv(|v| labels.contains(&(v.round() as i32)));
        AnatomicalMask { data, grid: parcellation.grid }
    }

    /// Voxels with a value of at least `threshold`.
    pub fn from_threshold(volume: &Volume, threshold: f64) -> AnatomicalMask {
        let data = volume.data.mapv(|v| v >= threshold);
        AnatomicalMask { data, grid: volume.grid }
    }

    /// Read a mask image, any voxel above 0.5 is inside.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<AnatomicalMask> {
        Ok(AnatomicalMask::from_threshold(&Volume::from_file(path)?, 0.5))
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    pub fn has_support(&self) -> bool {
        self.data.iter().any(|v| *v)
    }

    pub fn contains(&self, idx: [usize; 3]) -> bool {
        self.data[idx]
    }

    /// Nearest-neighbour resampling onto another grid. Voxels outside of this mask are `false`.
    pub fn resample_nearest(&self, target: &VoxelGrid) -> Result<AnatomicalMask> {
        let data = resample_nearest(&self.data, &self.grid, target, false)?;
        Ok(AnatomicalMask { data, grid: *target })
    }

    /// This mask on the given grid, resampling only when the grids differ.
    pub fn on_grid(&self, target: &VoxelGrid) -> Result<AnatomicalMask> {
        if self.grid.same_as(target) {
            Ok(self.clone())
        } else {
            self.resample_nearest(target)
        }
    }

    /// Union of several masks on a common grid.
    pub fn union(masks: &[AnatomicalMask], grid: &VoxelGrid) -> Result<AnatomicalMask> {
        let mut out = AnatomicalMask::empty(grid);
        for mask in masks {
            let mask = mask.on_grid(grid)?;
            out.data.zip_mut_with(&mask.data, |a, b| *a = *a || *b);
        }
        Ok(out)
    }

    /// First and last voxel index along `axis` at which the mask has support.
    pub fn support_range(&self, axis: usize) -> Option<(usize, usize)> {
        let occupied: Vec<usize> = (0..self.grid.shape[axis])
            .filter(|&i| self.data.index_axis(Axis(axis), i).iter().any(|v| *v))
            .collect();
        match (occupied.first(), occupied.last()) {
            (Some(first), Some(last)) => Some((*first, *last)),
            _ => None,
        }
    }

    pub fn to_volume(&self) -> Volume {
        Volume {
            data: self.data.mapv(|m| if m { 1.0 } else { 0.0 }),
            grid: self.grid,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masks_are_resampled_to_coarser_grids() {
        let mut data = Array3::from_elem((4, 4, 4), false);
        data[[2, 2, 2]] = true;
        data[[3, 3, 3]] = true;
        let fine = AnatomicalMask::new(data, Affine::identity());

        let coarse_grid = VoxelGrid::new(Affine::scaled([2., 2., 2.], [0., 0., 0.]), [2, 2, 2]);
        let coarse = fine.resample_nearest(&coarse_grid).unwrap();

        // coarse voxel (1,1,1) is centred on fine voxel (2,2,2)
        assert!(coarse.contains([1, 1, 1]));
        assert_eq!(1, coarse.count());
    }

    #[test]
    fn label_masks_select_all_requested_labels() {
        let mut data = Array3::zeros((3, 3, 3));
        data[[0, 0, 0]] = 1002.0;
        data[[1, 1, 1]] = 1012.0;
        data[[2, 2, 2]] = 2002.0;
        let parc = Volume::new(data, Affine::identity());

        let mask = AnatomicalMask::from_labels(&parc, &[1002, 1012]);
        assert_eq!(2, mask.count());
        assert!(!mask.contains([2, 2, 2]));
    }

    #[test]
    fn support_range_spans_occupied_slices() {
        let mut data = Array3::from_elem((3, 5, 3), false);
        data[[1, 1, 0]] = true;
        data[[2, 3, 2]] = true;
        let mask = AnatomicalMask::new(data, Affine::identity());
        assert_eq!(Some((1, 3)), mask.support_range(1));
        assert_eq!(None, AnatomicalMask::empty(&mask.grid).support_range(0));
    }

    #[test]
    fn points_outside_the_grid_have_no_voxel() {
        let grid = VoxelGrid::new(Affine::scaled([2., 2., 2.], [-4., -4., -4.]), [4, 4, 4]);
        let loc = grid.locator().unwrap();
        assert_eq!(Some([2, 2, 2]), loc.index([0.2, 0.9, -0.9]));
        assert_eq!(None, loc.index([-6., 0., 0.]));
        assert_eq!(None, loc.index([3.5, 0., 0.]));
    }
}
