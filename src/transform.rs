//! Coordinate transforms between the subject's native (ACPC) space and the standard (MNI) space.
//!
//! Every [`CoordinateTransform`] carries the [`Direction`] in which it maps *points*. Registration
//! tools usually store the warp that pulls standard-space images into native space, which maps native
//! points to standard space, so the direction tag of a transform file has to be set from how it maps
//! points, not from its file name. Use [`CoordinateTransform::oriented`] to make a mismatch an error.

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::fmt;
use std::path::Path;

use crate::affine::{Affine, Point3};
use crate::centroid::CentroidTrajectory;
use crate::error::{AlicError, Result};
use crate::nifti::NiftiImage;
use crate::streamline::{Streamline, StreamlineSet};
use crate::volume::{VoxelGrid, VoxelLocator};

/// Residual in mm below which the numerical inverse of a deformation field is accepted.
pub const INVERSE_TOLERANCE: f64 = 1e-4;
pub const INVERSE_MAX_ITERATIONS: usize = 100;


/// A named coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Native,
    Standard,
}


impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Space::Native => write!(f, "native (ACPC)"),
            Space::Standard => write!(f, "standard (MNI)"),
        }
    }
}


/// The direction in which a transform maps points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    NativeToStandard,
    StandardToNative,
}


impl Direction {

    pub fn invert(&self) -> Direction {
        match self {
            Direction::NativeToStandard => Direction::StandardToNative,
            Direction::StandardToNative => Direction::NativeToStandard,
        }
    }

    pub fn source(&self) -> Space {
        match self {
            Direction::NativeToStandard => Space::Native,
            Direction::StandardToNative => Space::Standard,
        }
    }

    pub fn target(&self) -> Space {
        self.invert().source()
    }
}


impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} to {}", self.source(), self.target())
    }
}


/// How the vectors stored in a deformation field are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConvention {
    /// Each voxel holds the mapped position of its own center.
    Absolute,
    /// Each voxel holds the offset to add to its own center.
    Displacement,
}


/// A dense 3-component vector field on a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationField {
    pub vectors: Array4<f64>,
    pub grid: VoxelGrid,
    pub convention: FieldConvention,
}


impl DeformationField {

    /// Build a field from vectors of shape (x, y, z, 3).
    pub fn new(vectors: Array4<f64>, affine: Affine, convention: FieldConvention) -> Result<DeformationField> {
        let shape = vectors.shape();
        if shape[3] != 3 {
            return Err(AlicError::InvalidNifti(format!("deformation field needs 3 components, found {}", shape[3])));
        }
        if shape[..3].iter().any(|d| *d == 0) {
            return Err(AlicError::InvalidNifti(String::from("deformation field is empty")));
        }
        let grid = VoxelGrid::new(affine, [shape[0], shape[1], shape[2]]);
        Ok(DeformationField { vectors, grid, convention })
    }

    /// Read a deformation field from a 4D (or 5D with a singleton 4th dimension) NIfTI image.
    pub fn from_file<P: AsRef<Path>>(path: P, convention: FieldConvention) -> Result<DeformationField> {
        let img = NiftiImage::from_file(path)?;
        let affine = img.affine();
        DeformationField::new(img.data, affine, convention)
    }

    /// Trilinear interpolation of the vectors at continuous voxel coordinates, clamped to the grid.
    fn interpolate(&self, ijk: Point3) -> Point3 {
        let mut lo = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for d in 0..3 {
            let max = (self.grid.shape[d] - 1) as f64;
            let c = ijk[d].max(0.0).min(max);
            let f = c.floor();
            lo[d] = f as usize;
            frac[d] = c - f;
        }

        let mut out = [0.0f64; 3];
        for corner in 0..8usize {
            let mut weight = 1.0;
            let mut idx = [0usize; 3];
            for d in 0..3 {
                let upper = (corner >> d) & 1 == 1;
                idx[d] = if upper { (lo[d] + 1).min(self.grid.shape[d] - 1) } else { lo[d] };
                weight *= if upper { frac[d] } else { 1.0 - frac[d] };
            }
            if weight == 0.0 {
                continue;
            }
            for (c, value) in out.iter_mut().enumerate() {
                *value += weight * self.vectors[[idx[0], idx[1], idx[2], c]];
            }
        }
        out
    }

    fn map_with(&self, locator: &VoxelLocator, p: Point3) -> Point3 {
        let v = self.interpolate(locator.continuous(p));
        match self.convention {
            FieldConvention::Absolute => v,
            FieldConvention::Displacement => [p[0] + v[0], p[1] + v[1], p[2] + v[2]],
        }
    }

    /// Find the point that the field maps onto `target`, by fixed-point iteration.
    fn invert_with(&self, locator: &VoxelLocator, target: Point3) -> Result<Point3> {
        let mut x = target;
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let mapped = self.map_with(locator, x);
            let residual = [mapped[0] - target[0], mapped[1] - target[1], mapped[2] - target[2]];
            let norm = (residual[0].powi(2) + residual[1].powi(2) + residual[2].powi(2)).sqrt();
            if !norm.is_finite() {
                break;
            }
            if norm < INVERSE_TOLERANCE {
                return Ok(x);
            }
            for d in 0..3 {
                x[d] -= residual[d];
            }
        }
        Err(AlicError::InverseDidNotConverge(target))
    }
}


/// The point mapping of a transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapping {
    Affine(Affine),
    Warp(DeformationField),
    /// The numerical inverse of a deformation field.
    InverseWarp(DeformationField),
}


impl Mapping {

    pub fn inverse(&self) -> Result<Mapping> {
        Ok(match self {
            Mapping::Affine(a) => Mapping::Affine(a.inverse()?),
            Mapping::Warp(f) => Mapping::InverseWarp(f.clone()),
            Mapping::InverseWarp(f) => Mapping::Warp(f.clone()),
        })
    }

    fn apply_all(&self, points: &[Point3]) -> Result<Vec<Point3>> {
        match self {
            Mapping::Affine(a) => Ok(points.iter().map(|p| a.apply(*p)).collect()),
            Mapping::Warp(f) => {
                let locator = f.grid.locator()?;
                Ok(points.iter().map(|p| f.map_with(&locator, *p)).collect())
            }
            Mapping::InverseWarp(f) => {
                let locator = f.grid.locator()?;
                points.iter().map(|p| f.invert_with(&locator, *p)).collect()
            }
        }
    }
}


/// A point mapping between native and standard space, tagged with its direction.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateTransform {
    pub direction: Direction,
    pub mapping: Mapping,
}


impl CoordinateTransform {

    pub fn new(direction: Direction, mapping: Mapping) -> CoordinateTransform {
        CoordinateTransform { direction, mapping }
    }

    /// Read a linear transform from a text file with 3 or 4 rows of 4 numbers.
    pub fn from_affine_file<P: AsRef<Path>>(path: P, direction: Direction) -> Result<CoordinateTransform> {
        Ok(CoordinateTransform::new(direction, Mapping::Affine(Affine::from_text_file(path)?)))
    }

    /// Read a non-linear transform from a deformation field image.
    pub fn from_warp_file<P: AsRef<Path>>(path: P, direction: Direction, convention: FieldConvention) -> Result<CoordinateTransform> {
        Ok(CoordinateTransform::new(direction, Mapping::Warp(DeformationField::from_file(path, convention)?)))
    }

    /// The transform mapping points the other way.
    pub fn invert(&self) -> Result<CoordinateTransform> {
        Ok(CoordinateTransform::new(self.direction.invert(), self.mapping.inverse()?))
    }

    /// This transform, if it maps points in the `wanted` direction.
    pub fn oriented(&self, wanted: Direction) -> Result<&CoordinateTransform> {
        if self.direction != wanted {
            return Err(AlicError::TransformDirection(wanted.to_string(), self.direction.to_string()));
        }
        Ok(self)
    }

    pub fn apply(&self, p: Point3) -> Result<Point3> {
        let mut out = self.mapping.apply_all(&[p])?;
        out.pop().ok_or_else(|| AlicError::InvalidConfig(String::from("transform returned no point")))
    }
}


/// Map points through a transform. An empty input gives an empty output without touching the transform.
pub fn transform_points(points: &[Point3], transform: &CoordinateTransform) -> Result<Vec<Point3>> {
    if points.is_empty() {
        return Ok(Vec::new());
    }
    transform.mapping.apply_all(points)
}


/// Map every point of every streamline through a transform. The result lives on `target_grid`.
pub fn transform_bundle(streamlines: &StreamlineSet, transform: &CoordinateTransform, target_grid: &VoxelGrid) -> Result<StreamlineSet> {
    let mut out = Vec::with_capacity(streamlines.len());
    for s in streamlines.iter() {
        out.push(Streamline::new(transform_points(s.points(), transform)?)?);
    }
    debug!(streamlines = out.len(), direction = %transform.direction, "transformed bundle");
    Ok(StreamlineSet::new(out, *target_grid))
}


/// Map the positions of a centroid trajectory, keeping its slice indices.
pub fn transform_trajectory(trajectory: &CentroidTrajectory, transform: &CoordinateTransform) -> Result<CentroidTrajectory> {
    let positions = transform_points(&trajectory.positions(), transform)?;
    Ok(trajectory.with_positions(positions))
}
