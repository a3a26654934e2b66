//! Streamline density maps.

use ndarray::Array3;
use ndarray_stats::QuantileExt;
use tracing::debug;

use std::collections::HashSet;

use crate::error::Result;
use crate::streamline::StreamlineSet;
use crate::volume::{Volume, VoxelGrid};


/// Count, for every voxel of `grid`, the number of streamlines passing through it.
///
/// A streamline adds at most 1 to any voxel, no matter how many of its points fall into it. Points
/// outside of the grid are ignored. An empty set gives an all-zero map.
///
/// # Examples
///
/// ```no_run
/// use alic_pathways::{density_map, StreamlineSet, Volume};
/// let t1 = Volume::from_file("T1w_acpc.nii.gz").unwrap();
/// let tracks = StreamlineSet::from_tck("combined_aLIC_left.tck", t1.grid).unwrap();
/// let density = density_map(&tracks, &t1.grid).unwrap();
/// println!("{} streamline crossings in total.", density.sum());
/// ```
pub fn density_map(streamlines: &StreamlineSet, grid: &VoxelGrid) -> Result<Volume> {
    let shape = (grid.shape[0], grid.shape[1], grid.shape[2]);
    let mut counts: Array3<f64> = Array3::zeros(shape);
    let locator = grid.locator()?;

    let mut outside = 0usize;
    let mut visited: HashSet<[usize; 3]> = HashSet::new();
    for s in streamlines.iter() {
        visited.clear();
        for p in s.points() {
            match locator.index(*p) {
                Some(idx) => {
                    if visited.insert(idx) {
                        counts[idx] += 1.0;
                    }
                }
                None => outside += 1,
            }
        }
    }

    if outside > 0 {
        debug!(points = outside, "ignored streamline points outside of the density grid");
    }
    if let Ok(peak) = counts.max() {
        debug!(streamlines = streamlines.len(), peak = *peak, "computed density map");
    }
    Ok(Volume { data: counts, grid: *grid })
}
