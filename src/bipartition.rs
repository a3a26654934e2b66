//! Splitting parcellation regions in two along one axis at the midpoint of a divider mask.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AlicError, Result};
use crate::transform::{CoordinateTransform, Direction};
use crate::util::round_half_even;
use crate::volume::{nearest_index, AnatomicalMask, Volume, VoxelGrid};


/// One region to split: voxels of `label` below the cut get `lower_label`, the others `upper_label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSplit {
    pub label: i32,
    pub lower_label: i32,
    pub upper_label: i32,
}


/// Splits regions of a parcellation at the midpoint of a divider mask's extent along `axis`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bipartition {
    pub axis: usize,
    pub splits: Vec<RegionSplit>,
}


impl Default for Bipartition {
    /// The rostral anterior cingulate of both hemispheres, split into ventral and dorsal parts along z.
    fn default() -> Bipartition {
        Bipartition {
            axis: 2,
            splits: vec![
                RegionSplit { label: 1026, lower_label: 11026, upper_label: 21026 },
                RegionSplit { label: 2026, lower_label: 12026, upper_label: 22026 },
            ],
        }
    }
}


impl Bipartition {

    /// Voxel index along the cut axis at which regions are split: the rounded (half to even) midpoint of the divider's extent.
    pub fn cut_index(&self, divider: &AnatomicalMask) -> Result<usize> {
        let (d0, d1) = divider.support_range(self.axis)
            .ok_or_else(|| AlicError::EmptySupport(String::from("Divider mask")))?;
        Ok(round_half_even((d0 + d1) as f64 / 2.0) as usize)
    }

    /// Relabel the split regions of `parcellation`. The divider is resampled onto the parcellation grid first.
    ///
    /// Fails with [`AlicError::DividerOutOfRange`] if the cut does not fall within a region's own extent along the axis.
    /// Regions that do not occur in the parcellation are left alone.
    pub fn apply(&self, parcellation: &Volume, divider: &AnatomicalMask) -> Result<Volume> {
        let divider = divider.on_grid(&parcellation.grid)?;
        let cut = self.cut_index(&divider)?;

        let mut out = parcellation.clone();
        for split in self.splits.iter() {
            let region = AnatomicalMask::from_labels(parcellation, &[split.label]);
            let (r0, r1) = match region.support_range(self.axis) {
                Some(range) => range,
                None => {
                    warn!(label = split.label, "region to split is not in the parcellation");
                    continue;
                }
            };
            if cut < r0 || cut > r1 {
                return Err(AlicError::DividerOutOfRange(cut, r0, r1));
            }

            let axis = self.axis;
            for ((i, j, k), inside) in region.data.indexed_iter() {
                if !*inside {
                    continue;
                }
                let position = [i, j, k][axis];
                out.data[[i, j, k]] = if position < cut { split.lower_label as f64 } else { split.upper_label as f64 };
            }
            info!(label = split.label, cut, lower = split.lower_label, upper = split.upper_label, "split region");
        }
        Ok(out)
    }
}


/// Pull a mask defined in standard space onto a native grid, nearest neighbour.
///
/// Each native voxel center is mapped to standard space with `native_to_standard` and looks up the mask there.
pub fn pull_to_native(mask: &AnatomicalMask, native_to_standard: &CoordinateTransform, grid: &VoxelGrid) -> Result<AnatomicalMask> {
    let transform = native_to_standard.oriented(Direction::NativeToStandard)?;
    let locator = mask.grid.locator()?;
    let mut data = Array3::from_elem((grid.shape[0], grid.shape[1], grid.shape[2]), false);
    for ((i, j, k), value) in data.indexed_iter_mut() {
        let p = transform.apply(grid.to_physical([i as f64, j as f64, k as f64]))?;
        if let Some(idx) = nearest_index(locator.continuous(p), mask.grid.shape) {
            *value = mask.data[idx];
        }
    }
    Ok(AnatomicalMask { data, grid: *grid })
}
