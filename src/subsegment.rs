//! Subsegmentation of a tractogram into one cleaned bundle per anatomical target.

use tracing::{info, warn};

use std::fmt;

use crate::clustering::{ClusterCuller, CullReport};
use crate::density::density_map;
use crate::error::Result;
use crate::lookup::Target;
use crate::selection::{select, EndpointRule};
use crate::streamline::StreamlineSet;
use crate::volume::{AnatomicalMask, Volume, VoxelGrid};


/// The streamlines ending in one target after outlier culling, and their density map.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayBundle {
    pub target: Target,
    pub streamlines: StreamlineSet,
    pub density: Volume,
    /// Number of streamlines selected before culling.
    pub selected: usize,
    pub cull: CullReport,
}


impl PathwayBundle {
    pub fn is_empty(&self) -> bool {
        self.streamlines.is_empty()
    }
}


impl fmt::Display for PathwayBundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pathway to {}: {} of {} selected streamlines kept.", self.target, self.streamlines.len(), self.selected)
    }
}


/// Splits an oriented tractogram by the parcellation labels its streamlines end in.
#[derive(Debug, Clone)]
pub struct Subsegmenter<'a> {
    /// Preprocessed (inflated) parcellation the target masks are taken from.
    pub parcellation: &'a Volume,
    pub culler: ClusterCuller,
    /// Grid of the density maps.
    pub density_grid: VoxelGrid,
}


impl<'a> Subsegmenter<'a> {

    pub fn new(parcellation: &'a Volume, culler: ClusterCuller, density_grid: VoxelGrid) -> Subsegmenter<'a> {
        Subsegmenter { parcellation, culler, density_grid }
    }

    /// Select the streamlines with an endpoint in the target region, cull outliers and compute the density map.
    ///
    /// A target without matching streamlines gives an empty bundle and an all-zero density map.
    pub fn segment(&self, tractogram: &StreamlineSet, target: &Target) -> Result<PathwayBundle> {
        let mask = AnatomicalMask::from_labels(self.parcellation, &[target.label]);
        if !mask.has_support() {
            warn!(region = %target.name, label = target.label, "target label not found in the parcellation");
        }

        let hits = select(tractogram, &[mask], EndpointRule::EitherEndpoint)?;
        let selected = tractogram.subset(&hits);
        let (streamlines, cull) = if selected.is_empty() {
            (selected.clone(), CullReport::default())
        } else {
            let (keep, report) = self.culler.cull(&selected)?;
            (selected.subset(&keep), report)
        };

        let density = density_map(&streamlines, &self.density_grid)?;
        let bundle = PathwayBundle { target: target.clone(), streamlines, density, selected: selected.len(), cull };
        info!(hemisphere = %target.hemisphere, region = %target.name, selected = bundle.selected, kept = bundle.streamlines.len(), "subsegmented pathway");
        Ok(bundle)
    }
}
