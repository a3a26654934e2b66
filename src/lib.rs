//! Subsegmentation of the white matter pathways through the anterior limb of the internal capsule (ALIC).
//!
//! Tractograms are split into one bundle per cortical target region, cleaned from outliers by nested
//! clustering and turned into density maps. Per-slice centroids of each density map inside the ALIC
//! form a trajectory, which is mapped to standard space and summarized across a cohort.
//!
//! The pipeline reads NIfTI-1 volumes (`.nii`, `.nii.gz`), MRtrix `.tck` tractograms and CSV lookup
//! tables, and writes fiducial CSV tables that common 3D viewers can load.
//!
//! # Examples
//!
//! ```no_run
//! use alic_pathways::{centroid, density_map, select, AnatomicalMask, EndpointRule, StreamlineSet, Volume};
//!
//! # fn demo() -> alic_pathways::Result<()> {
//! let parcellation = Volume::from_file("indata/aparc+aseg.nii.gz")?;
//! let tracks = StreamlineSet::from_tck("combined_aLIC_left.tck", parcellation.grid)?.oriented();
//! let target = AnatomicalMask::from_labels(&parcellation, &[1002]);
//! let hits = select(&tracks, &[target], EndpointRule::EitherEndpoint)?;
//! let density = density_map(&tracks.subset(&hits), &parcellation.grid)?;
//! let alic = AnatomicalMask::from_file("fullCutIC_ROI11_left.nii.gz")?;
//! let trajectory = centroid::extract(&density, &alic, 1)?;
//! println!("{}", trajectory);
//! # Ok(())
//! # }
//! ```

pub mod affine;
pub mod bipartition;
pub mod cache;
pub mod centroid;
pub mod clustering;
pub mod cohort;
pub mod config;
pub mod density;
pub mod error;
pub mod external;
pub mod fiducials;
pub mod lookup;
pub mod nifti;
pub mod overlap;
pub mod parcellation;
pub mod pipeline;
pub mod selection;
pub mod streamline;
pub mod subsegment;
pub mod tck;
pub mod traits;
pub mod transform;
pub mod util;
pub mod volume;

pub use affine::{Affine, Point3};
pub use bipartition::{Bipartition, RegionSplit};
pub use centroid::{CentroidPoint, CentroidTrajectory};
pub use clustering::{ClusterCuller, CullReport, QuickBundles};
pub use cohort::{CohortAggregator, CohortSummary};
pub use config::{load_config, PipelineConfig};
pub use density::density_map;
pub use error::{AlicError, Result};
pub use lookup::{Hemisphere, LabelLookup, Target};
pub use nifti::{read_nifti, NiftiDataType, NiftiImage};
pub use parcellation::{LabelInflation, ParcellationPreprocessor};
pub use pipeline::{read_subject_list, run_batch, BatchReport, SubjectPipeline, SubjectReport};
pub use selection::{select, EndpointRule};
pub use streamline::{Streamline, StreamlineSet};
pub use subsegment::{PathwayBundle, Subsegmenter};
pub use tck::{read_tck, write_tck};
pub use traits::VoxelSpace;
pub use transform::{CoordinateTransform, Direction, Space};
pub use volume::{AnatomicalMask, Volume, VoxelGrid};
