//! Pipeline configuration, read from a TOML file.
//!
//! Every field has a default matching the study setup, so a configuration file only needs to list
//! what differs. Paths in `[layout]` and in the transform list are relative to a subject directory,
//! paths in `[study]` are relative to the configuration file.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bipartition::{Bipartition, RegionSplit};
use crate::clustering::ClusterCuller;
use crate::error::{AlicError, Result};
use crate::external::{ExternalPreprocessor, ExternalTool};
use crate::lookup::Hemisphere;
use crate::parcellation::{LabelInflation, ParcellationPreprocessor};
use crate::transform::{CoordinateTransform, Direction, FieldConvention, Space};

/// Environment variable naming the configuration file when none is given explicitly.
pub const CONFIG_ENV_VAR: &str = "ALIC_PATHWAYS_CONFIG";


/// A value per hemisphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemisphereMap<T> {
    pub left: T,
    pub right: T,
}


impl<T> HemisphereMap<T> {
    pub fn get(&self, hemisphere: Hemisphere) -> &T {
        match hemisphere {
            Hemisphere::Left => &self.left,
            Hemisphere::Right => &self.right,
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub parcellation: PathBuf,
    /// The image whose grid density maps are computed on.
    pub reference_image: PathBuf,
    /// Parcellation with split regions, written when a divider mask is configured.
    pub split_parcellation: PathBuf,
    pub tracks: HemisphereMap<Vec<PathBuf>>,
    pub alic_masks: HemisphereMap<PathBuf>,
}


impl Default for LayoutConfig {
    fn default() -> LayoutConfig {
        LayoutConfig {
            data_dir: PathBuf::from("indata"),
            output_dir: PathBuf::from("output"),
            parcellation: PathBuf::from("indata/aparc+aseg.nii.gz"),
            reference_image: PathBuf::from("indata/T1w_acpc.nii.gz"),
            split_parcellation: PathBuf::from("indata/rACC_mod_aparc_aseg.nii.gz"),
            tracks: HemisphereMap {
                left: vec![PathBuf::from("app-track_aLIC/output/combined_aLIC_left.tck")],
                right: vec![PathBuf::from("app-track_aLIC/output/combined_aLIC_right.tck")],
            },
            alic_masks: HemisphereMap {
                left: PathBuf::from("app-track_aLIC/output/ROIS/fullCutIC_ROI11_left.nii.gz"),
                right: PathBuf::from("app-track_aLIC/output/ROIS/fullCutIC_ROI11_right.nii.gz"),
            },
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// CSV lookup table with the columns `#No.` and `LabelName:`.
    pub lookup_table: PathBuf,
    /// Response tract image in standard space, for the overlap tables.
    pub response_tract: Option<PathBuf>,
    /// Mask used to split regions of the parcellation.
    pub divider_mask: Option<PathBuf>,
}


impl Default for StudyConfig {
    fn default() -> StudyConfig {
        StudyConfig {
            lookup_table: PathBuf::from("indata/FreesurferLookup.csv"),
            response_tract: None,
            divider_mask: None,
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    pub thresholds_mm: Vec<f64>,
    pub resample_points: usize,
    pub min_cluster_size: usize,
}


impl Default for CullingConfig {
    fn default() -> CullingConfig {
        let culler = ClusterCuller::default();
        CullingConfig {
            thresholds_mm: culler.thresholds,
            resample_points: culler.resample_points,
            min_cluster_size: culler.min_cluster_size,
        }
    }
}


impl CullingConfig {
    pub fn culler(&self) -> ClusterCuller {
        ClusterCuller {
            thresholds: self.thresholds_mm.clone(),
            resample_points: self.resample_points,
            min_cluster_size: self.min_cluster_size,
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentroidConfig {
    /// Voxel axis running anterior-posterior in the density maps.
    pub ap_axis: usize,
    /// Name of the restricting mask, used in output file names.
    pub mask_label: String,
}


impl Default for CentroidConfig {
    fn default() -> CentroidConfig {
        CentroidConfig { ap_axis: 1, mask_label: String::from("withinALIC") }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    /// Anterior-posterior coordinates (mm, standard space) of the displayed coronal slices.
    pub displayed_slices_mm: Vec<f64>,
    /// Half-open range `[start, stop)` of integer coordinates for the averaged trajectories.
    pub average_range_mm: [i64; 2],
    /// Sub directory of each subject directory holding the pipeline layout.
    pub subject_subdir: PathBuf,
    /// Output directory for cohort tables, relative to the study directory.
    pub output_dir: PathBuf,
}


impl Default for CohortConfig {
    fn default() -> CohortConfig {
        CohortConfig {
            displayed_slices_mm: vec![9.0, 6.0, 3.0, 1.0],
            average_range_mm: [-10, 30],
            subject_subdir: PathBuf::from("OCD_pipeline"),
            output_dir: PathBuf::from("output"),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub inflate_iterations: usize,
    pub deisland: bool,
    pub erode_labels: Vec<i32>,
    /// External tool used instead of the built-in inflation. Receives `{input}` and `{output}`.
    pub tool: Option<ExternalTool>,
}


impl Default for PreprocessConfig {
    fn default() -> PreprocessConfig {
        let inflation = LabelInflation::default();
        PreprocessConfig {
            inflate_iterations: inflation.iterations,
            deisland: inflation.deisland,
            erode_labels: inflation.erode_labels,
            tool: None,
        }
    }
}


impl PreprocessConfig {
    pub fn preprocessor(&self, scratch_dir: &Path) -> Box<dyn ParcellationPreprocessor> {
        match &self.tool {
            Some(tool) => Box::new(ExternalPreprocessor { tool: tool.clone(), scratch_dir: scratch_dir.to_path_buf() }),
            None => Box::new(LabelInflation {
                iterations: self.inflate_iterations,
                deisland: self.deisland,
                erode_labels: self.erode_labels.clone(),
            }),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Space the divider mask is defined in. Standard space masks are pulled onto the native grid.
    pub divider_space: Space,
    pub axis: usize,
    pub regions: Vec<RegionSplit>,
}


impl Default for SplitConfig {
    fn default() -> SplitConfig {
        let split = Bipartition::default();
        SplitConfig { divider_space: Space::Standard, axis: split.axis, regions: split.splits }
    }
}


impl SplitConfig {
    pub fn bipartition(&self) -> Bipartition {
        Bipartition { axis: self.axis, splits: self.regions.clone() }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Affine,
    Warp,
}


/// A transform file and the direction in which it maps points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformFile {
    pub path: PathBuf,
    pub direction: Direction,
    pub kind: TransformKind,
    #[serde(default = "default_convention")]
    pub convention: FieldConvention,
}


fn default_convention() -> FieldConvention {
    FieldConvention::Displacement
}


impl TransformFile {
    pub fn load(&self, subject_dir: &Path) -> Result<CoordinateTransform> {
        let path = subject_dir.join(&self.path);
        if !path.is_file() {
            return Err(AlicError::MissingInput(path));
        }
        match self.kind {
            TransformKind::Affine => CoordinateTransform::from_affine_file(&path, self.direction),
            TransformKind::Warp => CoordinateTransform::from_warp_file(&path, self.direction, self.convention),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTractConfig {
    /// Minimum image value inside the tract.
    pub threshold: f64,
    /// Voxel axis normal to the coronal planes.
    pub plane_axis: usize,
}


impl Default for ResponseTractConfig {
    fn default() -> ResponseTractConfig {
        ResponseTractConfig { threshold: 1.0, plane_axis: 1 }
    }
}


/// The complete, immutable configuration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub layout: LayoutConfig,
    pub study: StudyConfig,
    pub targets: HemisphereMap<Vec<i32>>,
    pub culling: CullingConfig,
    pub centroids: CentroidConfig,
    pub cohort: CohortConfig,
    pub preprocess: PreprocessConfig,
    pub split: SplitConfig,
    pub transforms: Vec<TransformFile>,
    pub response_tract: ResponseTractConfig,
    /// Run when a subject's track files are missing. Receives `{subject_dir}`.
    pub tractography: Option<ExternalTool>,
}


impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            layout: LayoutConfig::default(),
            study: StudyConfig::default(),
            targets: HemisphereMap {
                left: vec![1002, 11026, 21026, 1012, 1020, 1028, 1003, 1014, 1019, 1027, 1018],
                right: vec![2002, 12026, 22026, 2012, 2020, 2028, 2003, 2014, 2019, 2027, 2018],
            },
            culling: CullingConfig::default(),
            centroids: CentroidConfig::default(),
            cohort: CohortConfig::default(),
            preprocess: PreprocessConfig::default(),
            split: SplitConfig::default(),
            transforms: vec![
                // the warp pulling standard images into native space maps native points to standard space
                TransformFile {
                    path: PathBuf::from("indata/standard2acpc_dc.nii.gz"),
                    direction: Direction::NativeToStandard,
                    kind: TransformKind::Warp,
                    convention: FieldConvention::Displacement,
                },
                TransformFile {
                    path: PathBuf::from("indata/acpc_dc2standard.nii.gz"),
                    direction: Direction::StandardToNative,
                    kind: TransformKind::Warp,
                    convention: FieldConvention::Displacement,
                },
            ],
            response_tract: ResponseTractConfig::default(),
            tractography: None,
        }
    }
}


impl PipelineConfig {

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml(text: &str) -> Result<PipelineConfig> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file. Relative study paths are resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AlicError::MissingInput(path.to_path_buf()));
        }
        let mut config = PipelineConfig::from_toml(&fs::read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            config.study.resolve_relative_to(dir);
        }
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check value ranges that the types cannot express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AlicError::InvalidConfig(msg.to_string()));
        if self.centroids.ap_axis > 2 || self.split.axis > 2 || self.response_tract.plane_axis > 2 {
            return invalid("axes must be 0, 1 or 2");
        }
        if self.culling.thresholds_mm.iter().any(|t| !(*t > 0.0)) {
            return invalid("clustering thresholds must be positive");
        }
        if self.culling.resample_points < 2 {
            return invalid("streamlines must be resampled to at least 2 points");
        }
        if self.cohort.average_range_mm[0] >= self.cohort.average_range_mm[1] {
            return invalid("average range must have start < stop");
        }
        if self.targets.left.is_empty() && self.targets.right.is_empty() {
            return invalid("no targets configured");
        }
        Ok(())
    }

    /// The transform mapping points in direction `wanted` for one subject.
    ///
    /// A transform file tagged with `wanted` is preferred. Otherwise a file tagged with the opposite
    /// direction is loaded and inverted.
    pub fn resolve_transform(&self, subject_dir: &Path, wanted: Direction) -> Result<CoordinateTransform> {
        let exists = |t: &&TransformFile| subject_dir.join(&t.path).is_file();
        if let Some(file) = self.transforms.iter().filter(exists).find(|t| t.direction == wanted) {
            return file.load(subject_dir);
        }
        if let Some(file) = self.transforms.iter().filter(exists).find(|t| t.direction == wanted.invert()) {
            debug!(path = %file.path.display(), "inverting transform file for the wanted direction");
            return file.load(subject_dir)?.invert();
        }
        match self.transforms.first() {
            Some(file) => Err(AlicError::MissingInput(subject_dir.join(&file.path))),
            None => Err(AlicError::InvalidConfig(format!("no transform configured for {}", wanted))),
        }
    }
}


impl StudyConfig {
    fn resolve_relative_to(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        resolve(&mut self.lookup_table);
        if let Some(p) = self.response_tract.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.divider_mask.as_mut() {
            resolve(p);
        }
    }
}


/// Load the configuration from `path`, else from the file named by [`CONFIG_ENV_VAR`], else use the defaults.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = path {
        return PipelineConfig::from_file(path);
    }
    match env::var(CONFIG_ENV_VAR) {
        Ok(env_path) => PipelineConfig::from_file(env_path),
        Err(_) => {
            info!("no configuration file given, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_files_keep_the_defaults() {
        let config = PipelineConfig::from_toml("[culling]\nmin_cluster_size = 5\n\n[cohort]\ndisplayed_slices_mm = [3.0]\n").unwrap();
        assert_eq!(5, config.culling.min_cluster_size);
        assert_eq!(vec![30.0, 20.0, 10.0], config.culling.thresholds_mm);
        assert_eq!(vec![3.0], config.cohort.displayed_slices_mm);
        assert_eq!(11, config.targets.get(Hemisphere::Right).len());
        assert_eq!(1, config.centroids.ap_axis);
    }

    #[test]
    fn transform_lists_are_parsed() {
        let text = "[[transforms]]\npath = \"indata/acpc2mni.txt\"\ndirection = \"native_to_standard\"\nkind = \"affine\"\n";
        let config = PipelineConfig::from_toml(text).unwrap();
        assert_eq!(1, config.transforms.len());
        assert_eq!(Direction::NativeToStandard, config.transforms[0].direction);
        assert_eq!(FieldConvention::Displacement, config.transforms[0].convention);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(PipelineConfig::from_toml("[centroids]\nap_axis = 3\n"), Err(AlicError::InvalidConfig(_))));
        assert!(matches!(PipelineConfig::from_toml("[cohort]\naverage_range_mm = [5, 5]\n"), Err(AlicError::InvalidConfig(_))));
        assert!(matches!(PipelineConfig::from_toml("[culling\n"), Err(AlicError::Config(_))));
    }

    #[test]
    fn the_opposite_transform_is_inverted_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mni2acpc.txt"), "1 0 0 5\n0 1 0 0\n0 0 1 0\n").unwrap();
        let mut config = PipelineConfig::default();
        config.transforms = vec![TransformFile {
            path: PathBuf::from("mni2acpc.txt"),
            direction: Direction::StandardToNative,
            kind: TransformKind::Affine,
            convention: FieldConvention::Absolute,
        }];

        let forward = config.resolve_transform(dir.path(), Direction::StandardToNative).unwrap();
        assert_eq!([6.0, 0.0, 0.0], forward.apply([1.0, 0.0, 0.0]).unwrap());
        let inverse = config.resolve_transform(dir.path(), Direction::NativeToStandard).unwrap();
        assert_eq!(Direction::NativeToStandard, inverse.direction);
        assert_eq!([-4.0, 0.0, 0.0], inverse.apply([1.0, 0.0, 0.0]).unwrap());
    }
}
