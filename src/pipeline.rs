//! The per-subject pipeline and the sequential batch loop over subjects.
//!
//! Stages run strictly in order and persist their results in the subject's output directory:
//! region splitting, parcellation preprocessing, streamline orientation, subsegmentation with
//! density maps, centroid extraction in native and standard space, and overlap with the response tract.
//! A failing stage aborts the subject. The batch loop logs the failure and goes on with the next subject.

use tracing::{debug, error, info, info_span, warn};

use std::fs;
use std::path::{Path, PathBuf};

use crate::bipartition::pull_to_native;
use crate::cache::{is_fresh, stamp_path, write_atomically, write_stamp, StageKey, KEY_LENGTH};
use crate::centroid;
use crate::config::PipelineConfig;
use crate::density::density_map;
use crate::error::{AlicError, Result};
use crate::fiducials::{centroid_table_name, write_trajectory};
use crate::lookup::{Hemisphere, LabelLookup, Target};
use crate::nifti::NiftiDataType;
use crate::overlap::{count_overlap, overlap_table_name, planar_roi, write_overlap_table, OverlapCount};
use crate::streamline::StreamlineSet;
use crate::subsegment::{PathwayBundle, Subsegmenter};
use crate::transform::{transform_bundle, transform_trajectory, CoordinateTransform, Direction, Space};
use crate::util::{file_stem_all, require_files};
use crate::volume::{AnatomicalMask, Volume, VoxelGrid};

/// Bump when the output of a stage changes, so that cached artifacts are recomputed.
const ORIENT_STAGE_VERSION: u32 = 1;
const SUBSEGMENT_STAGE_VERSION: u32 = 1;


/// Summary of one processed pathway.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayReport {
    pub target: Target,
    pub track_stem: String,
    pub streamlines: usize,
    pub centroids: usize,
    /// Whether the bundle and density map were taken from a previous run.
    pub reused: bool,
}


#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubjectReport {
    pub subject: String,
    pub pathways: Vec<PathwayReport>,
}


/// Planar regions of the response tract, one per displayed slice.
struct ResponsePlanes {
    grid: VoxelGrid,
    planes: Vec<(f64, AnatomicalMask)>,
    tables: Vec<Vec<OverlapCount>>,
}


/// Runs all stages for one subject directory.
#[derive(Debug, Clone)]
pub struct SubjectPipeline<'a> {
    pub config: &'a PipelineConfig,
    pub subject: String,
    pub subject_dir: PathBuf,
}


impl<'a> SubjectPipeline<'a> {

    pub fn new<P: AsRef<Path>>(config: &'a PipelineConfig, subject: &str, subject_dir: P) -> SubjectPipeline<'a> {
        SubjectPipeline { config, subject: subject.to_string(), subject_dir: subject_dir.as_ref().to_path_buf() }
    }

    fn path(&self, relative: &Path) -> PathBuf {
        self.subject_dir.join(relative)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path(&self.config.layout.output_dir)
    }

    fn track_files(&self, hemisphere: Hemisphere) -> Vec<PathBuf> {
        self.config.layout.tracks.get(hemisphere).iter().map(|t| self.path(t)).collect()
    }

    /// Run the external tractography tool if it is configured and some track file is missing.
    fn ensure_tracks(&self) -> Result<()> {
        let missing = Hemisphere::BOTH.iter().flat_map(|h| self.track_files(*h)).any(|t| !t.is_file());
        match (&self.config.tractography, missing) {
            (Some(tool), true) => {
                info!(subject = %self.subject, "track files missing, running tractography");
                tool.run(&[("subject_dir", self.subject_dir.as_path())])
            }
            _ => Ok(()),
        }
    }

    /// Fail on the first missing input, before any processing starts.
    fn check_inputs(&self) -> Result<()> {
        let layout = &self.config.layout;
        let mut inputs = vec![self.path(&layout.parcellation), self.path(&layout.reference_image), self.config.study.lookup_table.clone()];
        for hemisphere in Hemisphere::BOTH {
            inputs.extend(self.track_files(hemisphere));
            inputs.push(self.path(layout.alic_masks.get(hemisphere)));
        }
        inputs.extend(self.config.study.response_tract.iter().cloned());
        inputs.extend(self.config.study.divider_mask.iter().cloned());
        require_files(inputs.iter())
    }

    /// Split regions with the divider mask if one is configured, else return the parcellation unchanged.
    fn split_regions(&self, parcellation: Volume, to_standard: &CoordinateTransform) -> Result<Volume> {
        let divider_path = match &self.config.study.divider_mask {
            Some(path) => path,
            None => return Ok(parcellation),
        };
        let divider = AnatomicalMask::from_file(divider_path)?;
        let divider = match self.config.split.divider_space {
            Space::Native => divider,
            Space::Standard => pull_to_native(&divider, to_standard, &parcellation.grid)?,
        };
        let split = self.config.split.bipartition().apply(&parcellation, &divider)?;
        split.to_file(self.path(&self.config.layout.split_parcellation), NiftiDataType::Int32)?;
        Ok(split)
    }

    /// Load the oriented tractogram from the cache, or orient and cache it.
    ///
    /// The cached file is only trusted if its stamp holds the current key. The stamp is
    /// written after the tractogram has been moved into place.
    fn oriented_tracks(&self, track: &Path, grid: VoxelGrid) -> Result<(StreamlineSet, String)> {
        let key = StageKey::new("orient", ORIENT_STAGE_VERSION).file(track)?.finish();
        let stem = file_stem_all(track);
        let cached = self.output_dir().join(oriented_name(&stem, &key));
        let stamp = stamp_path(&cached);
        if is_fresh(&stamp, &key) && cached.is_file() {
            info!(path = %cached.display(), "loading cached oriented tracks");
            return Ok((StreamlineSet::from_tck(&cached, grid)?, key));
        }
        let tracks = StreamlineSet::from_tck(track, grid)?;
        let oriented = tracks.oriented();
        write_atomically(&cached, |partial| oriented.to_tck(partial))?;
        write_stamp(&stamp, &key)?;
        prune_oriented(&self.output_dir(), &stem, &key)?;
        info!(path = %cached.display(), streamlines = oriented.len(), "oriented tracks");
        Ok((oriented, key))
    }

    fn load_response_planes(&self) -> Result<Option<ResponsePlanes>> {
        let path = match &self.config.study.response_tract {
            Some(path) => path,
            None => return Ok(None),
        };
        let tract = Volume::from_file(path)?;
        let settings = &self.config.response_tract;
        let mut planes = Vec::new();
        for &slice in self.config.cohort.displayed_slices_mm.iter() {
            planes.push((slice, planar_roi(&tract, slice, settings.plane_axis, settings.threshold)?));
        }
        let tables = vec![Vec::new(); planes.len()];
        Ok(Some(ResponsePlanes { grid: tract.grid, planes, tables }))
    }

    /// Subsegment one target, reusing the persisted bundle when its stamp matches.
    fn pathway(&self, segmenter: &Subsegmenter, tracks: &StreamlineSet, key: &str, target: &Target, stem: &str) -> Result<(StreamlineSet, Volume, bool)> {
        let out = self.output_dir();
        let bundle_path = out.join(format!("{}.tck", stem));
        let density_path = out.join(format!("{}.nii.gz", stem));
        let stamp = stamp_path(&bundle_path);

        if is_fresh(&stamp, key) && bundle_path.is_file() && density_path.is_file() {
            info!(region = %target.name, "reusing subsegmented pathway");
            let streamlines = StreamlineSet::from_tck(&bundle_path, tracks.grid)?;
            return Ok((streamlines, Volume::from_file(&density_path)?, true));
        }

        let PathwayBundle { streamlines, density, .. } = segmenter.segment(tracks, target)?;
        streamlines.to_tck(&bundle_path)?;
        density.to_file(&density_path, NiftiDataType::Float32)?;
        write_stamp(&stamp, key)?;
        Ok((streamlines, density, false))
    }

    /// Run every stage for this subject.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use alic_pathways::{PipelineConfig, SubjectPipeline};
    /// let config = PipelineConfig::from_file("alic.toml").unwrap();
    /// let report = SubjectPipeline::new(&config, "sub-01", "/data/sub-01/OCD_pipeline").run().unwrap();
    /// println!("{} pathways.", report.pathways.len());
    /// ```
    pub fn run(&self) -> Result<SubjectReport> {
        let span = info_span!("subject", subject = %self.subject);
        let _guard = span.enter();

        self.ensure_tracks()?;
        self.check_inputs()?;
        let layout = &self.config.layout;
        let out = self.output_dir();
        fs::create_dir_all(&out)?;

        let lookup = LabelLookup::from_file(&self.config.study.lookup_table)?;
        let to_standard = self.config.resolve_transform(&self.subject_dir, Direction::NativeToStandard)?;
        let to_standard = to_standard.oriented(Direction::NativeToStandard)?;

        let parcellation = Volume::from_file(self.path(&layout.parcellation))?;
        let parcellation = self.split_regions(parcellation, to_standard)?;
        let preprocessor = self.config.preprocess.preprocessor(&out);
        let inflated = preprocessor.process(&parcellation)?;
        let inflated_path = out.join(format!("{}_inflated.nii.gz", file_stem_all(&layout.parcellation)));
        inflated.to_file(&inflated_path, NiftiDataType::Int32)?;
        info!(preprocessor = preprocessor.name(), path = %inflated_path.display(), "preprocessed parcellation");

        let reference = Volume::from_file(self.path(&layout.reference_image))?;
        let grid = reference.grid;
        let mut planes = self.load_response_planes()?;
        let standard_grid = planes.as_ref().map(|p| p.grid).unwrap_or(grid);

        let culler = self.config.culling.culler();
        let segmenter = Subsegmenter::new(&inflated, culler.clone(), grid);
        let mut report = SubjectReport { subject: self.subject.clone(), pathways: Vec::new() };

        for hemisphere in Hemisphere::BOTH {
            let targets = Target::resolve(self.config.targets.get(hemisphere), hemisphere, &lookup)?;
            let alic = AnatomicalMask::from_file(self.path(layout.alic_masks.get(hemisphere)))?;
            if !alic.has_support() {
                warn!(hemisphere = %hemisphere, "ALIC mask is empty, all centroid trajectories will be empty");
            }

            for track in self.track_files(hemisphere) {
                let track_stem = file_stem_all(&track);
                let (tracks, orient_key) = self.oriented_tracks(&track, grid)?;
                density_map(&tracks, &grid)?.to_file(out.join(format!("{}.nii.gz", track_stem)), NiftiDataType::Float32)?;

                for target in targets.iter() {
                    let stem = target.artifact_stem(&track_stem);
                    let key = StageKey::new("subsegment", SUBSEGMENT_STAGE_VERSION)
                        .param("tracks", &orient_key)
                        .file(&inflated_path)?
                        .param("target", &target.label.to_string())
                        .param("culling", &format!("{:?}", culler))
                        .param("grid", &format!("{:?}", grid))
                        .finish();
                    let (bundle, density, reused) = self.pathway(&segmenter, &tracks, &key, target, &stem)?;

                    let native = centroid::extract(&density, &alic, self.config.centroids.ap_axis)?;
                    let standard = transform_trajectory(&native, to_standard)?;
                    let mask_label = &self.config.centroids.mask_label;
                    write_trajectory(out.join(centroid_table_name(&stem, mask_label, Space::Native)), &target.name, &native)?;
                    write_trajectory(out.join(centroid_table_name(&stem, mask_label, Space::Standard)), &target.name, &standard)?;

                    let bundle_standard = transform_bundle(&bundle, to_standard, &standard_grid)?;
                    bundle_standard.to_tck(out.join(format!("{}_mni.tck", stem)))?;
                    if let Some(planes) = planes.as_mut() {
                        for ((_, roi), table) in planes.planes.iter().zip(planes.tables.iter_mut()) {
                            table.push(count_overlap(&target.name, &bundle_standard, roi)?);
                        }
                    }

                    report.pathways.push(PathwayReport {
                        target: target.clone(),
                        track_stem: track_stem.clone(),
                        streamlines: bundle.len(),
                        centroids: native.len(),
                        reused,
                    });
                }
            }
        }

        if let Some(planes) = planes {
            for ((slice, _), table) in planes.planes.iter().zip(planes.tables.iter()) {
                write_overlap_table(out.join(overlap_table_name(*slice)), table)?;
            }
        }
        info!(pathways = report.pathways.len(), "subject done");
        Ok(report)
    }
}


/// Outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    /// Failed subjects with the error message.
    pub failed: Vec<(String, String)>,
}


impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}


/// Directory holding the pipeline layout of a subject in a study.
pub fn subject_dir(config: &PipelineConfig, study_dir: &Path, subject: &str) -> PathBuf {
    study_dir.join(subject).join(&config.cohort.subject_subdir)
}


/// Run the pipeline for each subject in turn. A failing subject is logged and skipped, not retried.
pub fn run_batch(config: &PipelineConfig, study_dir: &Path, subjects: &[String]) -> BatchReport {
    let mut report = BatchReport::default();
    for subject in subjects {
        let dir = subject_dir(config, study_dir, subject);
        match SubjectPipeline::new(config, subject, &dir).run() {
            Ok(_) => report.succeeded.push(subject.clone()),
            Err(e) => {
                error!(subject = %subject, error = %e, "subject failed");
                report.failed.push((subject.clone(), e.to_string()));
            }
        }
    }
    info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "batch done");
    report
}


fn oriented_name(stem: &str, key: &str) -> String {
    format!("{}_oriented_{}.tck", stem, key)
}


/// Remove oriented tractograms of `stem` cached under another key, with their stamps.
fn prune_oriented(dir: &Path, stem: &str, key: &str) -> Result<()> {
    let prefix = format!("{}_oriented_", stem);
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let rest = match name.strip_prefix(&prefix) {
            Some(rest) => rest,
            None => continue,
        };
        let old_key = match rest.strip_suffix(".tck").or_else(|| rest.strip_suffix(".tck.stamp")) {
            Some(k) => k,
            None => continue,
        };
        let is_key = old_key.len() == KEY_LENGTH && old_key.chars().all(|c| c.is_ascii_hexdigit());
        if is_key && old_key != key {
            debug!(file = %name, "removing stale oriented tracks");
            fs::remove_file(dir.join(&name))?;
        }
    }
    Ok(())
}


/// Read subject ids from a text file, one per line or comma separated. Empty entries and `#` comments are skipped.
pub fn read_subject_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(AlicError::MissingInput(path.to_path_buf()));
    }
    let subjects = fs::read_to_string(path)?
        .lines()
        .map(|l| l.split('#').next().unwrap_or(""))
        .flat_map(|l| l.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    Ok(subjects)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subject_lists_accept_lines_and_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.txt");
        fs::write(&path, "sub-01, sub-02\n# excluded: sub-03\nsub-04\n\n").unwrap();
        assert_eq!(vec!["sub-01", "sub-02", "sub-04"], read_subject_list(&path).unwrap());
    }

    #[test]
    fn missing_subjects_fail_without_stopping_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let report = run_batch(&config, dir.path(), &[String::from("sub-01"), String::from("sub-02")]);
        assert!(report.succeeded.is_empty());
        assert_eq!(2, report.failed.len());
        assert_eq!("sub-02", report.failed[1].0);
    }

    #[test]
    fn only_stale_oriented_tracks_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let current = "0123456789abcdef";
        let names = [
            oriented_name("sub.01_tracks", current),
            oriented_name("sub.01_tracks", "fedcba9876543210"),
            format!("{}.stamp", oriented_name("sub.01_tracks", "fedcba9876543210")),
            oriented_name("sub.01_tracks_right", "fedcba9876543210"),
            String::from("sub.01_tracks_oriented_notes.tck"),
        ];
        for name in &names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        prune_oriented(dir.path(), "sub.01_tracks", current).unwrap();
        assert!(dir.path().join(&names[0]).is_file());
        assert!(!dir.path().join(&names[1]).exists());
        assert!(!dir.path().join(&names[2]).exists());
        assert!(dir.path().join(&names[3]).is_file());
        assert!(dir.path().join(&names[4]).is_file());
    }
}
