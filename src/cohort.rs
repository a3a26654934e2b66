//! Cross-subject summaries of standard-space centroid trajectories and overlap tables.
//!
//! Trajectories are compared along the anterior-posterior physical coordinate (`a`). Each subject's
//! `r` and `s` coordinates are linearly interpolated as functions of `a`, at the displayed coronal
//! slices and at every integer coordinate of the averaging range. Subjects without a trajectory do
//! not contribute to either.

use tracing::{info, warn};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::affine::Point3;
use crate::centroid::{monotonic_direction, CentroidTrajectory};
use crate::config::PipelineConfig;
use crate::error::{AlicError, Result};
use crate::fiducials::{centroid_table_name, read_trajectory, write_points};
use crate::lookup::{Hemisphere, LabelLookup, Target};
use crate::overlap::{overlap_table_name, read_overlap_table};
use crate::transform::Space;
use crate::util::file_stem_all;

/// Physical axis compared across subjects.
const AP: usize = 1;


/// Piecewise linear interpolation of `ys` over strictly increasing `xs`, clamped to the end values outside of `xs`.
///
/// Fails if `xs` is empty or `xs` and `ys` differ in length.
pub fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64> {
    if xs.is_empty() {
        return Err(AlicError::EmptySupport(String::from("interpolation sample list")));
    }
    if xs.len() != ys.len() {
        return Err(AlicError::InvalidTable(format!("{} samples but {} values to interpolate", xs.len(), ys.len())));
    }
    let last = xs.len() - 1;
    if x <= xs[0] {
        return Ok(ys[0]);
    }
    if x >= xs[last] {
        return Ok(ys[last]);
    }
    let upper = xs.iter().position(|v| *v >= x).unwrap_or(last);
    let lower = upper - 1;
    let t = (x - xs[lower]) / (xs[upper] - xs[lower]);
    Ok(ys[lower] + t * (ys[upper] - ys[lower]))
}


/// Evaluate a subject's trajectory at the given anterior-posterior coordinates.
fn evaluate(trajectory: &CentroidTrajectory, subject: &str, at: &[f64]) -> Result<Vec<Point3>> {
    let increasing = monotonic_direction(trajectory, AP, subject)?;
    let mut points = trajectory.positions();
    if !increasing {
        points.reverse();
    }
    let a: Vec<f64> = points.iter().map(|p| p[AP]).collect();
    let r: Vec<f64> = points.iter().map(|p| p[0]).collect();
    let s: Vec<f64> = points.iter().map(|p| p[2]).collect();
    at.iter()
        .map(|x| -> Result<Point3> { Ok([interpolate(*x, &a, &r)?, *x, interpolate(*x, &a, &s)?]) })
        .collect()
}


/// The subjects' points at one displayed slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePoints {
    pub slice_mm: f64,
    pub points: BTreeMap<String, Point3>,
}


/// Cohort summary of one pathway.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortSummary {
    pub displayed: Vec<SlicePoints>,
    /// Integer anterior-posterior coordinates of the averaged trajectory.
    pub average_coordinates: Vec<i64>,
    /// The mean trajectory, empty when no subject contributes.
    pub average: Vec<Point3>,
    pub contributors: Vec<String>,
}


/// Summarize the trajectories of a cohort for one pathway.
///
/// `average_range` is the half-open range `[start, stop)` of integer coordinates at which the trajectories
/// are averaged. Subjects with an empty trajectory are skipped. A trajectory whose anterior-posterior
/// coordinates are not strictly monotonic is a [`NonMonotonicTrajectory`](crate::error::AlicError::NonMonotonicTrajectory) error.
///
/// # Examples
///
/// ```no_run
/// use std::collections::BTreeMap;
/// use alic_pathways::{cohort, fiducials};
/// let mut trajectories = BTreeMap::new();
/// for subject in ["sub-01", "sub-02"] {
///     let path = format!("{}/output/left_centerofmass_withinALIC_mni.csv", subject);
///     trajectories.insert(subject.to_string(), fiducials::read_trajectory(&path).unwrap());
/// }
/// let summary = cohort::summarize(&trajectories, &[9.0, 6.0, 3.0, 1.0], (-10, 30)).unwrap();
/// println!("{} subjects contribute.", summary.contributors.len());
/// ```
pub fn summarize(trajectories: &BTreeMap<String, CentroidTrajectory>, displayed_slices: &[f64], average_range: (i64, i64)) -> Result<CohortSummary> {
    let average_coordinates: Vec<i64> = (average_range.0..average_range.1).collect();
    let dense_at: Vec<f64> = average_coordinates.iter().map(|a| *a as f64).collect();

    let mut displayed: Vec<SlicePoints> = displayed_slices.iter()
        .map(|s| SlicePoints { slice_mm: *s, points: BTreeMap::new() })
        .collect();
    let mut sum = vec![[0.0f64; 3]; dense_at.len()];
    let mut contributors = Vec::new();

    for (subject, trajectory) in trajectories.iter() {
        if trajectory.is_empty() {
            info!(subject = %subject, "no centroids, subject skipped");
            continue;
        }
        let shown = evaluate(trajectory, subject, displayed_slices)?;
        for (slice, p) in displayed.iter_mut().zip(shown) {
            slice.points.insert(subject.clone(), p);
        }
        let dense = evaluate(trajectory, subject, &dense_at)?;
        for (acc, p) in sum.iter_mut().zip(dense) {
            for d in 0..3 {
                acc[d] += p[d];
            }
        }
        contributors.push(subject.clone());
    }

    let average = match contributors.len() {
        0 => Vec::new(),
        n => sum.iter().map(|p| [p[0] / n as f64, p[1] / n as f64, p[2] / n as f64]).collect(),
    };
    Ok(CohortSummary { displayed, average_coordinates, average, contributors })
}


/// What a cohort run wrote.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CohortReport {
    pub pathways: usize,
    pub files_written: Vec<PathBuf>,
    /// Subjects lacking an expected per-subject file, with the file.
    pub missing: Vec<(String, PathBuf)>,
}


/// Reads the persisted per-subject results of a study and writes the cohort tables.
#[derive(Debug, Clone)]
pub struct CohortAggregator<'a> {
    pub config: &'a PipelineConfig,
    pub study_dir: PathBuf,
}


impl<'a> CohortAggregator<'a> {

    pub fn new<P: AsRef<Path>>(config: &'a PipelineConfig, study_dir: P) -> CohortAggregator<'a> {
        CohortAggregator { config, study_dir: study_dir.as_ref().to_path_buf() }
    }

    pub fn subject_output_dir(&self, subject: &str) -> PathBuf {
        self.study_dir.join(subject).join(&self.config.cohort.subject_subdir).join(&self.config.layout.output_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.study_dir.join(&self.config.cohort.output_dir)
    }

    /// Run the centroid and overlap summaries for the given subjects.
    pub fn run(&self, subjects: &[String]) -> Result<CohortReport> {
        let lookup = LabelLookup::from_file(&self.config.study.lookup_table)?;
        let out_dir = self.output_dir();
        fs::create_dir_all(&out_dir)?;
        let mut report = CohortReport::default();

        let range = (self.config.cohort.average_range_mm[0], self.config.cohort.average_range_mm[1]);
        let mut all_targets: Vec<Target> = Vec::new();
        for hemisphere in Hemisphere::BOTH {
            let targets = Target::resolve(self.config.targets.get(hemisphere), hemisphere, &lookup)?;
            for track in self.config.layout.tracks.get(hemisphere) {
                let track_stem = file_stem_all(track);
                for target in targets.iter() {
                    let stem = target.artifact_stem(&track_stem);
                    let trajectories = self.load_trajectories(subjects, &stem, &mut report)?;
                    let summary = summarize(&trajectories, &self.config.cohort.displayed_slices_mm, range)?;
                    self.write_summary(&out_dir, &stem, &target.name, &summary, &mut report)?;
                    report.pathways += 1;
                }
            }
            all_targets.extend(targets);
        }

        self.summarize_overlap(subjects, &all_targets, &out_dir, &mut report)?;
        info!(pathways = report.pathways, files = report.files_written.len(), missing = report.missing.len(), "cohort summary done");
        Ok(report)
    }

    fn load_trajectories(&self, subjects: &[String], stem: &str, report: &mut CohortReport) -> Result<BTreeMap<String, CentroidTrajectory>> {
        let name = centroid_table_name(stem, &self.config.centroids.mask_label, Space::Standard);
        let mut trajectories = BTreeMap::new();
        for subject in subjects {
            let path = self.subject_output_dir(subject).join(&name);
            if !path.is_file() {
                warn!(subject = %subject, path = %path.display(), "centroid table missing, subject skipped");
                report.missing.push((subject.clone(), path));
                continue;
            }
            trajectories.insert(subject.clone(), read_trajectory(&path)?);
        }
        Ok(trajectories)
    }

    fn write_summary(&self, out_dir: &Path, stem: &str, target_name: &str, summary: &CohortSummary, report: &mut CohortReport) -> Result<()> {
        for slice in summary.displayed.iter() {
            let path = out_dir.join(format!("{}_{}mm.csv", stem, slice.slice_mm));
            let labels: Vec<String> = slice.points.keys().cloned().collect();
            let points: Vec<Point3> = slice.points.values().cloned().collect();
            write_points(&path, &labels, &points)?;
            report.files_written.push(path);
        }

        let path = out_dir.join(format!("{}_average.csv", stem));
        let (labels, points): (Vec<String>, Vec<Point3>) = match summary.average.is_empty() {
            true => (Vec::new(), Vec::new()),
            false => summary.average_coordinates.iter()
                .zip(summary.average.iter())
                .map(|(a, p)| (format!("{}_{}", target_name, a), *p))
                .unzip(),
        };
        write_points(&path, &labels, &points)?;
        report.files_written.push(path);
        Ok(())
    }

    /// Subject x target tables of overlap counts and percentages, one pair per displayed slice.
    fn summarize_overlap(&self, subjects: &[String], targets: &[Target], out_dir: &Path, report: &mut CohortReport) -> Result<()> {
        for &slice in self.config.cohort.displayed_slices_mm.iter() {
            let mut number_rows: Vec<Vec<String>> = Vec::new();
            let mut percent_rows: Vec<Vec<String>> = Vec::new();

            for subject in subjects {
                let path = self.subject_output_dir(subject).join(overlap_table_name(slice));
                if !path.is_file() {
                    warn!(subject = %subject, path = %path.display(), "overlap table missing, subject skipped");
                    report.missing.push((subject.clone(), path));
                    continue;
                }
                let rows = read_overlap_table(&path)?;
                let mut numbers = vec![subject.clone()];
                let mut percents = vec![subject.clone()];
                for target in targets {
                    match rows.iter().find(|r| r.target == target.name) {
                        Some(row) => {
                            numbers.push(row.number_of_streamlines.to_string());
                            percents.push(row.percent_streamlines.map(|p| p.to_string()).unwrap_or_default());
                        }
                        None => {
                            numbers.push(String::new());
                            percents.push(String::new());
                        }
                    }
                }
                number_rows.push(numbers);
                percent_rows.push(percents);
            }

            let mut header = vec![String::from("subject")];
            header.extend(targets.iter().map(|t| t.name.clone()));
            for (kind, rows) in [("number", &number_rows), ("percent", &percent_rows)] {
                let path = out_dir.join(format!("{}_streamlines_summary_{}.csv", kind, slice));
                let mut wtr = csv::Writer::from_writer(File::create(&path)?);
                wtr.write_record(&header)?;
                for row in rows.iter() {
                    wtr.write_record(row)?;
                }
                wtr.flush()?;
                report.files_written.push(path);
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::centroid::CentroidPoint;
    use approx::assert_abs_diff_eq;

    fn trajectory(points: &[Point3]) -> CentroidTrajectory {
        CentroidTrajectory::new(points.iter().enumerate().map(|(slice, p)| CentroidPoint { slice, position: *p }).collect())
    }

    #[test]
    fn interpolation_clamps_outside_the_samples() {
        let xs = [0.0, 10.0];
        let ys = [1.0, 3.0];
        assert_eq!(1.0, interpolate(-5.0, &xs, &ys).unwrap());
        assert_eq!(2.0, interpolate(5.0, &xs, &ys).unwrap());
        assert_eq!(3.0, interpolate(50.0, &xs, &ys).unwrap());
    }

    #[test]
    fn interpolation_needs_matching_samples() {
        assert!(matches!(interpolate(1.0, &[], &[]), Err(AlicError::EmptySupport(_))));
        assert!(matches!(interpolate(1.0, &[0.0, 2.0], &[1.0]), Err(AlicError::InvalidTable(_))));
    }

    #[test]
    fn decreasing_trajectories_are_interpolated_as_is() {
        let mut map = BTreeMap::new();
        map.insert(String::from("s1"), trajectory(&[[4.0, 10.0, 0.0], [0.0, 0.0, 2.0]]));
        let summary = summarize(&map, &[5.0], (0, 1)).unwrap();
        let p = summary.displayed[0].points["s1"];
        assert_abs_diff_eq!(2.0, p[0], epsilon = 1e-12);
        assert_abs_diff_eq!(5.0, p[1], epsilon = 1e-12);
        assert_abs_diff_eq!(1.0, p[2], epsilon = 1e-12);
    }

    #[test]
    fn empty_trajectories_give_an_empty_average() {
        let mut map = BTreeMap::new();
        map.insert(String::from("s1"), CentroidTrajectory::empty());
        let summary = summarize(&map, &[3.0], (-2, 2)).unwrap();
        assert!(summary.average.is_empty());
        assert!(summary.displayed[0].points.is_empty());
        assert_eq!(vec![-2, -1, 0, 1], summary.average_coordinates);
    }
}
