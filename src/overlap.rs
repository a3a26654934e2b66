//! Overlap of pathway bundles with a response tract, measured on single coronal planes.

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::warn;

use std::fs::File;
use std::path::Path;

use crate::error::{AlicError, Result};
use crate::selection::{select, EndpointRule};
use crate::streamline::StreamlineSet;
use crate::volume::{AnatomicalMask, Volume};


/// File name of a subject's overlap table for one displayed slice.
pub fn overlap_table_name(slice_mm: f64) -> String {
    format!("{}_OCD_response_tract_streams.csv", slice_mm)
}


/// The voxels of one plane through `tract`, at physical coordinate `coordinate_mm` along voxel `axis`,
/// where the tract image is at least `threshold`.
///
/// A plane outside of the image gives an empty mask.
pub fn planar_roi(tract: &Volume, coordinate_mm: f64, axis: usize, threshold: f64) -> Result<AnatomicalMask> {
    let grid = tract.grid;
    let center = [
        (grid.shape[0] as f64 - 1.0) / 2.0,
        (grid.shape[1] as f64 - 1.0) / 2.0,
        (grid.shape[2] as f64 - 1.0) / 2.0,
    ];
    let mut p = grid.to_physical(center);
    p[axis] = coordinate_mm;
    let plane = (grid.locator()?.continuous(p)[axis] + 0.5).floor();

    let mut roi = AnatomicalMask::empty(&grid);
    if plane < 0.0 || plane >= grid.shape[axis] as f64 {
        warn!(coordinate_mm, axis, "plane lies outside of the response tract image");
        return Ok(roi);
    }
    let plane = plane as usize;
    roi.data.index_axis_mut(Axis(axis), plane)
        .zip_mut_with(&tract.data.index_axis(Axis(axis), plane), |r, v| *r = *v >= threshold);
    Ok(roi)
}


/// One row of an overlap table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapCount {
    pub target: String,
    pub number_of_streamlines: usize,
    /// Undefined for empty bundles.
    pub percent_streamlines: Option<f64>,
}


/// Count the streamlines of `bundle` touching `roi` anywhere along their length.
pub fn count_overlap(target: &str, bundle: &StreamlineSet, roi: &AnatomicalMask) -> Result<OverlapCount> {
    let hits = select(bundle, std::slice::from_ref(roi), EndpointRule::AnyPoint)?;
    let number = hits.iter().filter(|h| **h).count();
    let percent = match bundle.len() {
        0 => None,
        n => Some(number as f64 / n as f64 * 100.0),
    };
    Ok(OverlapCount { target: target.to_string(), number_of_streamlines: number, percent_streamlines: percent })
}


pub fn write_overlap_table<P: AsRef<Path>>(path: P, rows: &[OverlapCount]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}


pub fn read_overlap_table<P: AsRef<Path>>(path: P) -> Result<Vec<OverlapCount>> {
    if !path.as_ref().is_file() {
        return Err(AlicError::MissingInput(path.as_ref().to_path_buf()));
    }
    let mut rdr = csv::Reader::from_reader(File::open(path)?);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}
