//! Reading and writing centroid point tables.
//!
//! A table has exactly 9 columns in this order: `label,r,a,s,defined,selected,visible,locked,description`,
//! which is the fiducial markup CSV layout understood by common 3D viewers. `defined` and `visible` are
//! always 1, `selected` and `locked` always 0, and `description` is empty.

use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::affine::Point3;
use crate::centroid::{CentroidPoint, CentroidTrajectory};
use crate::error::{AlicError, Result};
use crate::transform::Space;

/// Column names, in file order.
pub const FIDUCIAL_COLUMNS: [&str; 9] = ["label", "r", "a", "s", "defined", "selected", "visible", "locked", "description"];


/// One row of a centroid table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialRow {
    pub label: String,
    pub r: f64,
    pub a: f64,
    pub s: f64,
    pub defined: u8,
    pub selected: u8,
    pub visible: u8,
    pub locked: u8,
    pub description: String,
}


impl FiducialRow {

    pub fn new(label: String, p: Point3) -> FiducialRow {
        FiducialRow {
            label,
            r: p[0],
            a: p[1],
            s: p[2],
            defined: 1,
            selected: 0,
            visible: 1,
            locked: 0,
            description: String::new(),
        }
    }

    pub fn position(&self) -> Point3 {
        [self.r, self.a, self.s]
    }
}


/// Label of a trajectory point: the target name and the slice index, e.g. `ctx-lh-caudalanteriorcingulate_42`.
pub fn trajectory_label(target_name: &str, slice: usize) -> String {
    format!("{}_{}", target_name, slice)
}


/// File name of a pathway's centroid table, e.g. `combined_aLIC_left_1002_ctx-lh-caudalanteriorcingulate_centerofmass_withinALIC_mni.csv`.
pub fn centroid_table_name(artifact_stem: &str, mask_label: &str, space: Space) -> String {
    match space {
        Space::Native => format!("{}_centerofmass_{}.csv", artifact_stem, mask_label),
        Space::Standard => format!("{}_centerofmass_{}_mni.csv", artifact_stem, mask_label),
    }
}


/// Write rows with a header line to any writer.
pub fn write_rows<W: Write>(output: W, rows: &[FiducialRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(output);
    wtr.write_record(FIDUCIAL_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}


/// Write a centroid trajectory, labelling each point with the target name and its slice.
///
/// # Examples
///
/// ```no_run
/// use alic_pathways::fiducials::write_trajectory;
/// # fn demo(traj: &alic_pathways::CentroidTrajectory) -> alic_pathways::Result<()> {
/// write_trajectory("lh_centerofmass_withinALIC.csv", "ctx-lh-caudalanteriorcingulate", traj)?;
/// # Ok(())
/// # }
/// ```
pub fn write_trajectory<P: AsRef<Path>>(path: P, target_name: &str, trajectory: &CentroidTrajectory) -> Result<()> {
    let rows: Vec<FiducialRow> = trajectory.iter()
        .map(|p| FiducialRow::new(trajectory_label(target_name, p.slice), p.position))
        .collect();
    write_rows(File::create(path)?, &rows)
}


/// Write points with an explicit label per point. Fails with [`AlicError::InvalidTable`] unless there is one label per point.
pub fn write_points<P: AsRef<Path>>(path: P, labels: &[String], points: &[Point3]) -> Result<()> {
    if labels.len() != points.len() {
        return Err(AlicError::InvalidTable(format!("{} labels for {} points", labels.len(), points.len())));
    }
    let rows: Vec<FiducialRow> = labels.iter()
        .zip(points.iter())
        .map(|(l, p)| FiducialRow::new(l.clone(), *p))
        .collect();
    write_rows(File::create(path)?, &rows)
}


pub fn read_rows<R: Read>(input: R) -> Result<Vec<FiducialRow>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
    let headers = rdr.headers()?.clone();
    if headers.len() != FIDUCIAL_COLUMNS.len() || headers.iter().zip(FIDUCIAL_COLUMNS.iter()).any(|(h, c)| h != *c) {
        return Err(AlicError::InvalidTable(format!("unexpected centroid table columns: {:?}", headers)));
    }
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}


/// Read a centroid table from a file.
pub fn read_fiducials<P: AsRef<Path>>(path: P) -> Result<Vec<FiducialRow>> {
    if !path.as_ref().is_file() {
        return Err(AlicError::MissingInput(path.as_ref().to_path_buf()));
    }
    read_rows(File::open(path)?)
}


/// Read a centroid table back into a trajectory.
///
/// The slice of each point is parsed from the suffix after the last `_` of its label. Rows whose label
/// has no numeric suffix get their row index instead.
pub fn read_trajectory<P: AsRef<Path>>(path: P) -> Result<CentroidTrajectory> {
    let rows = read_fiducials(path)?;
    let points = rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let slice = row.label.rsplit_once('_')
                .and_then(|(_, suffix)| suffix.parse::<usize>().ok())
                .unwrap_or(idx);
            CentroidPoint { slice, position: row.position() }
        })
        .collect();
    Ok(CentroidTrajectory::new(points))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rows_have_the_fixed_columns_and_flags() {
        let mut buf: Vec<u8> = Vec::new();
        write_rows(&mut buf, &[FiducialRow::new(String::from("lh-rACC_3"), [1.5, -2.0, 3.25])]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(Some("label,r,a,s,defined,selected,visible,locked,description"), lines.next());
        assert_eq!(Some("lh-rACC_3,1.5,-2.0,3.25,1,0,1,0,"), lines.next());
    }

    #[test]
    fn slices_are_recovered_from_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.csv");
        let traj = CentroidTrajectory::new(vec![
            CentroidPoint { slice: 4, position: [1., 2., 3.] },
            CentroidPoint { slice: 7, position: [1., 5., 3.] },
        ]);
        write_trajectory(&path, "ctx-lh-medialorbitofrontal", &traj).unwrap();
        assert_eq!(traj, read_trajectory(&path).unwrap());
    }

    #[test]
    fn tables_with_other_columns_are_rejected() {
        assert!(matches!(read_rows("x,y,z\n1,2,3\n".as_bytes()), Err(AlicError::InvalidTable(_))));
    }

    #[test]
    fn every_point_needs_a_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("average.csv");
        let labels = vec![String::from("lh-rACC_1")];
        let result = write_points(&path, &labels, &[[0.0, 1.0, 2.0], [0.0, 2.0, 2.0]]);
        assert!(matches!(result, Err(AlicError::InvalidTable(_))));
        assert!(!path.exists());
        write_points(&path, &labels, &[[0.0, 1.0, 2.0]]).unwrap();
        assert_eq!(1, read_fiducials(&path).unwrap().len());
    }
}
