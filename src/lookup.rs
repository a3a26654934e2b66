//! Anatomical label lookup tables and the closed set of pathway targets.

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{AlicError, Result};

/// Column holding the integer label in a FreeSurfer colour table exported as CSV.
pub const LUT_LABEL_COLUMN: &str = "#No.";
/// Column holding the label name.
pub const LUT_NAME_COLUMN: &str = "LabelName:";


/// Brain hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Left,
    Right,
}


impl Hemisphere {
    pub const BOTH: [Hemisphere; 2] = [Hemisphere::Left, Hemisphere::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hemisphere::Left => "left",
            Hemisphere::Right => "right",
        }
    }
}


impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


/// Maps integer parcellation labels to human readable names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelLookup {
    pub names: BTreeMap<i32, String>,
}


impl LabelLookup {

    /// Read a lookup table CSV with at least the columns `#No.` and `LabelName:`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<LabelLookup> {
        if !path.as_ref().is_file() {
            return Err(AlicError::MissingInput(path.as_ref().to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        LabelLookup::from_reader(file)
    }

    pub fn from_reader<R: Read>(input: R) -> Result<LabelLookup> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input);

        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name)
                .ok_or_else(|| AlicError::InvalidTable(format!("lookup table has no '{}' column", name)))
        };
        let label_col = column(LUT_LABEL_COLUMN)?;
        let name_col = column(LUT_NAME_COLUMN)?;

        let mut names = BTreeMap::new();
        for result in rdr.records() {
            let record = result?;
            let (label, name) = match (record.get(label_col), record.get(name_col)) {
                (Some(l), Some(n)) => (l, n),
                _ => continue,
            };
            if let Ok(label) = label.parse::<i32>() {
                names.insert(label, name.to_string());
            }
        }
        Ok(LabelLookup { names })
    }

    pub fn name(&self, label: i32) -> Result<&str> {
        self.names.get(&label).map(String::as_str).ok_or(AlicError::UnknownLabel(label))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}


/// An anatomical pathway target: a parcellation label in one hemisphere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub label: i32,
    pub name: String,
    pub hemisphere: Hemisphere,
}


impl Target {

    /// Resolve target labels for one hemisphere against the lookup table.
    pub fn resolve(labels: &[i32], hemisphere: Hemisphere, lookup: &LabelLookup) -> Result<Vec<Target>> {
        labels.iter()
            .map(|&label| Ok(Target { label, name: lookup.name(label)?.to_string(), hemisphere }))
            .collect()
    }

    /// File name stem for this target's artifacts derived from a tractogram, e.g. `combined_aLIC_left_1002_ctx-lh-caudalanteriorcingulate`.
    pub fn artifact_stem(&self, track_stem: &str) -> String {
        format!("{}_{:04}_{}", track_stem, self.label, self.name)
    }
}


impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.label, self.hemisphere)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    const LUT: &str = "#No.,LabelName:,R,G,B,A\n0,Unknown,0,0,0,0\n1002,ctx-lh-caudalanteriorcingulate,125,100,160,0\n11026,lh-rACC-ventral,80,20,140,0\n";

    #[test]
    fn the_lookup_table_is_read() {
        let lut = LabelLookup::from_reader(LUT.as_bytes()).unwrap();
        assert_eq!(3, lut.len());
        assert_eq!("ctx-lh-caudalanteriorcingulate", lut.name(1002).unwrap());
        assert!(matches!(lut.name(2002), Err(AlicError::UnknownLabel(2002))));
    }

    #[test]
    fn tables_without_the_label_columns_are_rejected() {
        let result = LabelLookup::from_reader("label,name\n1002,ctx-lh-caudalanteriorcingulate\n".as_bytes());
        assert!(matches!(result, Err(AlicError::InvalidTable(msg)) if msg.contains("#No.")));
    }

    #[test]
    fn targets_are_resolved_and_named() {
        let lut = LabelLookup::from_reader(LUT.as_bytes()).unwrap();
        let targets = Target::resolve(&[1002, 11026], Hemisphere::Left, &lut).unwrap();
        assert_eq!(2, targets.len());
        assert_eq!("combined_aLIC_left_1002_ctx-lh-caudalanteriorcingulate", targets[0].artifact_stem("combined_aLIC_left"));
        assert!(Target::resolve(&[9999], Hemisphere::Left, &lut).is_err());
    }
}
