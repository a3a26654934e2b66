//! Utility functions used in all other modules.

use std::path::{Path, PathBuf};
use std::io::Read;

use crate::error::{AlicError, Result};

use byteordered::byteorder::ReadBytesExt;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}


/// Extensions removed by [`file_stem_all`], longest first.
const KNOWN_EXTENSIONS: [&str; 9] = [".nii.gz", ".tck.gz", ".nii", ".tck", ".trk", ".mif", ".csv", ".txt", ".gz"];


/// Strip the data file extensions from a file name, so that `a/b/track.nii.gz` gives `track`.
///
/// Dots elsewhere in the name are kept: `sub.01_tracks.tck` gives `sub.01_tracks`.
pub fn file_stem_all<P: AsRef<Path>>(path: P) -> String {
    let name = path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in KNOWN_EXTENSIONS.iter() {
        if let Some(stem) = name.strip_suffix(ext) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => name[..idx].to_string(),
    }
}


/// Read a fixed length zero-terminated byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _  in 0..len   {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0'  {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}


/// Fail with [`AlicError::MissingInput`] for the first path that is not a file.
pub fn require_files<'a, I>(paths: I) -> Result<()>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for path in paths {
        if !path.is_file() {
            return Err(AlicError::MissingInput(path.clone()));
        }
    }
    Ok(())
}


/// Round to the nearest integer, ties going to the even neighbour.
pub fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - value.signum()
    } else {
        rounded
    }
}
