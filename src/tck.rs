//! Functions for reading and writing MRtrix streamline files in binary 'tck' format.
//!
//! A tck file starts with a text header of `key: value` lines, opened by the line
//! `mrtrix tracks` and closed by `END`. The `file: . <offset>` entry points to the binary
//! part, a sequence of coordinate triplets in millimeters. A NaN triplet ends a streamline,
//! an Inf triplet ends the data.

use byteordered::{ByteOrdered, Endianness};
use tracing::warn;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::affine::Point3;
use crate::error::{AlicError, Result};
use crate::streamline::Streamline;

pub const TCK_MAGIC: &str = "mrtrix tracks";


/// Models the text header of a tck file.
#[derive(Debug, Clone, PartialEq)]
pub struct TckHeader {
    pub fields: BTreeMap<String, String>,
    pub data_offset: u64,
    pub endianness: Endianness,
    pub double_precision: bool,
}


impl TckHeader {

    /// Read a tck header from the given stream, which must be at the start of the file.
    pub fn from_reader<S>(input: &mut S) -> Result<TckHeader>
    where
        S: BufRead,
    {
        let mut line = String::new();
        input.read_line(&mut line)?;
        if line.trim_end() != TCK_MAGIC {
            return Err(AlicError::InvalidTck(format!("expected '{}' as first line", TCK_MAGIC)));
        }

        let mut fields = BTreeMap::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(AlicError::InvalidTck(String::from("header is not terminated by END")));
            }
            let entry = line.trim_end();
            if entry == "END" {
                break;
            }
            if let Some((key, value)) = entry.split_once(':') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let (endianness, double_precision) = match fields.get("datatype").map(String::as_str) {
            Some("Float32LE") => (Endianness::Little, false),
            Some("Float32BE") => (Endianness::Big, false),
            Some("Float64LE") => (Endianness::Little, true),
            Some("Float64BE") => (Endianness::Big, true),
            other => return Err(AlicError::InvalidTck(format!("unsupported datatype {:?}", other))),
        };

        let data_offset = fields.get("file")
            .and_then(|f| f.split_whitespace().nth(1))
            .and_then(|o| o.parse::<u64>().ok())
            .ok_or_else(|| AlicError::InvalidTck(String::from("missing or invalid 'file: . <offset>' entry")))?;

        Ok(TckHeader { fields, data_offset, endianness, double_precision })
    }

    /// The number of streamlines stated in the header, if any.
    pub fn count(&self) -> Option<usize> {
        self.fields.get("count").and_then(|c| c.trim().parse::<usize>().ok())
    }
}


/// Read the streamlines of a tck file. Streamlines with fewer than 2 points are skipped.
pub fn read_tck<P: AsRef<Path>>(path: P) -> Result<Vec<Streamline>> {
    let mut file = BufReader::new(File::open(path.as_ref())?);
    let hdr = TckHeader::from_reader(&mut file)?;
    file.seek(SeekFrom::Start(hdr.data_offset))?;
    let streamlines = read_tck_data(file, &hdr)?;

    if let Some(count) = hdr.count() {
        if count != streamlines.len() {
            warn!(path = %path.as_ref().display(), header_count = count, read = streamlines.len(),
                "tck header count does not match the number of streamlines read");
        }
    }
    Ok(streamlines)
}


/// Read the binary part of a tck file, starting at the first coordinate.
pub fn read_tck_data<S: Read>(input: S, hdr: &TckHeader) -> Result<Vec<Streamline>> {
    let mut input = ByteOrdered::runtime(input, hdr.endianness);
    let mut streamlines = Vec::new();
    let mut current: Vec<Point3> = Vec::new();
    let mut skipped = 0usize;

    loop {
        let mut p = [0.0f64; 3];
        for v in p.iter_mut() {
            *v = match hdr.double_precision {
                true => input.read_f64(),
                false => input.read_f32().map(|x| x as f64),
            }
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => AlicError::InvalidTck(String::from("data ends without Inf terminator")),
                _ => AlicError::Io(e),
            })?;
        }

        if p.iter().any(|v| v.is_infinite()) {
            break;
        }
        if p.iter().any(|v| v.is_nan()) {
            let points = std::mem::take(&mut current);
            if points.len() < 2 {
                skipped += 1;
            } else {
                streamlines.push(Streamline::new(points)?);
            }
            continue;
        }
        current.push(p);
    }

    if !current.is_empty() {
        // data without a trailing NaN before the terminator
        if current.len() < 2 {
            skipped += 1;
        } else {
            streamlines.push(Streamline::new(current)?);
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped streamlines with fewer than 2 points");
    }
    Ok(streamlines)
}


/// Write streamlines to a tck file with Float32LE coordinates.
pub fn write_tck<P: AsRef<Path>>(path: P, streamlines: &[Streamline]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_tck_to(&mut file, streamlines)?;
    file.flush()?;
    Ok(())
}


pub fn write_tck_to<W: Write>(output: &mut W, streamlines: &[Streamline]) -> Result<()> {
    let fixed = format!("{}\ncount: {:010}\ndatatype: Float32LE\n", TCK_MAGIC, streamlines.len());
    // The offset is part of the header itself, so grow it until the digits fit.
    let mut offset = fixed.len() + "file: . \nEND\n".len() + 1;
    loop {
        let total = fixed.len() + format!("file: . {}\nEND\n", offset).len();
        if total <= offset {
            break;
        }
        offset = total;
    }
    let mut header = format!("{}file: . {}\nEND\n", fixed, offset).into_bytes();
    header.resize(offset, 0);
    output.write_all(&header)?;

    let mut out = ByteOrdered::le(output);
    for s in streamlines {
        for p in s.points() {
            for v in p.iter() {
                out.write_f32(*v as f32)?;
            }
        }
        for _ in 0..3 {
            out.write_f32(f32::NAN)?;
        }
    }
    for _ in 0..3 {
        out.write_f32(f32::INFINITY)?;
    }
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn streamlines_survive_writing_and_reading() {
        let streamlines = vec![
            Streamline::new(vec![[0., 1., 2.], [3., 4., 5.]]).unwrap(),
            Streamline::new(vec![[-1.5, 0., 0.], [0., 0., 0.], [1.5, 0.25, 0.]]).unwrap(),
        ];
        let mut buf: Vec<u8> = Vec::new();
        write_tck_to(&mut buf, &streamlines).unwrap();

        let mut input = Cursor::new(buf);
        let hdr = TckHeader::from_reader(&mut input).unwrap();
        assert_eq!(Some(2), hdr.count());
        input.seek(SeekFrom::Start(hdr.data_offset)).unwrap();
        let back = read_tck_data(input, &hdr).unwrap();
        assert_eq!(streamlines, back);
    }

    #[test]
    fn a_missing_magic_line_is_rejected() {
        let mut input = Cursor::new(b"not tracks\nEND\n".to_vec());
        assert!(TckHeader::from_reader(&mut input).is_err());
    }
}
