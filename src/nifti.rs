//! Functions for reading and writing single-file NIfTI-1 images (`.nii` and `.nii.gz`).
//!
//! Only the parts of the format needed for label volumes, masks, density maps and
//! deformation fields are supported: up to 5 dimensions, the common integer and float
//! datatypes, and the sform/qform/pixdim affine fallbacks.

use byteordered::{ByteOrdered, Endianness};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array4, Axis, ShapeBuilder};

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use crate::affine::Affine;
use crate::error::{AlicError, Result};
use crate::util::{is_gz_file, read_fixed_length_string};
use crate::volume::Volume;

pub const NIFTI1_HEADER_SIZE: i32 = 348;
pub const NIFTI1_MAGIC: &str = "n+1";
/// Data starts after the header and the 4 byte extension flag.
pub const NIFTI1_VOX_OFFSET: f32 = 352.0;

/// Upper bound on the number of voxel values reserved before any data has been read.
const MAX_PREALLOCATED_VALUES: usize = 1 << 24;


/// The voxel datatypes this crate can read. Only `Float32` and `Int32` are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiftiDataType {
    Uint8,
    Int8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}


impl NiftiDataType {

    pub fn from_code(code: i16) -> Result<NiftiDataType> {
        match code {
            2 => Ok(NiftiDataType::Uint8),
            4 => Ok(NiftiDataType::Int16),
            8 => Ok(NiftiDataType::Int32),
            16 => Ok(NiftiDataType::Float32),
            64 => Ok(NiftiDataType::Float64),
            256 => Ok(NiftiDataType::Int8),
            512 => Ok(NiftiDataType::Uint16),
            768 => Ok(NiftiDataType::Uint32),
            other => Err(AlicError::InvalidNifti(format!("unsupported datatype code {}", other))),
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            NiftiDataType::Uint8 => 2,
            NiftiDataType::Int16 => 4,
            NiftiDataType::Int32 => 8,
            NiftiDataType::Float32 => 16,
            NiftiDataType::Float64 => 64,
            NiftiDataType::Int8 => 256,
            NiftiDataType::Uint16 => 512,
            NiftiDataType::Uint32 => 768,
        }
    }

    pub fn bitpix(&self) -> i16 {
        match self {
            NiftiDataType::Uint8 | NiftiDataType::Int8 => 8,
            NiftiDataType::Int16 | NiftiDataType::Uint16 => 16,
            NiftiDataType::Int32 | NiftiDataType::Uint32 | NiftiDataType::Float32 => 32,
            NiftiDataType::Float64 => 64,
        }
    }
}


/// Models the header of a NIfTI-1 file. Fields that this crate never interprets are not kept.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub endianness: Endianness,
    pub dim: [i16; 8],
    pub intent_code: i16,
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub xyzt_units: u8,
    pub descrip: String,
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern: [f32; 3],
    pub qoffset: [f32; 3],
    pub srow_x: [f32; 4],
    pub srow_y: [f32; 4],
    pub srow_z: [f32; 4],
    pub magic: String,
}


impl Default for NiftiHeader {
    fn default() -> NiftiHeader {
        NiftiHeader {
            endianness: Endianness::Little,
            dim: [3, 1, 1, 1, 1, 1, 1, 1],
            intent_code: 0,
            datatype: NiftiDataType::Float32.code(),
            bitpix: 32,
            pixdim: [1.0; 8],
            vox_offset: NIFTI1_VOX_OFFSET,
            scl_slope: 1.0,
            scl_inter: 0.0,
            xyzt_units: 2, // millimeters
            descrip: String::new(),
            qform_code: 0,
            sform_code: 0,
            quatern: [0.; 3],
            qoffset: [0.; 3],
            srow_x: [1., 0., 0., 0.],
            srow_y: [0., 1., 0., 0.],
            srow_z: [0., 0., 1., 0.],
            magic: String::from(NIFTI1_MAGIC),
        }
    }
}


impl NiftiHeader {

    /// Read a NIfTI header from the given byte stream.
    /// It is assumed that the input is currently at the start of the header.
    pub fn from_reader<S>(input: &mut S) -> Result<NiftiHeader>
    where
        S: Read,
    {
        let mut raw = [0u8; NIFTI1_HEADER_SIZE as usize];
        input.read_exact(&mut raw)?;

        let sizeof_le = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let sizeof_be = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let endianness = if sizeof_le == NIFTI1_HEADER_SIZE {
            Endianness::Little
        } else if sizeof_be == NIFTI1_HEADER_SIZE {
            Endianness::Big
        } else {
            return Err(AlicError::InvalidNifti(format!("sizeof_hdr is {}, expected 348", sizeof_le)));
        };

        let mut hdr = NiftiHeader { endianness, ..NiftiHeader::default() };
        let mut input = ByteOrdered::runtime(Cursor::new(&raw[4..]), endianness);

        // data_type, db_name, extents, session_error, regular, dim_info: unused
        let _unused = read_fixed_length_string(&mut input, 36)?;
        for d in hdr.dim.iter_mut() { *d = input.read_i16()?; }
        for _ in 0..3 { input.read_f32()?; } // intent_p1..3
        hdr.intent_code = input.read_i16()?;
        hdr.datatype = input.read_i16()?;
        hdr.bitpix = input.read_i16()?;
        input.read_i16()?; // slice_start
        for p in hdr.pixdim.iter_mut() { *p = input.read_f32()?; }
        hdr.vox_offset = input.read_f32()?;
        hdr.scl_slope = input.read_f32()?;
        hdr.scl_inter = input.read_f32()?;
        input.read_i16()?; // slice_end
        input.read_u8()?; // slice_code
        hdr.xyzt_units = input.read_u8()?;
        for _ in 0..4 { input.read_f32()?; } // cal_max, cal_min, slice_duration, toffset
        for _ in 0..2 { input.read_i32()?; } // glmax, glmin
        hdr.descrip = read_fixed_length_string(&mut input, 80)?;
        let _aux_file = read_fixed_length_string(&mut input, 24)?;
        hdr.qform_code = input.read_i16()?;
        hdr.sform_code = input.read_i16()?;
        for q in hdr.quatern.iter_mut() { *q = input.read_f32()?; }
        for q in hdr.qoffset.iter_mut() { *q = input.read_f32()?; }
        for s in hdr.srow_x.iter_mut() { *s = input.read_f32()?; }
        for s in hdr.srow_y.iter_mut() { *s = input.read_f32()?; }
        for s in hdr.srow_z.iter_mut() { *s = input.read_f32()?; }
        let _intent_name = read_fixed_length_string(&mut input, 16)?;
        hdr.magic = read_fixed_length_string(&mut input, 4)?;

        if hdr.magic != NIFTI1_MAGIC {
            return Err(AlicError::InvalidNifti(format!("unsupported magic '{}', only single-file NIfTI-1 is supported", hdr.magic)));
        }
        if hdr.dim[0] < 1 || hdr.dim[0] > 7 {
            return Err(AlicError::InvalidNifti(format!("invalid number of dimensions {}", hdr.dim[0])));
        }
        Ok(hdr)
    }

    /// Volume shape as (x, y, z, frames). Dimensions 4 and up are folded into the frame count.
    pub fn shape(&self) -> Result<[usize; 4]> {
        let ndim = self.dim[0] as usize;
        let mut shape = [1usize; 4];
        for d in 0..ndim {
            let len = self.dim[d + 1];
            if len < 1 {
                return Err(AlicError::InvalidNifti(format!("dimension {} has length {}", d + 1, len)));
            }
            if d < 3 {
                shape[d] = len as usize;
            } else {
                shape[3] *= len as usize;
            }
        }
        Ok(shape)
    }

    /// The voxel-to-physical affine: sform if set, else qform, else pixdim scaling.
    pub fn affine(&self) -> Affine {
        if self.sform_code > 0 {
            let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
            return Affine::from_rows([row(&self.srow_x), row(&self.srow_y), row(&self.srow_z)]);
        }
        if self.qform_code > 0 {
            return self.qform_affine();
        }
        let zooms = [self.pixdim[1] as f64, self.pixdim[2] as f64, self.pixdim[3] as f64];
        Affine::scaled(zooms, [0., 0., 0.])
    }

    fn qform_affine(&self) -> Affine {
        let [b, c, d] = [self.quatern[0] as f64, self.quatern[1] as f64, self.quatern[2] as f64];
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let (dx, dy, dz) = (self.pixdim[1] as f64, self.pixdim[2] as f64, self.pixdim[3] as f64 * qfac);

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let o = [self.qoffset[0] as f64, self.qoffset[1] as f64, self.qoffset[2] as f64];
        Affine::from_rows([
            [r[0][0] * dx, r[0][1] * dy, r[0][2] * dz, o[0]],
            [r[1][0] * dx, r[1][1] * dy, r[1][2] * dz, o[1]],
            [r[2][0] * dx, r[2][1] * dy, r[2][2] * dz, o[2]],
        ])
    }

    /// Write the header in little endian byte order, followed by an empty extension flag.
    fn to_writer<W: Write>(&self, output: W) -> Result<()> {
        let mut out = ByteOrdered::le(output);
        out.write_i32(NIFTI1_HEADER_SIZE)?;
        out.write_all(&[0u8; 36])?;
        for d in self.dim.iter() { out.write_i16(*d)?; }
        for _ in 0..3 { out.write_f32(0.0)?; }
        out.write_i16(self.intent_code)?;
        out.write_i16(self.datatype)?;
        out.write_i16(self.bitpix)?;
        out.write_i16(0)?;
        for p in self.pixdim.iter() { out.write_f32(*p)?; }
        out.write_f32(NIFTI1_VOX_OFFSET)?;
        out.write_f32(self.scl_slope)?;
        out.write_f32(self.scl_inter)?;
        out.write_i16(0)?;
        out.write_u8(0)?;
        out.write_u8(self.xyzt_units)?;
        for _ in 0..4 { out.write_f32(0.0)?; }
        for _ in 0..2 { out.write_i32(0)?; }
        out.write_all(&fixed_bytes::<80>(&self.descrip))?;
        out.write_all(&[0u8; 24])?;
        out.write_i16(self.qform_code)?;
        out.write_i16(self.sform_code)?;
        for q in self.quatern.iter() { out.write_f32(*q)?; }
        for q in self.qoffset.iter() { out.write_f32(*q)?; }
        for s in self.srow_x.iter().chain(self.srow_y.iter()).chain(self.srow_z.iter()) {
            out.write_f32(*s)?;
        }
        out.write_all(&[0u8; 16])?;
        out.write_all(&fixed_bytes::<4>(NIFTI1_MAGIC))?;
        out.write_all(&[0u8; 4])?;
        Ok(())
    }
}


fn fixed_bytes<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    for (dst, src) in buf.iter_mut().zip(s.bytes().take(N - 1)) {
        *dst = src;
    }
    buf
}


/// Models a NIfTI image: header plus scaled voxel data as (x, y, z, frame).
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiImage {
    pub header: NiftiHeader,
    pub data: Array4<f64>,
}


impl NiftiImage {

    /// Read a NIfTI file. If the file's name ends with ".gz", it is decompressed on the fly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            NiftiImage::from_reader(GzDecoder::new(file))
        } else {
            NiftiImage::from_reader(file)
        }
    }

    /// Read a NIfTI image from the given byte stream, positioned at the start of the header.
    pub fn from_reader<S>(mut input: S) -> Result<NiftiImage>
    where
        S: Read,
    {
        let hdr = NiftiHeader::from_reader(&mut input)?;
        let shape = hdr.shape()?;
        let dtype = NiftiDataType::from_code(hdr.datatype)?;

        // gzip streams cannot seek, so skip the extension bytes by reading them.
        let skip = (hdr.vox_offset as i64 - NIFTI1_HEADER_SIZE as i64).max(0) as u64;
        std::io::copy(&mut (&mut input).take(skip), &mut std::io::sink())?;

        let num_values = shape.iter()
            .try_fold(1usize, |acc, len| acc.checked_mul(*len))
            .ok_or_else(|| AlicError::InvalidNifti(format!("too many voxels for shape {:?}", shape)))?;
        let mut input = ByteOrdered::runtime(input, hdr.endianness);
        // The header is untrusted, so the buffer grows with the data actually read.
        let mut values: Vec<f64> = Vec::with_capacity(num_values.min(MAX_PREALLOCATED_VALUES));
        for _ in 0..num_values {
            let v = match dtype {
                NiftiDataType::Uint8 => input.read_u8()? as f64,
                NiftiDataType::Int8 => input.read_i8()? as f64,
                NiftiDataType::Int16 => input.read_i16()? as f64,
                NiftiDataType::Uint16 => input.read_u16()? as f64,
                NiftiDataType::Int32 => input.read_i32()? as f64,
                NiftiDataType::Uint32 => input.read_u32()? as f64,
                NiftiDataType::Float32 => input.read_f32()? as f64,
                NiftiDataType::Float64 => input.read_f64()?,
            };
            values.push(v);
        }

        if hdr.scl_slope != 0.0 && (hdr.scl_slope != 1.0 || hdr.scl_inter != 0.0) {
            let (slope, inter) = (hdr.scl_slope as f64, hdr.scl_inter as f64);
            values.iter_mut().for_each(|v| *v = *v * slope + inter);
        }

        // NIfTI stores voxels with the first index varying fastest.
        let data = Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]).f(), values)
            .map_err(|e| AlicError::InvalidNifti(format!("data does not match header shape: {}", e)))?;

        Ok(NiftiImage { header: hdr, data })
    }

    /// Wrap a 3D volume, with sform and qform set from the volume's affine.
    pub fn from_volume(volume: &Volume) -> NiftiImage {
        let data = volume.data.clone().insert_axis(Axis(3));
        NiftiImage::from_data(data, &volume.grid.affine)
    }

    /// Build an image from (x, y, z, frame) data and an affine.
    pub fn from_data(data: Array4<f64>, affine: &Affine) -> NiftiImage {
        let (nx, ny, nz, nt) = data.dim();
        let zooms = affine.zooms();
        let row = |r: usize| {
            let m = affine.m[r];
            [m[0] as f32, m[1] as f32, m[2] as f32, m[3] as f32]
        };
        let (quatern, qfac) = quaternion_of(affine);
        let header = NiftiHeader {
            dim: [if nt > 1 { 4 } else { 3 }, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1],
            pixdim: [qfac as f32, zooms[0] as f32, zooms[1] as f32, zooms[2] as f32, 1.0, 1.0, 1.0, 1.0],
            sform_code: 1,
            qform_code: 1,
            quatern: [quatern[0] as f32, quatern[1] as f32, quatern[2] as f32],
            qoffset: [affine.m[0][3] as f32, affine.m[1][3] as f32, affine.m[2][3] as f32],
            srow_x: row(0),
            srow_y: row(1),
            srow_z: row(2),
            ..NiftiHeader::default()
        };
        NiftiImage { header, data }
    }

    /// The first frame as a [`Volume`].
    pub fn first_volume(&self) -> Volume {
        let frame = self.data.index_axis(Axis(3), 0).to_owned();
        Volume::new(frame, self.header.affine())
    }

    pub fn affine(&self) -> Affine {
        self.header.affine()
    }

    /// Write the image. If the file's name ends with ".gz", it is gzip-compressed.
    pub fn to_file<P: AsRef<Path>>(&self, path: P, dtype: NiftiDataType) -> Result<()> {
        let gz = is_gz_file(&path);
        let file = BufWriter::new(File::create(path)?);
        if gz {
            let mut enc = GzEncoder::new(file, Compression::default());
            self.to_writer(&mut enc, dtype)?;
            enc.finish()?.flush()?;
        } else {
            let mut file = file;
            self.to_writer(&mut file, dtype)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Write header and data in little endian byte order. Only `Float32` and `Int32` output is supported.
    pub fn to_writer<W: Write>(&self, output: &mut W, dtype: NiftiDataType) -> Result<()> {
        if dtype != NiftiDataType::Float32 && dtype != NiftiDataType::Int32 {
            return Err(AlicError::InvalidNifti(format!("writing {:?} data is not supported", dtype)));
        }
        let header = NiftiHeader {
            datatype: dtype.code(),
            bitpix: dtype.bitpix(),
            scl_slope: 1.0,
            scl_inter: 0.0,
            endianness: Endianness::Little,
            ..self.header.clone()
        };
        header.to_writer(&mut *output)?;

        let (nx, ny, nz, nt) = self.data.dim();
        let mut out = ByteOrdered::le(output);
        for t in 0..nt {
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let v = self.data[[i, j, k, t]];
                        match dtype {
                            NiftiDataType::Int32 => out.write_i32(v.round() as i32)?,
                            _ => out.write_f32(v as f32)?,
                        }
                    }
                }
            }
        }
        Ok(())
    }
}


/// The qform quaternion parameters (b, c, d) and qfac of the rotation part of an affine.
///
/// Columns are normalized by the zooms. A left handed affine gets qfac -1 and its third column flipped.
/// Shears are not representable in a qform and are dropped.
fn quaternion_of(affine: &Affine) -> ([f64; 3], f64) {
    let zooms = affine.zooms();
    let mut r = [[0.0f64; 3]; 3];
    for (row, m) in r.iter_mut().zip(affine.m.iter()) {
        for c in 0..3 {
            row[c] = if zooms[c] > 0.0 { m[c] / zooms[c] } else if c == 0 { 1.0 } else { 0.0 };
        }
    }
    let det = r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
        - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
        + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0]);
    let qfac = if det < 0.0 { -1.0 } else { 1.0 };
    if qfac < 0.0 {
        for row in r.iter_mut() {
            row[2] = -row[2];
        }
    }

    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let xd = 1.0 + r[0][0] - r[1][1] - r[2][2];
    let yd = 1.0 - r[0][0] + r[1][1] - r[2][2];
    let zd = 1.0 - r[0][0] - r[1][1] + r[2][2];
    let (a, b, c, d) = if trace > 0.5 {
        let a = 0.5 * trace.sqrt();
        (a, 0.25 * (r[2][1] - r[1][2]) / a, 0.25 * (r[0][2] - r[2][0]) / a, 0.25 * (r[1][0] - r[0][1]) / a)
    } else if xd > 1.0 {
        let b = 0.5 * xd.sqrt();
        (0.25 * (r[2][1] - r[1][2]) / b, b, 0.25 * (r[0][1] + r[1][0]) / b, 0.25 * (r[0][2] + r[2][0]) / b)
    } else if yd > 1.0 {
        let c = 0.5 * yd.sqrt();
        (0.25 * (r[0][2] - r[2][0]) / c, 0.25 * (r[0][1] + r[1][0]) / c, c, 0.25 * (r[1][2] + r[2][1]) / c)
    } else if zd > 0.0 {
        let d = 0.5 * zd.sqrt();
        (0.25 * (r[1][0] - r[0][1]) / d, 0.25 * (r[0][2] + r[2][0]) / d, 0.25 * (r[1][2] + r[2][1]) / d, d)
    } else {
        (1.0, 0.0, 0.0, 0.0)
    };
    // qform_affine derives a from b, c and d, so a must not be negative.
    let sign = if a < 0.0 { -1.0 } else { 1.0 };
    ([sign * b, sign * c, sign * d], qfac)
}


/// Read a NIfTI file.
///
/// # Examples
///
/// ```no_run
/// let img = alic_pathways::read_nifti("/path/to/subject/indata/aparc+aseg.nii.gz").unwrap();
/// println!("Image has shape {:?}.", img.data.dim());
/// ```
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    NiftiImage::from_file(path)
}
