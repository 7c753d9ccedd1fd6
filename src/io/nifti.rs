//! Minimal NIfTI-1 single-file (`.nii`) codec.
//!
//! Supports uncompressed files of up to four dimensions in either byte order,
//! the common integer and float datatypes, and `scl_slope`/`scl_inter`
//! scaling on read. Geometry fields (pixdim, qform, sform) are carried through
//! unchanged so outputs line up with their inputs in a viewer. Files are
//! written little-endian with a 352-byte data offset.

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::PrfError;

const HEADER_SIZE: i32 = 348;
const VOX_OFFSET: usize = 352;
const MAGIC_SINGLE: &[u8; 4] = b"n+1\0";

/// On-disk voxel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I8,
    I16,
    U16,
    I32,
    F32,
    F64,
}

impl DataType {
    fn from_code(code: i16) -> Result<Self, PrfError> {
        Ok(match code {
            2 => DataType::U8,
            256 => DataType::I8,
            4 => DataType::I16,
            512 => DataType::U16,
            8 => DataType::I32,
            16 => DataType::F32,
            64 => DataType::F64,
            other => return Err(PrfError::format(format!("Unsupported NIfTI datatype code {other}."))),
        })
    }

    fn code(self) -> i16 {
        match self {
            DataType::U8 => 2,
            DataType::I8 => 256,
            DataType::I16 => 4,
            DataType::U16 => 512,
            DataType::I32 => 8,
            DataType::F32 => 16,
            DataType::F64 => 64,
        }
    }

    fn bytes(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }
}

/// Spatial metadata copied from input to output volumes.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub pixdim: [f32; 8],
    pub xyzt_units: u8,
    pub qform_code: i16,
    pub sform_code: i16,
    /// quatern_b, quatern_c, quatern_d, qoffset_x, qoffset_y, qoffset_z
    pub quatern: [f32; 6],
    pub srow: [[f32; 4]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            pixdim: [1.0; 8],
            xyzt_units: 0,
            qform_code: 0,
            sform_code: 0,
            quatern: [0.0; 6],
            srow: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        }
    }
}

/// A 3D or 4D image in storage order (x fastest, then y, z, t).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub dims: [usize; 3],
    pub nt: usize,
    pub data: Vec<f64>,
    pub geometry: Geometry,
}

impl Volume {
    pub fn new(dims: [usize; 3], nt: usize, data: Vec<f64>, geometry: Geometry) -> Result<Self, PrfError> {
        let expected = dims[0] * dims[1] * dims[2] * nt;
        if data.len() != expected {
            return Err(PrfError::shape(format!(
                "Volume data has {} values, dims {dims:?} x {nt} need {expected}.",
                data.len()
            )));
        }
        Ok(Self {
            dims,
            nt,
            data,
            geometry,
        })
    }

    /// Voxels per 3D frame.
    pub fn n_voxels(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Time course of one voxel (flat storage index).
    pub fn series(&self, voxel: usize) -> Vec<f64> {
        let n = self.n_voxels();
        (0..self.nt).map(|t| self.data[t * n + voxel]).collect()
    }
}

pub fn read_nifti(path: &Path) -> Result<Volume, PrfError> {
    reject_compressed(path)?;
    let bytes = fs::read(path).map_err(|e| PrfError::io("read NIfTI", path, e))?;
    with_byte_order(&bytes, parse::<LittleEndian>, parse::<BigEndian>).map_err(|e| in_file(path, e))
}

/// Spatial dimensions and volume count, read from the header alone.
pub fn read_nifti_shape(path: &Path) -> Result<([usize; 3], usize), PrfError> {
    reject_compressed(path)?;
    let file = File::open(path).map_err(|e| PrfError::io("open NIfTI", path, e))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE as usize);
    file.take(HEADER_SIZE as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| PrfError::io("read NIfTI header", path, e))?;
    let header = with_byte_order(&bytes, parse_header::<LittleEndian>, parse_header::<BigEndian>)
        .map_err(|e| in_file(path, e))?;
    Ok((header.dims, header.nt))
}

fn reject_compressed(path: &Path) -> Result<(), PrfError> {
    if path.to_string_lossy().ends_with(".gz") {
        return Err(PrfError::format(format!(
            "'{}' is compressed; only uncompressed .nii files are supported.",
            path.display()
        )));
    }
    Ok(())
}

fn in_file(path: &Path, err: PrfError) -> PrfError {
    match err {
        PrfError::Format(msg) => PrfError::format(format!("'{}': {msg}", path.display())),
        other => other,
    }
}

fn with_byte_order<T>(
    bytes: &[u8],
    little: impl FnOnce(&[u8]) -> Result<T, PrfError>,
    big: impl FnOnce(&[u8]) -> Result<T, PrfError>,
) -> Result<T, PrfError> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(PrfError::format("too short for a NIfTI header.".to_string()));
    }
    if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE {
        little(bytes)
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE {
        big(bytes)
    } else {
        Err(PrfError::format("sizeof_hdr is not 348.".to_string()))
    }
}

fn read_f32s<E: ByteOrder>(cur: &mut Cursor<&[u8]>, out: &mut [f32]) -> std::io::Result<()> {
    for v in out.iter_mut() {
        *v = cur.read_f32::<E>()?;
    }
    Ok(())
}

struct Header {
    dims: [usize; 3],
    nt: usize,
    datatype: DataType,
    vox_offset: f32,
    scl_slope: f32,
    scl_inter: f32,
    geometry: Geometry,
}

fn parse_header<E: ByteOrder>(bytes: &[u8]) -> Result<Header, PrfError> {
    let truncated = |_| PrfError::format("header is truncated.".to_string());
    let mut cur = Cursor::new(bytes);

    cur.set_position(40);
    let mut dim = [0i16; 8];
    for d in dim.iter_mut() {
        *d = cur.read_i16::<E>().map_err(truncated)?;
    }
    cur.set_position(70);
    let datatype = DataType::from_code(cur.read_i16::<E>().map_err(truncated)?)?;
    cur.set_position(76);
    let mut geometry = Geometry::default();
    read_f32s::<E>(&mut cur, &mut geometry.pixdim).map_err(truncated)?;
    let vox_offset = cur.read_f32::<E>().map_err(truncated)?;
    let scl_slope = cur.read_f32::<E>().map_err(truncated)?;
    let scl_inter = cur.read_f32::<E>().map_err(truncated)?;
    cur.set_position(123);
    geometry.xyzt_units = cur.read_u8().map_err(truncated)?;
    cur.set_position(252);
    geometry.qform_code = cur.read_i16::<E>().map_err(truncated)?;
    geometry.sform_code = cur.read_i16::<E>().map_err(truncated)?;
    read_f32s::<E>(&mut cur, &mut geometry.quatern).map_err(truncated)?;
    for row in geometry.srow.iter_mut() {
        read_f32s::<E>(&mut cur, row).map_err(truncated)?;
    }
    cur.set_position(344);
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(truncated)?;
    if &magic != MAGIC_SINGLE {
        return Err(PrfError::format("not a single-file NIfTI-1 image (magic 'n+1').".to_string()));
    }

    let ndim = dim[0];
    if !(1..=7).contains(&ndim) {
        return Err(PrfError::format(format!("invalid dim[0] = {ndim}.")));
    }
    let extent = |i: usize| -> usize {
        if i <= ndim as usize { dim[i].max(1) as usize } else { 1 }
    };
    if (5..=7).any(|i| extent(i) > 1) {
        return Err(PrfError::format("images with more than four dimensions are not supported.".to_string()));
    }
    Ok(Header {
        dims: [extent(1), extent(2), extent(3)],
        nt: extent(4),
        datatype,
        vox_offset,
        scl_slope,
        scl_inter,
        geometry,
    })
}

fn parse<E: ByteOrder>(bytes: &[u8]) -> Result<Volume, PrfError> {
    let Header {
        dims,
        nt,
        datatype,
        vox_offset,
        scl_slope,
        scl_inter,
        geometry,
    } = parse_header::<E>(bytes)?;

    let start = vox_offset.max(0.0) as usize;
    let end = dims
        .iter()
        .try_fold(nt, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(datatype.bytes()))
        .and_then(|len| len.checked_add(start))
        .ok_or_else(|| PrfError::format(format!("image size {dims:?}x{nt} overflows.")))?;
    if bytes.len() < end {
        return Err(PrfError::format(format!(
            "data section holds {} bytes, expected {}.",
            bytes.len().saturating_sub(start),
            end - start
        )));
    }
    let raw = &bytes[start..end];
    let mut data: Vec<f64> = match datatype {
        DataType::U8 => raw.iter().map(|&b| f64::from(b)).collect(),
        DataType::I8 => raw.iter().map(|&b| f64::from(b as i8)).collect(),
        DataType::I16 => raw.chunks_exact(2).map(|c| f64::from(E::read_i16(c))).collect(),
        DataType::U16 => raw.chunks_exact(2).map(|c| f64::from(E::read_u16(c))).collect(),
        DataType::I32 => raw.chunks_exact(4).map(|c| f64::from(E::read_i32(c))).collect(),
        DataType::F32 => raw.chunks_exact(4).map(|c| f64::from(E::read_f32(c))).collect(),
        DataType::F64 => raw.chunks_exact(8).map(E::read_f64).collect(),
    };

    if scl_slope.is_finite() && scl_slope != 0.0 && (scl_slope != 1.0 || scl_inter != 0.0) {
        let (slope, inter) = (f64::from(scl_slope), f64::from(scl_inter));
        for v in data.iter_mut() {
            *v = *v * slope + inter;
        }
    }

    Volume::new(dims, nt, data, geometry)
}

/// Write `volume` as a little-endian single-file NIfTI-1 image.
pub fn write_nifti(path: &Path, volume: &Volume, datatype: DataType) -> Result<(), PrfError> {
    let mut buf: Vec<u8> = Vec::with_capacity(VOX_OFFSET + volume.data.len() * datatype.bytes());
    encode_header(&mut buf, volume, datatype).map_err(|e| PrfError::io("encode NIfTI header", path, e))?;
    encode_data(&mut buf, &volume.data, datatype).map_err(|e| PrfError::io("encode NIfTI data", path, e))?;
    let mut file = fs::File::create(path).map_err(|e| PrfError::io("create NIfTI", path, e))?;
    file.write_all(&buf).map_err(|e| PrfError::io("write NIfTI", path, e))
}

fn encode_header(buf: &mut Vec<u8>, volume: &Volume, datatype: DataType) -> std::io::Result<()> {
    type E = LittleEndian;
    let g = &volume.geometry;
    buf.write_i32::<E>(HEADER_SIZE)?;
    buf.extend_from_slice(&[0u8; 36]);
    let ndim: i16 = if volume.nt > 1 { 4 } else { 3 };
    let dims = [
        ndim,
        volume.dims[0] as i16,
        volume.dims[1] as i16,
        volume.dims[2] as i16,
        volume.nt.max(1) as i16,
        1,
        1,
        1,
    ];
    for d in dims {
        buf.write_i16::<E>(d)?;
    }
    buf.extend_from_slice(&[0u8; 14]); // intent_p1..3, intent_code
    buf.write_i16::<E>(datatype.code())?;
    buf.write_i16::<E>((datatype.bytes() * 8) as i16)?;
    buf.write_i16::<E>(0)?; // slice_start
    for p in g.pixdim {
        buf.write_f32::<E>(p)?;
    }
    buf.write_f32::<E>(VOX_OFFSET as f32)?;
    buf.write_f32::<E>(1.0)?; // scl_slope
    buf.write_f32::<E>(0.0)?; // scl_inter
    buf.write_i16::<E>(0)?; // slice_end
    buf.write_u8(0)?; // slice_code
    buf.write_u8(g.xyzt_units)?;
    buf.extend_from_slice(&[0u8; 24]); // cal_max .. glmin
    let mut descrip = [0u8; 80];
    let text = b"prf-mapper";
    descrip[..text.len()].copy_from_slice(text);
    buf.extend_from_slice(&descrip);
    buf.extend_from_slice(&[0u8; 24]); // aux_file
    buf.write_i16::<E>(g.qform_code)?;
    buf.write_i16::<E>(g.sform_code)?;
    for q in g.quatern {
        buf.write_f32::<E>(q)?;
    }
    for row in g.srow {
        for v in row {
            buf.write_f32::<E>(v)?;
        }
    }
    buf.extend_from_slice(&[0u8; 16]); // intent_name
    buf.extend_from_slice(MAGIC_SINGLE);
    buf.extend_from_slice(&[0u8; 4]); // no extensions
    debug_assert_eq!(buf.len(), VOX_OFFSET);
    Ok(())
}

fn encode_data(buf: &mut Vec<u8>, data: &[f64], datatype: DataType) -> std::io::Result<()> {
    type E = LittleEndian;
    for &v in data {
        match datatype {
            DataType::U8 => buf.write_u8(v.round().clamp(0.0, f64::from(u8::MAX)) as u8)?,
            DataType::I8 => buf.write_i8(v.round().clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8)?,
            DataType::I16 => buf.write_i16::<E>(v.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)?,
            DataType::U16 => buf.write_u16::<E>(v.round().clamp(0.0, f64::from(u16::MAX)) as u16)?,
            DataType::I32 => buf.write_i32::<E>(v.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)?,
            DataType::F32 => buf.write_f32::<E>(v as f32)?,
            DataType::F64 => buf.write_f64::<E>(v)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(nt: usize) -> Volume {
        let dims = [3, 2, 2];
        let data = (0..12 * nt).map(|i| i as f64 * 0.5 - 3.0).collect();
        let geometry = Geometry {
            pixdim: [1.0, 2.0, 2.0, 2.5, 1.5, 1.0, 1.0, 1.0],
            sform_code: 1,
            ..Geometry::default()
        };
        Volume::new(dims, nt, data, geometry).unwrap()
    }

    #[test]
    fn float_volume_reads_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii");
        let vol = sample(4);
        write_nifti(&path, &vol, DataType::F64).unwrap();
        let back = read_nifti(&path).unwrap();
        assert_eq!(back, vol);
        assert_eq!(back.series(1), vec![-2.5, 3.5, 9.5, 15.5]);
    }

    #[test]
    fn integer_volume_rounds_and_keeps_3d_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.nii");
        let vol = Volume::new([2, 2, 1], 1, vec![0.0, 1.0, 1.4, 2.6], Geometry::default()).unwrap();
        write_nifti(&path, &vol, DataType::I16).unwrap();
        let back = read_nifti(&path).unwrap();
        assert_eq!(back.dims, [2, 2, 1]);
        assert_eq!(back.nt, 1);
        assert_eq!(back.data, vec![0.0, 1.0, 1.0, 3.0]);
    }

    #[test]
    fn big_endian_header_with_scaling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("be.nii");
        let mut bytes = vec![0u8; VOX_OFFSET + 4];
        BigEndian::write_i32(&mut bytes[0..4], HEADER_SIZE);
        for (i, d) in [3i16, 2, 1, 1, 1, 1, 1, 1].iter().enumerate() {
            BigEndian::write_i16(&mut bytes[40 + 2 * i..], *d);
        }
        BigEndian::write_i16(&mut bytes[70..], 4);
        BigEndian::write_f32(&mut bytes[108..], VOX_OFFSET as f32);
        BigEndian::write_f32(&mut bytes[112..], 2.0);
        BigEndian::write_f32(&mut bytes[116..], 1.0);
        bytes[344..348].copy_from_slice(MAGIC_SINGLE);
        BigEndian::write_i16(&mut bytes[VOX_OFFSET..], 5);
        BigEndian::write_i16(&mut bytes[VOX_OFFSET + 2..], -1);
        fs::write(&path, &bytes).unwrap();

        let vol = read_nifti(&path).unwrap();
        assert_eq!(vol.dims, [2, 1, 1]);
        assert_eq!(vol.data, vec![11.0, -1.0]);
    }

    #[test]
    fn compressed_and_garbage_inputs_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("v.nii.gz");
        fs::write(&gz, b"whatever").unwrap();
        assert!(matches!(read_nifti(&gz), Err(PrfError::Format(_))));

        let junk = dir.path().join("junk.nii");
        fs::write(&junk, vec![7u8; 400]).unwrap();
        assert!(matches!(read_nifti(&junk), Err(PrfError::Format(_))));
    }

    #[test]
    fn shape_is_read_from_the_header_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii");
        write_nifti(&path, &sample(5), DataType::F32).unwrap();
        let bytes = fs::read(&path).unwrap();
        // Data section dropped entirely: the header still answers.
        fs::write(&path, &bytes[..HEADER_SIZE as usize]).unwrap();
        assert_eq!(read_nifti_shape(&path).unwrap(), ([3, 2, 2], 5));
        assert!(matches!(read_nifti(&path), Err(PrfError::Format(_))));
    }

    #[test]
    fn implausible_dimensions_are_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.nii");
        let mut bytes = vec![0u8; VOX_OFFSET];
        LittleEndian::write_i32(&mut bytes[0..4], HEADER_SIZE);
        for (i, d) in [4i16, i16::MAX, i16::MAX, i16::MAX, i16::MAX, 1, 1, 1].iter().enumerate() {
            LittleEndian::write_i16(&mut bytes[40 + 2 * i..], *d);
        }
        LittleEndian::write_i16(&mut bytes[70..], 64);
        LittleEndian::write_f32(&mut bytes[108..], VOX_OFFSET as f32);
        bytes[344..348].copy_from_slice(MAGIC_SINGLE);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_nifti(&path), Err(PrfError::Format(_))));
    }

    #[test]
    fn truncated_data_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii");
        write_nifti(&path, &sample(2), DataType::F32).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(read_nifti(&path), Err(PrfError::Format(_))));
    }
}
