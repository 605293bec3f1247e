//! NIfTI-1, single-file (`n+1`) and paired (`ni1`)
//!
//! Reads 3D and 4D images with either magic; always writes single `.nii`
//! files. Header fields with no place in [`CommonMetadata`] survive a round
//! trip as `nifti_*` header lines, and the remaining free header lines are
//! stored in an extension block with code 28.

use super::analyze::{
    header_dims, image_path, is_nifti_magic, read_dense_frame, read_dense_frames, HEADER_SIZE,
};
use super::FORMAT_VERSION;
use crate::compression::InputStream;
use crate::endian::{swap_in_place, Endian};
use crate::error::{Result, VoxError};
use crate::io::{write_atomic, AtomicFile};
use crate::metadata::{CommonMetadata, FLT_MIN};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::series::VolumeSeries4D;
use crate::types::{get_value, DataType};
use crate::utils::{format_extension, get_fixed_str, put_fixed_str};
use crate::volume::Volume3D;
use log::debug;
use std::ops::Range;
use std::path::Path;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "NIfTI-1",
    extensions: &["nii"],
    signature: "nifti",
    aliases: &["nifti3d", "nifti4d", "n13d", "n14d", "nii"],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::READ_WRITE,
    series: Capabilities::READ_WRITE.with_frames(),
};

/// Extension code for free-text header lines
pub const ECODE_TEXT: u32 = 28;

/// First byte after the header and the extension flag
const MIN_OFFSET: u64 = 352;

const SIZEOF_HDR: usize = 0;
const REGULAR: usize = 38;
const DIM_INFO: usize = 39;
const DIM: usize = 40;
const INTENT_P1: usize = 56;
const INTENT_P2: usize = 60;
const INTENT_P3: usize = 64;
const INTENT_CODE: usize = 68;
const DATATYPE: usize = 70;
const BITPIX: usize = 72;
const PIXDIM: usize = 76;
const VOX_OFFSET: usize = 108;
const SCL_SLOPE: usize = 112;
const SCL_INTER: usize = 116;
const SLICE_END: usize = 120;
const SLICE_CODE: usize = 122;
const XYZT_UNITS: usize = 123;
const CAL_MAX: usize = 124;
const CAL_MIN: usize = 128;
const SLICE_DURATION: usize = 132;
const TOFFSET: usize = 136;
const DESCRIP: usize = 148;
const QFORM_CODE: usize = 252;
const SFORM_CODE: usize = 254;
const QUATERN: usize = 256;
const QOFFSET: usize = 268;
const SROW: usize = 280;
const MAGIC: usize = 344;

const UNITS_METER: u8 = 1;
const UNITS_MM: u8 = 2;
const UNITS_MICRON: u8 = 3;
const UNITS_SEC: u8 = 8;
const UNITS_MSEC: u8 = 16;
const UNITS_USEC: u8 = 24;

#[derive(Clone, Copy)]
enum Field {
    U8,
    I16,
    F32,
}

/// Header fields kept as `nifti_*` lines: (name, offset, kind)
const PASSTHROUGH: [(&str, usize, Field); 12] = [
    ("nifti_dim_info", DIM_INFO, Field::U8),
    ("nifti_intent_p1", INTENT_P1, Field::F32),
    ("nifti_intent_p2", INTENT_P2, Field::F32),
    ("nifti_intent_p3", INTENT_P3, Field::F32),
    ("nifti_intent_code", INTENT_CODE, Field::I16),
    ("nifti_pixdim0", PIXDIM, Field::F32),
    ("nifti_slice_end", SLICE_END, Field::I16),
    ("nifti_slice_code", SLICE_CODE, Field::U8),
    ("nifti_cal_max", CAL_MAX, Field::F32),
    ("nifti_cal_min", CAL_MIN, Field::F32),
    ("nifti_slice_duration", SLICE_DURATION, Field::F32),
    ("nifti_toffset", TOFFSET, Field::F32),
];

fn type_for_code(code: i16) -> Result<DataType> {
    match code {
        2 | 256 => Ok(DataType::Byte),
        4 | 512 => Ok(DataType::Int16),
        8 | 768 => Ok(DataType::Int32),
        16 => Ok(DataType::Float32),
        64 => Ok(DataType::Float64),
        other => Err(VoxError::UnsupportedType(format!("NIfTI datatype {}", other))),
    }
}

fn code_for_type(datatype: DataType) -> i16 {
    match datatype {
        DataType::Byte => 2,
        DataType::Int16 => 4,
        DataType::Int32 => 8,
        DataType::Float32 => 16,
        DataType::Float64 => 64,
    }
}

fn is_passthrough(line: &str) -> bool {
    let keyword = line.split_whitespace().next().unwrap_or("");
    PASSTHROUGH.iter().any(|(name, _, _)| keyword.eq_ignore_ascii_case(name))
}

/// A decoded header plus the bytes it came from
struct NiftiHeader {
    raw: Vec<u8>,
    order: Endian,
    dim: [i16; 8],
}

impl NiftiHeader {
    fn parse(raw: Vec<u8>, path: &Path) -> Result<Self> {
        let reject = |why: String| {
            VoxError::NotThisFormat(format!("{}: not a NIfTI-1 header ({})", path.display(), why))
        };
        if raw.len() < HEADER_SIZE {
            return Err(reject(format!("{} bytes", raw.len())));
        }
        if !is_nifti_magic(&raw[MAGIC..MAGIC + 4]) {
            return Err(reject("magic".to_string()));
        }
        let mut order = Endian::native();
        if !(1..=7).contains(&order.read_i16(&raw[DIM..])) {
            order = order.flipped();
        }
        if order.read_i32(&raw[SIZEOF_HDR..]) != HEADER_SIZE as i32 {
            return Err(reject("sizeof_hdr".to_string()));
        }
        let mut dim = [0i16; 8];
        for (i, d) in dim.iter_mut().enumerate() {
            *d = order.read_i16(&raw[DIM + 2 * i..]);
        }
        if !(2..=4).contains(&dim[0]) {
            return Err(reject(format!("{} dimensions", dim[0])));
        }
        Ok(Self { raw, order, dim })
    }

    fn i16_at(&self, offset: usize) -> i16 {
        self.order.read_i16(&self.raw[offset..])
    }

    fn f32_at(&self, offset: usize) -> f64 {
        self.order.read_f32(&self.raw[offset..]) as f64
    }

    fn single_file(&self) -> bool {
        &self.raw[MAGIC..MAGIC + 4] == b"n+1\0"
    }

    fn passthrough_line(&self, name: &str, offset: usize, kind: Field) -> String {
        match kind {
            Field::U8 => format!("{} {}", name, self.raw[offset]),
            Field::I16 => format!("{} {}", name, self.i16_at(offset)),
            Field::F32 => format!("{} {}", name, self.order.read_f32(&self.raw[offset..])),
        }
    }

    /// Fill `meta` from the header.
    fn apply(&self, meta: &mut CommonMetadata) -> Result<()> {
        meta.datatype = type_for_code(self.i16_at(DATATYPE))?;
        meta.dimx = self.dim[1].max(0) as usize;
        meta.dimy = self.dim[2].max(0) as usize;
        meta.dimz = self.dim[3].max(0) as usize;
        meta.dimt = if self.dim[0] >= 4 { self.dim[4].max(0) as usize } else { 1 };
        meta.file_byte_order = self.order;

        meta.scl_slope = self.f32_at(SCL_SLOPE);
        meta.scl_inter = self.f32_at(SCL_INTER);
        meta.scaled = meta.scl_slope.abs() > FLT_MIN;
        if meta.scaled {
            meta.alt_datatype = meta.datatype;
        }

        for i in 0..4 {
            meta.voxsize[i] = self.f32_at(PIXDIM + 4 * (i + 1));
        }
        let units = self.raw[XYZT_UNITS];
        match units & 0x07 {
            UNITS_METER => meta.voxsize[..3].iter_mut().for_each(|v| *v *= 1000.0),
            UNITS_MICRON => meta.voxsize[..3].iter_mut().for_each(|v| *v /= 1000.0),
            _ => {}
        }
        match units & 0x38 {
            UNITS_SEC => meta.voxsize[3] *= 1000.0,
            UNITS_USEC => meta.voxsize[3] /= 1000.0,
            _ => {}
        }
        meta.orient = "RPI".to_string();

        let transform = &mut meta.transform;
        transform.qform_code = self.i16_at(QFORM_CODE);
        transform.sform_code = self.i16_at(SFORM_CODE);
        for i in 0..3 {
            transform.quatern[i] = self.f32_at(QUATERN + 4 * i);
            for j in 0..4 {
                transform.srow[i][j] = self.f32_at(SROW + 16 * i + 4 * j);
            }
        }
        let qoffset = [
            self.f32_at(QOFFSET),
            self.f32_at(QOFFSET + 4),
            self.f32_at(QOFFSET + 8),
        ];
        meta.qoffset = Some(qoffset);
        let corner = if transform.sform_code != 0 {
            [transform.srow[0][3], transform.srow[1][3], transform.srow[2][3]]
        } else {
            qoffset
        };
        meta.origin = [corner[0] as i32, corner[1] as i32, corner[2] as i32];

        for (name, offset, kind) in PASSTHROUGH {
            meta.add_header(self.passthrough_line(name, offset, kind));
        }
        let vox_offset = self.f32_at(VOX_OFFSET).max(0.0) as u64;
        meta.offset = if self.single_file() {
            vox_offset.max(HEADER_SIZE as u64)
        } else {
            vox_offset
        };
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        Ok(())
    }
}

/// Read the header of `meta.filename` (the `.hdr` of a pair) into `meta`,
/// including text extension lines.
fn read_header(meta: &mut CommonMetadata) -> Result<NiftiHeader> {
    let path = super::analyze::header_path(&meta.filename);
    let mut stream = InputStream::open(&path)?;
    let mut raw = vec![0u8; HEADER_SIZE];
    let got = stream.read_up_to(&mut raw)?;
    raw.truncate(got);
    let header = NiftiHeader::parse(raw, &path)?;

    meta.header.clear();
    let vox_offset = header.f32_at(VOX_OFFSET).max(0.0) as u64;
    if vox_offset >= MIN_OFFSET {
        read_extensions(&mut stream, header.order, vox_offset, &mut meta.header)?;
    }
    header.apply(meta)?;
    meta.header_valid = true;
    debug!(
        "{}: nifti {}x{}x{}x{} {} at offset {}",
        meta.filename.display(),
        meta.dimx,
        meta.dimy,
        meta.dimz,
        meta.dimt,
        meta.datatype,
        meta.offset
    );
    Ok(header)
}

/// Walk the extension records after the header, keeping text payloads.
fn read_extensions(
    stream: &mut InputStream,
    order: Endian,
    limit: u64,
    lines: &mut Vec<String>,
) -> Result<()> {
    let mut flag = [0u8; 4];
    if stream.read_up_to(&mut flag)? < 4 || flag[0] == 0 {
        return Ok(());
    }
    let mut record = [0u8; 8];
    while stream.position() + 8 <= limit {
        if stream.read_up_to(&mut record)? < 8 {
            break;
        }
        let esize = order.read_u32(&record[0..]) as u64;
        let ecode = order.read_u32(&record[4..]);
        if (esize == 0 && ecode == 0) || esize < 8 {
            break;
        }
        let payload_len = esize - 8;
        if stream.position() + payload_len > limit {
            break;
        }
        if ecode != ECODE_TEXT {
            stream.skip(payload_len)?;
            continue;
        }
        let mut payload = vec![0u8; payload_len as usize];
        stream.read_full(&mut payload)?;
        let text = String::from_utf8_lossy(&payload);
        lines.extend(
            text.split(['\r', '\n'])
                .map(|l| l.trim_end_matches('\0'))
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );
    }
    Ok(())
}

/// Header bytes and extension block for an image described by `meta`.
fn encode(meta: &CommonMetadata, dim: [i16; 8], units: u8, descrip: &str) -> Vec<u8> {
    let order = meta.file_byte_order;
    let mut raw = vec![0u8; HEADER_SIZE];
    order.write_i32(&mut raw[SIZEOF_HDR..], HEADER_SIZE as i32);
    raw[REGULAR] = b'r';
    for (i, d) in dim.iter().enumerate() {
        order.write_i16(&mut raw[DIM + 2 * i..], *d);
    }
    order.write_i16(&mut raw[DATATYPE..], code_for_type(meta.datatype));
    order.write_i16(&mut raw[BITPIX..], (meta.datatype.size_in_bytes() * 8) as i16);

    let mut pixdim = [-1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    pixdim[1..4].copy_from_slice(&[meta.voxsize[0], meta.voxsize[1], meta.voxsize[2]]);
    pixdim[4] = meta.voxsize[3];
    if dim[0] == 4 && pixdim[4] < FLT_MIN {
        pixdim[4] = 1000.0;
    }
    for (i, p) in pixdim.iter().enumerate() {
        order.write_f32(&mut raw[PIXDIM + 4 * i..], *p as f32);
    }

    let qoffset = match meta.qoffset {
        Some(q) if q.iter().all(|v| v.is_finite()) => q,
        _ => [
            meta.origin[0] as f64,
            meta.origin[1] as f64,
            meta.origin[2] as f64,
        ],
    };
    for (i, q) in qoffset.iter().enumerate() {
        order.write_f32(&mut raw[QOFFSET + 4 * i..], *q as f32);
    }
    let (slope, inter) = if meta.scaled {
        (meta.scl_slope, meta.scl_inter)
    } else {
        (0.0, 0.0)
    };
    order.write_f32(&mut raw[SCL_SLOPE..], slope as f32);
    order.write_f32(&mut raw[SCL_INTER..], inter as f32);
    raw[XYZT_UNITS] = units;

    let transform = &meta.transform;
    order.write_i16(&mut raw[QFORM_CODE..], transform.qform_code);
    order.write_i16(&mut raw[SFORM_CODE..], transform.sform_code);
    for i in 0..3 {
        order.write_f32(&mut raw[QUATERN + 4 * i..], transform.quatern[i] as f32);
        for j in 0..4 {
            order.write_f32(&mut raw[SROW + 16 * i + 4 * j..], transform.srow[i][j] as f32);
        }
    }
    put_fixed_str(&mut raw[DESCRIP..DESCRIP + 80], descrip, 0);
    raw[MAGIC..MAGIC + 4].copy_from_slice(b"n+1\0");

    for line in &meta.header {
        let mut tokens = line.split_whitespace();
        let (Some(keyword), Some(value)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let Some(&(_, offset, kind)) = PASSTHROUGH
            .iter()
            .find(|(name, _, _)| keyword.eq_ignore_ascii_case(name))
        else {
            continue;
        };
        let number = value.parse::<f64>().unwrap_or(0.0);
        match kind {
            Field::U8 => raw[offset] = number as u8,
            Field::I16 => order.write_i16(&mut raw[offset..], number as i16),
            Field::F32 => order.write_f32(&mut raw[offset..], number as f32),
        }
    }

    let text: String = meta
        .header
        .iter()
        .filter(|l| !is_passthrough(l))
        .map(|l| format!("{}\n", l))
        .collect();
    if text.is_empty() {
        raw.extend_from_slice(&[0, 0, 0, 0]);
    } else {
        let esize = (8 + text.len()).div_ceil(16) * 16;
        raw.extend_from_slice(&[1, 0, 0, 0]);
        let mut record = vec![0u8; esize];
        order.write_u32(&mut record[0..], esize as u32);
        order.write_u32(&mut record[4..], ECODE_TEXT);
        record[8..8 + text.len()].copy_from_slice(text.as_bytes());
        raw.extend_from_slice(&record);
    }
    let len = raw.len() as f32;
    order.write_f32(&mut raw[VOX_OFFSET..], len);
    raw
}

fn with_header(series: &VolumeSeries4D) -> Result<CommonMetadata> {
    let mut meta = series.meta.clone();
    if !meta.header_valid {
        read_header(&mut meta)?;
    }
    Ok(meta)
}

pub struct NiftiCodec;

impl Codec for NiftiCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, _prefix: &[u8], path: &Path, dims: Dimensionality) -> Sniff {
        if !matches!(
            format_extension(path).as_deref(),
            Some("nii") | Some("img") | Some("hdr") | Some("voi")
        ) {
            return Sniff::No;
        }
        let mut meta = CommonMetadata::new();
        meta.filename = path.to_path_buf();
        let header = match read_header(&mut meta) {
            Ok(header) => header,
            Err(_) => return Sniff::No,
        };
        match (dims, header.dim[0]) {
            (Dimensionality::Volume, 3) | (Dimensionality::Series, 4) => Sniff::Yes,
            _ => Sniff::No,
        }
    }

    fn read_volume_header(&self, volume: &mut Volume3D) -> Result<()> {
        read_header(&mut volume.meta)?;
        Ok(())
    }

    fn read_volume_data(&self, volume: &mut Volume3D) -> Result<()> {
        if !volume.meta.header_valid {
            read_header(&mut volume.meta)?;
        }
        let (dimx, dimy, dimz) = volume.dims();
        if dimx < 1 || dimy < 1 || dimz < 1 {
            return Err(VoxError::CorruptHeader(format!(
                "{}: bad dimensions {}x{}x{}",
                volume.meta.filename.display(),
                dimx,
                dimy,
                dimz
            )));
        }
        let datatype = volume.datatype();
        volume.allocate(dimx, dimy, dimz, datatype)?;
        let mut stream = InputStream::open(image_path(&volume.meta.filename))?;
        stream.seek_to(volume.meta.offset)?;
        stream.read_full(volume.data_mut())?;
        if !volume.meta.file_byte_order.is_native() {
            volume.byte_swap();
        }
        volume.apply_scale()?;
        volume.meta.data_valid = true;
        Ok(())
    }

    fn write_volume(&self, volume: &Volume3D) -> Result<()> {
        let (x, y, z) = volume.dims();
        let dim = header_dims(&[x, y, z], 1, &volume.meta.filename)?;
        let disk = volume.disk_image(volume.meta.file_byte_order)?;
        let header = encode(&disk.meta, dim, UNITS_MM, "NIfTI-1 3D file");
        write_atomic(&volume.meta.filename, |file| {
            file.write_bytes(&header)?;
            file.write_bytes(disk.data())
        })
    }

    fn read_series_header(&self, series: &mut VolumeSeries4D) -> Result<()> {
        read_header(&mut series.meta)?;
        Ok(())
    }

    fn read_series_data(
        &self,
        series: &mut VolumeSeries4D,
        range: Option<Range<usize>>,
    ) -> Result<()> {
        if !series.meta.header_valid {
            read_header(&mut series.meta)?;
        }
        let (dimx, dimy, dimz, dimt) = series.dims();
        if dimx < 1 || dimy < 1 || dimz < 1 || dimt < 1 {
            return Err(VoxError::CorruptHeader(format!(
                "{}: bad dimensions {}x{}x{}x{}",
                series.meta.filename.display(),
                dimx,
                dimy,
                dimz,
                dimt
            )));
        }
        let range = range.unwrap_or(0..dimt);
        if range.end > dimt || range.start > range.end {
            return Err(VoxError::InvalidDimensions(format!(
                "frames {:?} of {}",
                range, dimt
            )));
        }
        read_dense_frames(series, range)?;
        series.apply_scale()?;
        series.remask();
        series.meta.data_valid = true;
        Ok(())
    }

    fn write_series(&self, series: &VolumeSeries4D) -> Result<()> {
        let (x, y, z, t) = series.dims();
        let dim = header_dims(&[x, y, z, t], 1, &series.meta.filename)?;
        let disk = series.disk_image(series.meta.file_byte_order)?;
        let header = encode(&disk.meta, dim, UNITS_MM | UNITS_MSEC, "NIfTI-1 4D file");
        let mut file = AtomicFile::create(&series.meta.filename)?;
        file.write_bytes(&header)?;
        for frame in 0..t {
            file.write_bytes(disk.get_frame(frame)?.data())?;
        }
        file.commit()
    }

    fn read_frame(&self, series: &VolumeSeries4D, t: usize) -> Result<Volume3D> {
        read_dense_frame(&with_header(series)?, t)
    }

    fn read_timeseries(
        &self,
        series: &VolumeSeries4D,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<Vec<f64>> {
        let meta = with_header(series)?;
        if x >= meta.dimx || y >= meta.dimy || z >= meta.dimz {
            return Err(VoxError::InvalidDimensions(format!(
                "voxel ({},{},{}) outside {}x{}x{}",
                x, y, z, meta.dimx, meta.dimy, meta.dimz
            )));
        }
        let width = meta.datatype.size_in_bytes();
        let index = meta.dimx * (meta.dimy * z + y) + x;
        let stride = ((meta.voxels() - 1) * width) as u64;
        let mut stream = InputStream::open(image_path(&meta.filename))?;
        stream.seek_to(meta.offset + (index * width) as u64)?;
        let mut raw = vec![0u8; meta.dimt * width];
        for t in 0..meta.dimt {
            stream.read_full(&mut raw[t * width..(t + 1) * width])?;
            if t + 1 < meta.dimt {
                stream.skip(stride)?;
            }
        }
        if !meta.file_byte_order.is_native() {
            swap_in_place(&mut raw, width, meta.dimt);
        }
        let mut values: Vec<f64> = (0..meta.dimt)
            .map(|t| get_value(&raw, meta.datatype, t))
            .collect();
        if meta.scaled {
            for v in values.iter_mut() {
                *v = *v * meta.scl_slope + meta.scl_inter;
            }
        }
        Ok(values)
    }
}
