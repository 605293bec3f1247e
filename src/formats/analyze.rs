//! Analyze 7.5 image pairs
//!
//! A 348-byte binary header lives in `name.hdr` and the raw voxels in
//! `name.img`. There is no byte-order field: the order is whichever makes
//! `dim[0]` a plausible dimension count.

use super::FORMAT_VERSION;
use crate::compression::InputStream;
use crate::endian::Endian;
use crate::error::{Result, VoxError};
use crate::io::AtomicFile;
use crate::metadata::{CommonMetadata, FLT_MIN};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::series::VolumeSeries4D;
use crate::types::DataType;
use crate::utils::{format_extension, get_fixed_str, put_fixed_str, swap_extension};
use crate::volume::{check_dims, Volume3D};
use log::debug;
use std::ops::Range;
use std::path::{Path, PathBuf};

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "Analyze 7.5",
    extensions: &["img", "hdr"],
    signature: "img",
    aliases: &["img3d", "img4d"],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::READ_WRITE,
    series: Capabilities {
        read_frame: true,
        ..Capabilities::READ
    },
};

pub(crate) const HEADER_SIZE: usize = 348;

const SIZEOF_HDR: usize = 0;
const EXTENTS: usize = 32;
const REGULAR: usize = 38;
const DIM: usize = 40;
const DATATYPE: usize = 70;
const BITPIX: usize = 72;
const PIXDIM: usize = 76;
const VOX_OFFSET: usize = 108;
const FUNUSED1: usize = 112;
const DESCRIP: usize = 148;
const AUX_FILE: usize = 228;
const ORIENT: usize = 252;
const ORIGIN: usize = 253;

const ORIENTATIONS: [&str; 6] = ["LPI", "LIP", "AIL", "RPI", "RIP", "AIR"];

/// The fields of an Analyze header this crate uses
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnalyzeHeader {
    pub order: Endian,
    pub dim: [i16; 8],
    pub datatype: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub funused1: f32,
    pub orient: u8,
    pub origin: [i16; 3],
    pub descrip: String,
    /// NIfTI magic at byte 344; such headers belong to the NIfTI codec
    pub nifti_magic: bool,
}

impl AnalyzeHeader {
    /// Decode and sanity-check a raw header. Anything implausible is
    /// `NotThisFormat`.
    pub fn parse(raw: &[u8], path: &Path) -> Result<Self> {
        let reject = |why: &str| {
            VoxError::NotThisFormat(format!("{}: not an Analyze header ({})", path.display(), why))
        };
        if raw.len() < HEADER_SIZE {
            return Err(reject("short header"));
        }
        let mut order = Endian::native();
        let dim0 = order.read_i16(&raw[DIM..]);
        if !(0..=7).contains(&dim0) {
            order = order.flipped();
        }
        let mut dim = [0i16; 8];
        for (i, d) in dim.iter_mut().enumerate() {
            *d = order.read_i16(&raw[DIM + 2 * i..]);
        }
        if !(0..=7).contains(&dim[0]) {
            return Err(reject("dimension count"));
        }
        if dim[0] != 3 && dim[0] != 4 && dim[1..4].iter().any(|&d| d < 2) {
            return Err(reject("dimensions"));
        }
        let datatype = order.read_i16(&raw[DATATYPE..]);
        if datatype & 94 == 0 {
            return Err(reject("datatype"));
        }
        let mut pixdim = [0f32; 8];
        for (i, p) in pixdim.iter_mut().enumerate() {
            *p = order.read_f32(&raw[PIXDIM + 4 * i..]);
        }
        let mut origin = [0i16; 3];
        for (i, o) in origin.iter_mut().enumerate() {
            *o = order.read_i16(&raw[ORIGIN + 2 * i..]);
        }
        Ok(Self {
            order,
            dim,
            datatype,
            pixdim,
            vox_offset: order.read_f32(&raw[VOX_OFFSET..]),
            funused1: order.read_f32(&raw[FUNUSED1..]),
            orient: raw[ORIENT],
            origin,
            descrip: get_fixed_str(&raw[DESCRIP..DESCRIP + 80]),
            nifti_magic: is_nifti_magic(&raw[344..348]),
        })
    }

    /// Read the header that goes with `path` (`.img` names read `.hdr`).
    pub fn read(path: &Path) -> Result<Self> {
        let hdr = header_path(path);
        let mut stream = InputStream::open(&hdr)?;
        let mut raw = vec![0u8; HEADER_SIZE];
        let got = stream.read_up_to(&mut raw)?;
        raw.truncate(got);
        Self::parse(&raw, &hdr)
    }

    pub fn element_type(&self) -> Result<DataType> {
        type_for_code(self.datatype)
    }

    fn orientation(&self) -> &'static str {
        ORIENTATIONS.get(self.orient as usize).copied().unwrap_or("XXX")
    }

    /// `funused1` doubles as the slope; tiny values mean unset.
    fn slope(&self) -> f64 {
        let slope = self.funused1 as f64;
        if slope < FLT_MIN {
            1.0
        } else {
            slope
        }
    }

    /// Fill the shared metadata from this header.
    fn apply(&self, meta: &mut CommonMetadata) -> Result<()> {
        meta.datatype = self.element_type()?;
        meta.dimx = self.dim[1].max(0) as usize;
        meta.dimy = self.dim[2].max(0) as usize;
        meta.dimz = self.dim[3].max(0) as usize;
        meta.dimt = if self.dim[0] >= 4 { self.dim[4].max(1) as usize } else { 1 };
        for i in 0..3 {
            meta.voxsize[i] = self.pixdim[i + 1] as f64;
            meta.origin[i] = self.origin[i] as i32 - 1;
        }
        meta.orient = self.orientation().to_string();
        let slope = self.slope();
        if (slope - 1.0).abs() > FLT_MIN {
            meta.scaled = true;
            meta.scl_slope = slope;
            meta.scl_inter = 0.0;
            meta.alt_datatype = meta.datatype;
        } else {
            meta.clear_scale();
        }
        meta.file_byte_order = self.order;
        meta.offset = self.vox_offset.max(0.0) as u64;
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        Ok(())
    }
}

pub(crate) fn is_nifti_magic(magic: &[u8]) -> bool {
    magic == b"n+1\0" || magic == b"ni1\0"
}

pub(crate) fn type_for_code(code: i16) -> Result<DataType> {
    match code {
        2 => Ok(DataType::Byte),
        4 => Ok(DataType::Int16),
        8 => Ok(DataType::Int32),
        16 => Ok(DataType::Float32),
        64 => Ok(DataType::Float64),
        other => Err(VoxError::UnsupportedType(format!("Analyze datatype {}", other))),
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

/// The `.hdr` half of a pair
pub(crate) fn header_path(path: &Path) -> PathBuf {
    match format_extension(path).as_deref() {
        Some("img") => swap_extension(path, "hdr"),
        _ => path.to_path_buf(),
    }
}

/// The `.img` half of a pair
pub(crate) fn image_path(path: &Path) -> PathBuf {
    match format_extension(path).as_deref() {
        Some("hdr") => swap_extension(path, "img"),
        _ => path.to_path_buf(),
    }
}

/// Encode a header for `meta` with explicit `dim` values, in `order`.
/// Header `dim` array for `extents`, padded with `fill`.
///
/// The fields are 16 bit, so larger extents cannot be stored.
pub(crate) fn header_dims(extents: &[usize], fill: i16, path: &Path) -> Result<[i16; 8]> {
    let mut dim = [fill; 8];
    dim[0] = extents.len() as i16;
    for (slot, &extent) in dim[1..].iter_mut().zip(extents) {
        *slot = i16::try_from(extent).map_err(|_| {
            VoxError::InvalidDimensions(format!(
                "{}: extent {} does not fit a 16-bit header field",
                path.display(),
                extent
            ))
        })?;
    }
    Ok(dim)
}

fn encode_header(meta: &CommonMetadata, dim: [i16; 8], order: Endian) -> Vec<u8> {
    let mut raw = vec![0u8; HEADER_SIZE];
    order.write_i32(&mut raw[SIZEOF_HDR..], HEADER_SIZE as i32);
    order.write_i32(&mut raw[EXTENTS..], 16384);
    raw[REGULAR] = b'r';
    for (i, d) in dim.iter().enumerate() {
        order.write_i16(&mut raw[DIM + 2 * i..], *d);
    }
    order.write_i16(&mut raw[DATATYPE..], code_for_type(meta.datatype));
    order.write_i16(&mut raw[BITPIX..], (meta.datatype.size_in_bytes() * 8) as i16);
    for i in 0..3 {
        order.write_f32(&mut raw[PIXDIM + 4 * (i + 1)..], meta.voxsize[i] as f32);
    }
    order.write_f32(&mut raw[VOX_OFFSET..], 0.0);
    let slope = if meta.scaled { meta.scl_slope } else { 1.0 };
    order.write_f32(&mut raw[FUNUSED1..], slope as f32);
    put_fixed_str(&mut raw[DESCRIP..DESCRIP + 80], "", b' ');
    put_fixed_str(&mut raw[AUX_FILE..AUX_FILE + 24], "", b' ');
    // SPM ignores orient; always 0
    raw[ORIENT] = 0;
    for i in 0..3 {
        order.write_i16(&mut raw[ORIGIN + 2 * i..], (meta.origin[i] + 1) as i16);
    }
    raw
}

/// Read frames `range` of a dense 4D file into `series`, one frame at a
/// time. Each frame is swapped before it is stored.
pub(crate) fn read_dense_frames(series: &mut VolumeSeries4D, range: Range<usize>) -> Result<()> {
    let (dimx, dimy, dimz, _) = series.dims();
    let datatype = series.datatype();
    let frame_bytes = check_dims(&[dimx, dimy, dimz], datatype.size_in_bytes())?;
    let swap = !series.meta.file_byte_order.is_native();

    let mut stream = InputStream::open(image_path(&series.meta.filename))?;
    stream.seek_to(series.meta.offset + (range.start * frame_bytes) as u64)?;
    series.allocate(dimx, dimy, dimz, range.len(), datatype)?;
    let mut frame = Volume3D::with_dims(dimx, dimy, dimz, datatype)?;
    for t in 0..range.len() {
        stream.read_full(frame.data_mut())?;
        if swap {
            frame.byte_swap();
        }
        series.set_frame(t, &frame)?;
    }
    Ok(())
}

/// Time point `t` of a dense 4D file described by `meta`, scaled.
pub(crate) fn read_dense_frame(meta: &CommonMetadata, t: usize) -> Result<Volume3D> {
    if t >= meta.dimt {
        return Err(VoxError::InvalidDimensions(format!(
            "frame {} of {}",
            t, meta.dimt
        )));
    }
    let mut frame = Volume3D::new();
    frame.meta.copy_header_from(meta);
    frame.meta.filename = meta.filename.clone();
    frame.meta.file_format = meta.file_format.clone();
    frame.meta.subvolume = None;
    frame.allocate(meta.dimx, meta.dimy, meta.dimz, meta.datatype)?;
    let frame_bytes = frame.data().len() as u64;
    let mut stream = InputStream::open(image_path(&meta.filename))?;
    stream.seek_to(meta.offset + t as u64 * frame_bytes)?;
    stream.read_full(frame.data_mut())?;
    if !meta.file_byte_order.is_native() {
        frame.byte_swap();
    }
    frame.apply_scale()?;
    Ok(frame)
}

pub struct AnalyzeCodec;

impl Codec for AnalyzeCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, _prefix: &[u8], path: &Path, dims: Dimensionality) -> Sniff {
        // The prefix belongs to whichever half of the pair was named, so
        // the header is always read from the .hdr file.
        if !matches!(format_extension(path).as_deref(), Some("img") | Some("hdr")) {
            return Sniff::No;
        }
        let header = match AnalyzeHeader::read(path) {
            Ok(header) if !header.nifti_magic => header,
            _ => return Sniff::No,
        };
        let is_3d = header.dim[0] == 3 || (header.dim[0] == 4 && header.dim[4] == 1);
        let is_4d = header.dim[0] == 4 && header.dim[4] > 1;
        match dims {
            Dimensionality::Volume if is_3d => Sniff::Yes,
            Dimensionality::Series if is_4d => Sniff::Yes,
            _ => Sniff::No,
        }
    }

    fn read_volume_header(&self, volume: &mut Volume3D) -> Result<()> {
        let header = AnalyzeHeader::read(&volume.meta.filename)?;
        header.apply(&mut volume.meta)?;
        volume.meta.dimt = 1;
        volume.meta.header_valid = true;
        debug!(
            "{}: analyze {}x{}x{} {} ({})",
            volume.meta.filename.display(),
            volume.meta.dimx,
            volume.meta.dimy,
            volume.meta.dimz,
            volume.meta.datatype,
            header.order
        );
        Ok(())
    }

    fn read_volume_data(&self, volume: &mut Volume3D) -> Result<()> {
        if !volume.meta.header_valid {
            self.read_volume_header(volume)?;
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
        let order = volume.meta.file_byte_order;
        let (x, y, z) = volume.dims();
        let mut dim = header_dims(&[x, y, z], 0, &volume.meta.filename)?;
        dim[4] = 1;
        let disk = volume.disk_image(order)?;
        let meta = &disk.meta;
        let header = encode_header(meta, dim, order);

        let target = &volume.meta.filename;
        let mut img = AtomicFile::create(image_path(target))?;
        img.write_bytes(disk.data())?;
        let mut hdr = AtomicFile::create(header_path(target))?;
        hdr.write_bytes(&header)?;
        img.commit()?;
        hdr.commit()
    }

    fn read_series_header(&self, series: &mut VolumeSeries4D) -> Result<()> {
        let header = AnalyzeHeader::read(&series.meta.filename)?;
        header.apply(&mut series.meta)?;
        series.meta.header_valid = true;
        debug!(
            "{}: analyze {}x{}x{}x{} {}",
            series.meta.filename.display(),
            series.meta.dimx,
            series.meta.dimy,
            series.meta.dimz,
            series.meta.dimt,
            series.meta.datatype
        );
        Ok(())
    }

    fn read_series_data(
        &self,
        series: &mut VolumeSeries4D,
        range: Option<Range<usize>>,
    ) -> Result<()> {
        if !series.meta.header_valid {
            self.read_series_header(series)?;
        }
        let dimt = series.meta.dimt;
        let range = range.unwrap_or(0..dimt);
        if range.end > dimt || range.start > range.end {
            return Err(VoxError::InvalidDimensions(format!(
                "frames {:?} of {}",
                range, dimt
            )));
        }
        read_dense_frames(series, range)?;
        series.apply_scale()?;
        series.meta.data_valid = true;
        Ok(())
    }

    fn read_frame(&self, series: &VolumeSeries4D, t: usize) -> Result<Volume3D> {
        if series.meta.header_valid {
            return read_dense_frame(&series.meta, t);
        }
        let mut meta = series.meta.clone();
        AnalyzeHeader::read(&meta.filename)?.apply(&mut meta)?;
        read_dense_frame(&meta, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::read_prefix;
    use crate::registry::PREFIX_LEN;
    use std::fs;
    use tempfile::TempDir;

    fn read_volume(path: &Path) -> Result<Volume3D> {
        let mut vol = Volume3D::new();
        vol.meta.filename = path.to_path_buf();
        AnalyzeCodec.read_volume_data(&mut vol)?;
        Ok(vol)
    }

    /// Hand-built pair: header in `order`, float32 voxels `i * 0.5`.
    fn write_pair(dir: &TempDir, name: &str, dim: [i16; 8], order: Endian) -> PathBuf {
        let mut meta = CommonMetadata::new();
        meta.datatype = DataType::Float32;
        meta.voxsize = [2.0, 2.0, 3.0, 0.0];
        meta.origin = [45, 54, 30];
        let header = encode_header(&meta, dim, order);
        let count: usize = dim[1..=dim[0] as usize].iter().map(|&d| d as usize).product();
        let mut data = vec![0u8; count * 4];
        for i in 0..count {
            order.write_f32(&mut data[i * 4..], i as f32 * 0.5);
        }
        let hdr = dir.path().join(format!("{}.hdr", name));
        fs::write(&hdr, header).unwrap();
        fs::write(dir.path().join(format!("{}.img", name)), data).unwrap();
        dir.path().join(format!("{}.img", name))
    }

    #[test]
    fn test_big_endian_pair() {
        let temp_dir = TempDir::new().unwrap();
        let img = write_pair(&temp_dir, "brain", [3, 10, 10, 10, 1, 0, 0, 0], Endian::Big);

        let vol = read_volume(&img).unwrap();
        assert_eq!(vol.dims(), (10, 10, 10));
        assert_eq!(vol.datatype(), DataType::Float32);
        assert_eq!(vol.meta.file_byte_order, Endian::Big);
        assert_eq!(vol.meta.origin, [45, 54, 30]);
        assert_eq!(vol.meta.voxsize[..3], [2.0, 2.0, 3.0]);
        assert_eq!(vol.meta.orient, "LPI");
        assert!(!vol.meta.scaled);
        assert_eq!(vol.get(3, 0, 0), 1.5);
        assert_eq!(vol.get_index(999), 499.5);

        // same result through the .hdr name
        let via_hdr = read_volume(&img.with_extension("hdr")).unwrap();
        assert_eq!(via_hdr.data(), vol.data());
    }

    #[test]
    fn test_round_trip_both_orders() {
        let temp_dir = TempDir::new().unwrap();
        for order in [Endian::Big, Endian::Little] {
            for datatype in DataType::ALL {
                let mut vol = Volume3D::with_dims(5, 4, 3, datatype).unwrap();
                for i in 0..vol.voxels() {
                    vol.set_index(i, (i % 200) as f64);
                }
                vol.meta.voxsize = [1.0, 1.5, 2.0, 1000.0];
                vol.meta.origin = [2, 1, 0];
                vol.meta.file_byte_order = order;
                let path = temp_dir.path().join(format!("rt_{}_{}.img", datatype, order));
                vol.meta.filename = path.clone();
                AnalyzeCodec.write_volume(&vol).unwrap();

                let raw = fs::read(path.with_extension("hdr")).unwrap();
                assert_eq!(raw.len(), HEADER_SIZE);
                assert_eq!(order.read_i32(&raw), 348);
                assert_eq!(raw[REGULAR], b'r');
                assert_eq!(raw[DESCRIP], b' ');

                let back = read_volume(&path).unwrap();
                assert_eq!(back.meta.file_byte_order, order);
                assert_eq!(back.datatype(), datatype);
                assert_eq!(back.meta.origin, [2, 1, 0]);
                assert_eq!(back.data(), vol.data());
            }
        }
    }

    #[test]
    fn test_scaled_write_uses_funused1() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = Volume3D::with_dims(2, 2, 2, DataType::Int16).unwrap();
        for i in 0..8 {
            vol.set_index(i, i as f64);
        }
        vol.meta.scaled = true;
        vol.meta.scl_slope = 0.25;
        vol.meta.alt_datatype = DataType::Int16;
        vol.apply_scale().unwrap();
        let path = temp_dir.path().join("scaled.img");
        vol.meta.filename = path.clone();
        AnalyzeCodec.write_volume(&vol).unwrap();

        let header = AnalyzeHeader::read(&path).unwrap();
        assert_eq!(header.funused1, 0.25);
        assert_eq!(header.datatype, 4);

        let back = read_volume(&path).unwrap();
        assert!(back.meta.scaled);
        assert_eq!(back.datatype(), DataType::Float32);
        assert_eq!(back.get_index(7), 1.75);
    }

    #[test]
    fn test_header_checks() {
        let path = Path::new("x.hdr");
        let mut meta = CommonMetadata::new();
        meta.datatype = DataType::Int16;
        let good = encode_header(&meta, [3, 4, 4, 4, 1, 0, 0, 0], Endian::Little);
        assert!(AnalyzeHeader::parse(&good, path).is_ok());
        assert!(AnalyzeHeader::parse(&good[..100], path).unwrap_err().is_not_this_format());

        let mut flat = good.clone();
        Endian::Little.write_i16(&mut flat[DIM..], 2);
        Endian::Little.write_i16(&mut flat[DIM + 6..], 1);
        assert!(AnalyzeHeader::parse(&flat, path).unwrap_err().is_not_this_format());

        let mut rgb = good.clone();
        Endian::Little.write_i16(&mut rgb[DATATYPE..], 128);
        assert!(AnalyzeHeader::parse(&rgb, path).unwrap_err().is_not_this_format());

        let mut complex = good.clone();
        Endian::Little.write_i16(&mut complex[DATATYPE..], 32);
        assert!(AnalyzeHeader::parse(&complex, path).unwrap_err().is_not_this_format());

        let mut mixed = good.clone();
        Endian::Little.write_i16(&mut mixed[DATATYPE..], 6);
        let header = AnalyzeHeader::parse(&mixed, path).unwrap();
        assert!(matches!(header.element_type(), Err(VoxError::UnsupportedType(_))));

        let mut odd = good;
        odd[ORIENT] = 9;
        assert_eq!(AnalyzeHeader::parse(&odd, path).unwrap().orientation(), "XXX");
        odd[ORIENT] = 5;
        assert_eq!(AnalyzeHeader::parse(&odd, path).unwrap().orientation(), "AIR");
    }

    #[test]
    fn test_sniff_by_dimensionality() {
        let temp_dir = TempDir::new().unwrap();
        let vol = write_pair(&temp_dir, "v", [3, 8, 8, 8, 1, 0, 0, 0], Endian::Little);
        let series = write_pair(&temp_dir, "s", [4, 8, 8, 8, 3, 0, 0, 0], Endian::Big);

        let hdr = vol.with_extension("hdr");
        let prefix = read_prefix(&hdr, PREFIX_LEN);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &hdr, Dimensionality::Volume), Sniff::Yes);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &hdr, Dimensionality::Series), Sniff::No);

        let prefix = read_prefix(&series, PREFIX_LEN);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &series, Dimensionality::Series), Sniff::Yes);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &series, Dimensionality::Volume), Sniff::No);

        let renamed = temp_dir.path().join("v.dat");
        fs::copy(&hdr, &renamed).unwrap();
        let prefix = read_prefix(&renamed, PREFIX_LEN);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &renamed, Dimensionality::Volume), Sniff::No);

        let mut nifti = fs::read(&hdr).unwrap();
        nifti[344..348].copy_from_slice(b"ni1\0");
        fs::write(&hdr, &nifti).unwrap();
        assert_eq!(AnalyzeCodec.sniff(&nifti, &hdr, Dimensionality::Volume), Sniff::No);
        let img = vol.with_extension("img");
        let prefix = read_prefix(&img, PREFIX_LEN);
        assert_eq!(AnalyzeCodec.sniff(&prefix, &img, Dimensionality::Volume), Sniff::No);
    }

    #[test]
    fn test_series_read() {
        let temp_dir = TempDir::new().unwrap();
        let img = write_pair(&temp_dir, "run", [4, 3, 2, 2, 4, 0, 0, 0], Endian::Big);

        let mut series = VolumeSeries4D::new();
        series.meta.filename = img.clone();
        AnalyzeCodec.read_series_data(&mut series, None).unwrap();
        assert_eq!(series.dims(), (3, 2, 2, 4));
        // voxel 0 of frame 0 is the only zero in the file
        assert_eq!(series.get_timeseries(0, 0, 0), vec![0.0, 6.0, 12.0, 18.0]);
        assert_eq!(series.get(1, 0, 0, 2), 12.5);
        assert_eq!(series.realvoxels(), 12);

        let mut partial = VolumeSeries4D::new();
        partial.meta.filename = img.clone();
        AnalyzeCodec.read_series_data(&mut partial, Some(2..4)).unwrap();
        assert_eq!(partial.dims(), (3, 2, 2, 2));
        assert_eq!(partial.get(0, 0, 0, 0), 12.0);

        let frame = AnalyzeCodec.read_frame(&series, 3).unwrap();
        assert_eq!(frame.dims(), (3, 2, 2));
        assert_eq!(frame.get_index(11), 23.5);
        assert!(AnalyzeCodec.read_frame(&series, 4).is_err());
    }

    #[test]
    fn test_extent_too_wide_for_header() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = Volume3D::with_dims(40_000, 1, 1, DataType::Byte).unwrap();
        vol.meta.filename = temp_dir.path().join("wide.img");
        let err = AnalyzeCodec.write_volume(&vol).unwrap_err();
        assert!(matches!(err, VoxError::InvalidDimensions(_)));
        assert!(!temp_dir.path().join("wide.hdr").exists());
        assert!(!temp_dir.path().join("wide.img").exists());

        let dim = header_dims(&[32_767, 2, 3], 0, Path::new("ok.img")).unwrap();
        assert_eq!(dim, [3, 32_767, 2, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn test_series_write_unsupported() {
        let series = VolumeSeries4D::with_dims(2, 2, 2, 2, DataType::Byte).unwrap();
        assert!(matches!(
            AnalyzeCodec.write_series(&series),
            Err(VoxError::Unsupported(_))
        ));
    }
}
