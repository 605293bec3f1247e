//! TES1, the native sparse 4D format
//!
//! After the text header comes the presence mask (one byte per spatial
//! voxel), then the full time course of each present voxel in mask order.
//! Data is always written big-endian.

use super::cub::has_vb98_magic;
use super::{
    dim_arg, float_arg, format_origin, format_trailer, format_voxsizes, int_arg,
    read_text_header, split_keyword, FORMAT_VERSION,
};
use crate::compression::InputStream;
use crate::endian::{swap_in_place, Endian};
use crate::error::{Result, VoxError};
use crate::io::write_atomic;
use crate::metadata::{MaskSpec, FLT_MIN};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::series::VolumeSeries4D;
use crate::types::{get_value, DataType};
use crate::volume::{check_dims, Volume3D};
use log::debug;
use std::borrow::Cow;
use std::ops::Range;
use std::path::Path;

pub(crate) const MAGIC: &[u8] = b"VB98\nTES1\n";

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "VoxBo TES1",
    extensions: &["tes"],
    signature: "tes1",
    aliases: &[],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::NONE,
    series: Capabilities::READ_WRITE.with_frames(),
};

pub struct TesCodec;

/// Scaled when the slope is neither 0 nor 1, or is 1 with an intercept.
fn is_scaled(slope: f64, inter: f64) -> bool {
    (slope.abs() > FLT_MIN && (slope - 1.0).abs() > FLT_MIN)
        || ((slope - 1.0).abs() < FLT_MIN && inter.abs() > FLT_MIN)
}

/// The series with its header read, reading it first if needed.
fn with_header<'a>(codec: &TesCodec, series: &'a VolumeSeries4D) -> Result<Cow<'a, VolumeSeries4D>> {
    if series.meta.header_valid {
        return Ok(Cow::Borrowed(series));
    }
    let mut owned = series.clone();
    codec.read_series_header(&mut owned)?;
    Ok(Cow::Owned(owned))
}

/// Open the file and read the presence mask, leaving the stream at the
/// first time course.
fn open_mask(series: &VolumeSeries4D) -> Result<(InputStream, Vec<u8>)> {
    let voxels = series.meta.voxels();
    let mut stream = InputStream::open(&series.meta.filename)?;
    let start = series.meta.offset.checked_sub(voxels as u64).ok_or_else(|| {
        VoxError::CorruptHeader(format!("data offset {} inside the mask", series.meta.offset))
    })?;
    stream.seek_to(start)?;
    let mut mask = vec![0u8; voxels];
    stream.read_full(&mut mask)?;
    Ok((stream, mask))
}

impl Codec for TesCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, prefix: &[u8], _path: &Path, _dims: Dimensionality) -> Sniff {
        if has_vb98_magic(prefix, "TES1") {
            Sniff::Yes
        } else {
            Sniff::No
        }
    }

    fn read_series_header(&self, series: &mut VolumeSeries4D) -> Result<()> {
        let meta = &mut series.meta;
        meta.header_valid = false;
        let mut stream = InputStream::open(&meta.filename)?;
        let lines = read_text_header(&mut stream, MAGIC)?;
        meta.header.clear();
        meta.maskspecs.clear();
        let mut dtype = None;
        for line in &lines {
            let (keyword, args) = split_keyword(line);
            match keyword.as_str() {
                "voxdims(txyz)" if args.len() > 3 => {
                    meta.dimt = dim_arg(&args, 0);
                    meta.dimx = dim_arg(&args, 1);
                    meta.dimy = dim_arg(&args, 2);
                    meta.dimz = dim_arg(&args, 3);
                }
                "datatype" if !args.is_empty() => dtype = Some(DataType::parse_name(args[0])),
                "voxsizes(xyz)" if args.len() > 2 => {
                    meta.voxsize[0] = float_arg(&args, 0);
                    meta.voxsize[1] = float_arg(&args, 1);
                    meta.voxsize[2] = float_arg(&args, 2);
                }
                "tr(msecs)" if !args.is_empty() => meta.voxsize[3] = float_arg(&args, 0),
                "origin(xyz)" if args.len() > 2 => {
                    meta.origin = [
                        int_arg(&args, 0) as i32,
                        int_arg(&args, 1) as i32,
                        int_arg(&args, 2) as i32,
                    ];
                }
                "byteorder" if !args.is_empty() => {
                    if args[0].eq_ignore_ascii_case("msbfirst") {
                        meta.file_byte_order = Endian::Big;
                    } else if args[0].eq_ignore_ascii_case("lsbfirst") {
                        meta.file_byte_order = Endian::Little;
                    }
                }
                "orientation" if !args.is_empty() => meta.orient = args[0].to_string(),
                "scl_slope" if !args.is_empty() => meta.scl_slope = float_arg(&args, 0),
                "scl_inter" if !args.is_empty() => meta.scl_inter = float_arg(&args, 0),
                "vb_maskspec" if args.len() > 4 => {
                    let channel = |i: usize| int_arg(&args, i).clamp(0, 255) as u8;
                    meta.add_maskspec(
                        int_arg(&args, 0) as i32,
                        MaskSpec::new((channel(1), channel(2), channel(3)), args[4..].join(" ")),
                    );
                }
                _ => meta.add_header(line.as_str()),
            }
        }
        if meta.dimt == 0 || meta.dimx == 0 || meta.dimy == 0 || meta.dimz == 0 {
            return Err(VoxError::CorruptHeader(format!(
                "{}: zero extent in {}x{}x{}x{}",
                meta.filename.display(),
                meta.dimx,
                meta.dimy,
                meta.dimz,
                meta.dimt
            )));
        }
        meta.datatype = dtype.unwrap_or(DataType::Byte);
        if is_scaled(meta.scl_slope, meta.scl_inter) {
            meta.scaled = true;
            meta.alt_datatype = meta.datatype;
        }
        check_dims(&[meta.dimx, meta.dimy, meta.dimz], 1)?;
        check_dims(&[meta.dimt], meta.datatype.size_in_bytes())?;

        let mut mask = vec![0u8; meta.voxels()];
        stream.read_full(&mut mask)?;
        meta.offset = stream.position();
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        meta.header_valid = true;
        debug!(
            "{}: tes1 {}x{}x{}x{}, {} voxels with data",
            meta.filename.display(),
            meta.dimx,
            meta.dimy,
            meta.dimz,
            meta.dimt,
            mask.iter().filter(|&&m| m != 0).count()
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
        let width = series.datatype().size_in_bytes() as u64;
        let count = range.end - range.start;
        let skip_before = range.start as u64 * width;
        let skip_after = (dimt - range.end) as u64 * width;

        let (mut stream, mask) = open_mask(series)?;
        let (dimx, dimy, dimz, _) = series.dims();
        let datatype = series.datatype();
        series.allocate(dimx, dimy, dimz, count, datatype)?;
        for (i, _) in mask.iter().enumerate().filter(|&(_, &m)| m != 0) {
            stream.skip(skip_before)?;
            let mut slot = vec![0u8; count * width as usize];
            stream.read_full(&mut slot)?;
            series.set_slot(i, slot)?;
            stream.skip(skip_after)?;
        }
        if !series.meta.file_byte_order.is_native() {
            series.byte_swap();
        }
        series.apply_scale()?;
        series.meta.data_valid = true;
        Ok(())
    }

    fn write_series(&self, series: &VolumeSeries4D) -> Result<()> {
        let mut work = VolumeSeries4D::new();
        work.copy_from(series, true);
        work.remask();
        work.meta.file_byte_order = Endian::Big;
        let disk = work.disk_image(Endian::Big)?;
        let meta = &disk.meta;

        let mut header = String::from_utf8_lossy(MAGIC).into_owned();
        header.push_str(&format!("DataType: {}\n", meta.datatype.header_name()));
        header.push_str(&format!(
            "VoxDims(TXYZ): {} {} {} {}\n",
            meta.dimt, meta.dimx, meta.dimy, meta.dimz
        ));
        format_voxsizes(meta, &mut header);
        header.push_str(&format!("TR(msecs): {:.4}\n", meta.voxsize[3]));
        format_origin(meta, &mut header);
        header.push_str("Byteorder: msbfirst\n");
        format_trailer(meta, &mut header);
        header.push_str("\x0c\n");

        write_atomic(&series.meta.filename, |file| {
            file.write_bytes(header.as_bytes())?;
            file.write_bytes(disk.presence())?;
            for i in 0..disk.voxels() {
                if let Some(slot) = disk.slot(i) {
                    file.write_bytes(slot)?;
                }
            }
            Ok(())
        })
    }

    fn read_frame(&self, series: &VolumeSeries4D, t: usize) -> Result<Volume3D> {
        let series = with_header(self, series)?;
        let meta = &series.meta;
        if t >= meta.dimt {
            return Err(VoxError::InvalidDimensions(format!(
                "frame {} of {}",
                t, meta.dimt
            )));
        }
        let width = meta.datatype.size_in_bytes();
        let (mut stream, mask) = open_mask(&series)?;
        let mut frame = Volume3D::new();
        frame.meta.copy_header_from(meta);
        frame.meta.filename = meta.filename.clone();
        frame.meta.file_format = meta.file_format.clone();
        frame.allocate(meta.dimx, meta.dimy, meta.dimz, meta.datatype)?;

        stream.skip((t * width) as u64)?;
        let stride = ((meta.dimt - 1) * width) as u64;
        let data = frame.data_mut();
        for (i, _) in mask.iter().enumerate().filter(|&(_, &m)| m != 0) {
            stream.read_full(&mut data[i * width..(i + 1) * width])?;
            stream.skip(stride)?;
        }
        if !meta.file_byte_order.is_native() {
            frame.byte_swap();
        }
        frame.apply_scale()?;
        Ok(frame)
    }

    fn read_timeseries(
        &self,
        series: &VolumeSeries4D,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<Vec<f64>> {
        let series = with_header(self, series)?;
        let meta = &series.meta;
        if x >= meta.dimx || y >= meta.dimy || z >= meta.dimz {
            return Err(VoxError::InvalidDimensions(format!(
                "voxel ({},{},{}) outside {}x{}x{}",
                x, y, z, meta.dimx, meta.dimy, meta.dimz
            )));
        }
        let (mut stream, mask) = open_mask(&series)?;
        let index = meta.dimx * (meta.dimy * z + y) + x;
        if mask[index] == 0 {
            return Ok(vec![0.0; meta.dimt]);
        }
        let preceding = mask[..index].iter().filter(|&&m| m != 0).count();
        let width = meta.datatype.size_in_bytes();
        stream.skip((preceding * meta.dimt * width) as u64)?;
        let mut raw = vec![0u8; meta.dimt * width];
        stream.read_full(&mut raw)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample(datatype: DataType) -> VolumeSeries4D {
        let mut series = VolumeSeries4D::with_dims(3, 3, 2, 4, datatype).unwrap();
        series.meta.voxsize = [2.0, 2.0, 4.0, 2500.0];
        series.meta.origin = [1, 1, 0];
        for t in 0..4 {
            series.set(0, 0, 0, t, (t + 1) as f64);
            series.set(2, 1, 1, t, (10 * t) as f64 + 3.0);
            series.set(1, 2, 0, t, 100.0 - t as f64);
        }
        series
    }

    fn header_only(path: &Path) -> VolumeSeries4D {
        let mut series = VolumeSeries4D::new();
        series.meta.filename = path.to_path_buf();
        TesCodec.read_series_header(&mut series).unwrap();
        series
    }

    fn write(dir: &TempDir, name: &str, mut series: VolumeSeries4D) -> std::path::PathBuf {
        let path = dir.path().join(name);
        series.meta.filename = path.clone();
        TesCodec.write_series(&series).unwrap();
        path
    }

    #[test]
    fn test_round_trip_all_types() {
        let temp_dir = TempDir::new().unwrap();
        for datatype in DataType::ALL {
            let original = sample(datatype);
            let path = write(&temp_dir, &format!("r_{}.tes", datatype), original.clone());

            let mut back = header_only(&path);
            assert_eq!(back.meta.file_byte_order, Endian::Big);
            TesCodec.read_series_data(&mut back, None).unwrap();
            assert_eq!(back.dims(), (3, 3, 2, 4));
            assert_eq!(back.datatype(), datatype);
            assert_eq!(back.realvoxels(), 3);
            assert_eq!(back.meta.voxsize, [2.0, 2.0, 4.0, 2500.0]);
            assert_eq!(back.meta.origin, [1, 1, 0]);
            for t in 0..4 {
                assert_eq!(back.get_frame(t).unwrap().data(), original.get_frame(t).unwrap().data());
            }
        }
    }

    #[test]
    fn test_layout_and_forced_big_endian() {
        let temp_dir = TempDir::new().unwrap();
        let mut series = sample(DataType::Int16);
        series.meta.file_byte_order = Endian::Little;
        let path = write(&temp_dir, "layout.tes", series);

        let raw = fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("VB98\nTES1\nDataType: Integer\nVoxDims(TXYZ): 4 3 3 2\n"));
        assert!(text.contains("TR(msecs): 2500.0000\nOrigin(XYZ): 1 1 0\nByteorder: msbfirst\n"));

        let series = header_only(&path);
        let offset = series.meta.offset as usize;
        let mask = &raw[offset - 18..offset];
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), 3);
        assert_eq!(raw.len(), offset + 3 * 4 * 2);
        // first present voxel is (0,0,0), course 1 2 3 4, big-endian int16
        assert_eq!(&raw[offset..offset + 4], &[0, 1, 0, 2]);
    }

    #[test]
    fn test_write_remasks_without_touching_caller() {
        let temp_dir = TempDir::new().unwrap();
        let mut series = sample(DataType::Float32);
        for t in 0..4 {
            series.set(0, 0, 0, t, 0.0);
        }
        assert_eq!(series.realvoxels(), 3);
        let path = write(&temp_dir, "remask.tes", series.clone());
        assert_eq!(series.realvoxels(), 3);

        let mut back = header_only(&path);
        TesCodec.read_series_data(&mut back, None).unwrap();
        assert_eq!(back.realvoxels(), 2);
        assert_eq!(back.mask_value(0, 0, 0), 0);
    }

    #[test]
    fn test_frame_range() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(&temp_dir, "range.tes", sample(DataType::Int32));
        let mut back = header_only(&path);
        TesCodec.read_series_data(&mut back, Some(1..3)).unwrap();
        assert_eq!(back.dims(), (3, 3, 2, 2));
        assert_eq!(back.get_timeseries(0, 0, 0), vec![2.0, 3.0]);
        assert_eq!(back.get_timeseries(2, 1, 1), vec![13.0, 23.0]);

        let mut bad = header_only(&path);
        assert!(TesCodec.read_series_data(&mut bad, Some(2..5)).is_err());
    }

    #[test]
    fn test_single_frame_and_timeseries() {
        let temp_dir = TempDir::new().unwrap();
        let original = sample(DataType::Float64);
        let path = write(&temp_dir, "fast.tes", original.clone());
        let series = header_only(&path);

        for t in 0..4 {
            let frame = TesCodec.read_frame(&series, t).unwrap();
            assert_eq!(frame.data(), original.get_frame(t).unwrap().data());
        }
        assert!(TesCodec.read_frame(&series, 4).is_err());

        assert_eq!(
            TesCodec.read_timeseries(&series, 1, 2, 0).unwrap(),
            vec![100.0, 99.0, 98.0, 97.0]
        );
        assert_eq!(
            TesCodec.read_timeseries(&series, 1, 1, 1).unwrap(),
            vec![0.0; 4]
        );
        assert!(TesCodec.read_timeseries(&series, 3, 0, 0).is_err());
    }

    #[test]
    fn test_scaled_series() {
        let temp_dir = TempDir::new().unwrap();
        let mut series = sample(DataType::Int16);
        series.meta.scaled = true;
        series.meta.alt_datatype = DataType::Int16;
        series.meta.scl_slope = 1.0;
        series.meta.scl_inter = -50.0;
        series.apply_scale().unwrap();
        let path = write(&temp_dir, "scaled.tes", series.clone());

        let mut back = header_only(&path);
        assert!(back.meta.scaled);
        assert_eq!(
            TesCodec.read_timeseries(&back, 0, 0, 0).unwrap(),
            vec![-49.0, -48.0, -47.0, -46.0]
        );
        TesCodec.read_series_data(&mut back, None).unwrap();
        assert_eq!(back.datatype(), DataType::Float32);
        assert_eq!(back.get_timeseries(1, 2, 0), series.get_timeseries(1, 2, 0));
    }

    #[test]
    fn test_scale_rule() {
        assert!(!is_scaled(0.0, 0.0));
        assert!(!is_scaled(1.0, 0.0));
        assert!(is_scaled(1.0, 2.0));
        assert!(is_scaled(0.5, 0.0));
        assert!(!is_scaled(0.0, 7.0));
    }

    #[test]
    fn test_zero_dims_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zero.tes");
        fs::write(&path, b"VB98\nTES1\nDataType: Byte\nVoxDims(TXYZ): 0 2 2 2\n\x0c\n").unwrap();
        let mut series = VolumeSeries4D::new();
        series.meta.filename = path;
        assert!(matches!(
            TesCodec.read_series_header(&mut series),
            Err(VoxError::CorruptHeader(_))
        ));
    }
}
