//! GE Signa raw slices
//!
//! A directory of `I.001`, `I.002`, ... files, one slice each. Every file
//! carries the same big-endian header at fixed offsets; the first one
//! supplies the geometry and scan parameters.

use super::FORMAT_VERSION;
use crate::endian::Endian;
use crate::error::{Result, VoxError};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::types::DataType;
use crate::utils::get_fixed_str;
use crate::volume::Volume3D;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "GE I.*",
    extensions: &[],
    signature: "ge",
    aliases: &["ge3"],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::READ,
    series: Capabilities::NONE,
};

const BE: Endian = Endian::Big;
const MAX_SIZE: i16 = 2048;

const IMGOFF: usize = 4;
const SERIESPTR: usize = 140;
const HDROFF: usize = 148;

// relative to the image header
const THICKNESS: usize = 26;
const XSIZE: usize = 30;
const DIMS: usize = 34;
const SPACING: usize = 116;
const TLHC: usize = 154;
const TIMING: usize = 194;
const NEX: usize = 218;
const GAINS: usize = 248;
const PSEQ: usize = 308;

// relative to the series header
const RAS: usize = 120;

/// Slice files for `path`: `I.*` inside a directory, otherwise every file
/// in the parent directory whose name starts with the given name.
fn slice_files(path: &Path) -> Vec<PathBuf> {
    let (dir, prefix) = if path.is_dir() {
        (path.to_path_buf(), "I.".to_string())
    } else {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        (dir, name.unwrap_or_default())
    };
    let mut files: Vec<PathBuf> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .map_or(false, |n| n.to_string_lossy().starts_with(prefix.as_str()))
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// `I.` followed by exactly three digits
fn is_numbered_slice(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().into_owned(),
        None => return false,
    };
    match name.strip_prefix("I.") {
        Some(rest) => rest.len() == 3 && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Bounds-checked view of one slice file
struct SliceFile {
    path: PathBuf,
    raw: Vec<u8>,
}

impl SliceFile {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            raw: fs::read(path)?,
        })
    }

    fn field(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.raw.get(offset..offset + len).ok_or_else(|| {
            VoxError::CorruptHeader(format!(
                "{}: field at {} past end of {} bytes",
                self.path.display(),
                offset,
                self.raw.len()
            ))
        })
    }

    fn i16_at(&self, offset: usize) -> Result<i16> {
        Ok(BE.read_i16(self.field(offset, 2)?))
    }

    fn i32_at(&self, offset: usize) -> Result<i32> {
        Ok(BE.read_i32(self.field(offset, 4)?))
    }

    fn f32_at(&self, offset: usize) -> Result<f32> {
        Ok(BE.read_f32(self.field(offset, 4)?))
    }

    fn offset_at(&self, offset: usize) -> Result<usize> {
        let value = self.i32_at(offset)?;
        usize::try_from(value).map_err(|_| {
            VoxError::CorruptHeader(format!("{}: negative offset {}", self.path.display(), value))
        })
    }

    /// (xsize, ysize) when both are plausible
    fn sizes(&self) -> Result<Option<(usize, usize)>> {
        let hdroff = self.offset_at(HDROFF)?;
        let xsize = self.i16_at(hdroff + XSIZE)?;
        let ysize = self.i16_at(hdroff + XSIZE + 2)?;
        if (1..=MAX_SIZE).contains(&xsize) && (1..=MAX_SIZE).contains(&ysize) {
            Ok(Some((xsize as usize, ysize as usize)))
        } else {
            Ok(None)
        }
    }
}

fn orientation(start_ras: u8, start: f32, end: f32) -> &'static str {
    let ascending = start < end;
    match start_ras {
        b'I' | b'S' if ascending => "RPI",
        b'I' | b'S' => "RPS",
        b'L' | b'R' if ascending => "AIL",
        b'L' | b'R' => "AIR",
        _ if ascending => "RIP",
        _ => "RIA",
    }
}

pub struct GeCodec;

impl Codec for GeCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, _prefix: &[u8], path: &Path, _dims: Dimensionality) -> Sniff {
        if path.is_dir() && slice_files(path).iter().any(|p| is_numbered_slice(p)) {
            Sniff::Yes
        } else {
            Sniff::No
        }
    }

    fn read_volume_header(&self, volume: &mut Volume3D) -> Result<()> {
        let meta = &mut volume.meta;
        meta.header_valid = false;
        let files = slice_files(&meta.filename);
        let first = files.first().ok_or_else(|| {
            VoxError::NotThisFormat(format!("{}: no GE slice files", meta.filename.display()))
        })?;
        let slice = SliceFile::open(first)?;
        let (xsize, ysize) = slice.sizes()?.ok_or_else(|| {
            VoxError::CorruptHeader(format!("{}: implausible slice size", first.display()))
        })?;
        let hdroff = slice.offset_at(HDROFF)?;
        let seriesptr = slice.offset_at(SERIESPTR)?;

        let mut dims = [0f32; 6];
        for (i, d) in dims.iter_mut().enumerate() {
            *d = slice.f32_at(hdroff + DIMS + 4 * i)?;
        }
        let thickness = slice.f32_at(hdroff + THICKNESS)?;
        let spacing = slice.f32_at(hdroff + SPACING)?;
        let start_ras = slice.field(seriesptr + RAS, 1)?[0];
        let start_loc = slice.f32_at(seriesptr + RAS + 2)?;
        let end_loc = slice.f32_at(seriesptr + RAS + 8)?;
        let tlhc = [
            slice.f32_at(hdroff + TLHC)?,
            slice.f32_at(hdroff + TLHC + 4)?,
            slice.f32_at(hdroff + TLHC + 8)?,
        ];
        let patient_age = match seriesptr.checked_sub(1024) {
            Some(base) => slice.i16_at(base + 122)?,
            None => 0,
        };
        let tr = slice.i32_at(hdroff + TIMING)?;
        let te = slice.i32_at(hdroff + TIMING + 8)?;
        let nechoes = slice.i16_at(hdroff + TIMING + 16)?;
        let nex = slice.f32_at(hdroff + NEX)?;
        let tgain = slice.i16_at(hdroff + GAINS)?;
        let rgain1 = slice.i16_at(hdroff + GAINS + 2)?;
        let rgain2 = slice.i16_at(hdroff + GAINS + 4)?;
        let pulse = get_fixed_str(slice.field(hdroff + PSEQ, 33)?);

        meta.dimx = xsize;
        meta.dimy = ysize;
        meta.dimz = files.len();
        meta.dimt = 1;
        meta.datatype = DataType::Int16;
        meta.file_byte_order = Endian::Big;
        meta.voxsize[0] = dims[4] as f64;
        meta.voxsize[1] = dims[5] as f64;
        meta.voxsize[2] = (thickness + spacing) as f64;
        meta.orient = orientation(start_ras, start_loc, end_loc).to_string();
        meta.header.clear();
        meta.add_header(format!("Pulsesequence:\t{}", pulse));
        meta.add_header(format!("TR(usecs):\t{}", tr));
        meta.add_header(format!("ZRange:\t{:.6}\t{:.6}", start_loc, end_loc));
        meta.add_header(format!(
            "FOV:\t{:.2}x{:.2}",
            dims[0].trunc(),
            dims[1].trunc()
        ));
        meta.add_header(format!(
            "Scaninfo: TE={} nechoes={} nex={:.1} TG={} RG={}/{}",
            te, nechoes, nex, tgain, rgain1, rgain2
        ));
        meta.add_header(format!(
            "AbsoluteCornerPosition: {:.6} {:.6} {:.6}",
            -tlhc[0], tlhc[1], tlhc[2]
        ));
        meta.add_header(format!("PatientAge: {}", patient_age));
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        meta.header_valid = true;
        debug!(
            "{}: ge {}x{}x{} from {}",
            meta.filename.display(),
            meta.dimx,
            meta.dimy,
            meta.dimz,
            first.display()
        );
        Ok(())
    }

    fn read_volume_data(&self, volume: &mut Volume3D) -> Result<()> {
        if !volume.meta.header_valid {
            self.read_volume_header(volume)?;
        }
        let files = slice_files(&volume.meta.filename);
        let (dimx, dimy, _) = volume.dims();
        volume.allocate(dimx, dimy, files.len(), DataType::Int16)?;
        let row_bytes = dimx * 2;
        let slice_bytes = row_bytes * dimy;
        for (z, path) in files.iter().enumerate() {
            let slice = SliceFile::open(path)?;
            if slice.sizes()? != Some((dimx, dimy)) {
                debug!("{}: skipping slice with other dimensions", path.display());
                continue;
            }
            let imgoff = slice.offset_at(IMGOFF)?;
            let pixels = slice.raw.get(imgoff..imgoff + slice_bytes).ok_or_else(|| {
                VoxError::truncated(slice_bytes, slice.raw.len().saturating_sub(imgoff))
            })?;
            let data = volume.data_mut();
            // first stored row is the top of the image
            for row in 0..dimy {
                let dest = z * slice_bytes + (dimy - row - 1) * row_bytes;
                data[dest..dest + row_bytes]
                    .copy_from_slice(&pixels[row * row_bytes..(row + 1) * row_bytes]);
            }
        }
        if !Endian::Big.is_native() {
            volume.byte_swap();
        }
        volume.meta.data_valid = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HDR: usize = 200;
    const SERIES: usize = 1100;
    const IMG: usize = 1600;

    /// A minimal slice file: 3x2 pixels, values `base + i`.
    fn slice_bytes(base: i16) -> Vec<u8> {
        let mut raw = vec![0u8; IMG + 12];
        BE.write_i32(&mut raw[IMGOFF..], IMG as i32);
        BE.write_i32(&mut raw[SERIESPTR..], SERIES as i32);
        BE.write_i32(&mut raw[HDROFF..], HDR as i32);
        BE.write_i16(&mut raw[HDR + XSIZE..], 3);
        BE.write_i16(&mut raw[HDR + XSIZE + 2..], 2);
        for (i, v) in [240.0f32, 220.0, 0.0, 0.0, 1.5, 1.75].iter().enumerate() {
            BE.write_f32(&mut raw[HDR + DIMS + 4 * i..], *v);
        }
        BE.write_f32(&mut raw[HDR + THICKNESS..], 4.0);
        BE.write_f32(&mut raw[HDR + SPACING..], 1.0);
        BE.write_f32(&mut raw[HDR + TLHC..], 120.0);
        BE.write_f32(&mut raw[HDR + TLHC + 4..], -90.5);
        BE.write_f32(&mut raw[HDR + TLHC + 8..], 30.0);
        BE.write_i32(&mut raw[HDR + TIMING..], 2000000);
        BE.write_i32(&mut raw[HDR + TIMING + 8..], 40000);
        BE.write_i16(&mut raw[HDR + TIMING + 16..], 1);
        BE.write_f32(&mut raw[HDR + NEX..], 1.0);
        raw[HDR + PSEQ..HDR + PSEQ + 4].copy_from_slice(b"epi\0");
        raw[SERIES + RAS] = b'I';
        BE.write_f32(&mut raw[SERIES + RAS + 2..], -20.0);
        BE.write_f32(&mut raw[SERIES + RAS + 8..], 60.0);
        BE.write_i16(&mut raw[SERIES - 1024 + 122..], 37);
        for i in 0..6 {
            BE.write_i16(&mut raw[IMG + 2 * i..], base + i as i16);
        }
        raw
    }

    fn scan_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("I.001"), slice_bytes(0)).unwrap();
        fs::write(temp_dir.path().join("I.002"), slice_bytes(100)).unwrap();
        temp_dir
    }

    #[test]
    fn test_read_directory() {
        let temp_dir = scan_dir();
        let mut vol = Volume3D::new();
        vol.meta.filename = temp_dir.path().to_path_buf();
        GeCodec.read_volume_data(&mut vol).unwrap();

        assert_eq!(vol.dims(), (3, 2, 2));
        assert_eq!(vol.datatype(), DataType::Int16);
        assert_eq!(vol.meta.voxsize[..3], [1.5, 1.75, 5.0]);
        assert_eq!(vol.meta.orient, "RPI");
        // rows flipped: the first stored row lands at y = 1
        assert_eq!(vol.get(0, 1, 0), 0.0);
        assert_eq!(vol.get(2, 1, 0), 2.0);
        assert_eq!(vol.get(0, 0, 0), 3.0);
        assert_eq!(vol.get(2, 0, 1), 105.0);

        assert_eq!(vol.meta.get_header("Pulsesequence:"), Some("epi"));
        assert_eq!(vol.meta.get_header("TR(usecs):"), Some("2000000"));
        assert_eq!(vol.meta.get_header("FOV:"), Some("240.00x220.00"));
        assert_eq!(vol.meta.get_header("PatientAge:"), Some("37"));
        assert_eq!(vol.meta.corner(), Some([-120.0, -90.5, 30.0]));
    }

    #[test]
    fn test_sniff_and_rejects() {
        let temp_dir = scan_dir();
        assert_eq!(GeCodec.sniff(&[], temp_dir.path(), Dimensionality::Volume), Sniff::Yes);
        let file = temp_dir.path().join("I.001");
        assert_eq!(GeCodec.sniff(&[], &file, Dimensionality::Volume), Sniff::No);

        let empty = TempDir::new().unwrap();
        assert_eq!(GeCodec.sniff(&[], empty.path(), Dimensionality::Volume), Sniff::No);

        let mut raw = slice_bytes(0);
        BE.write_i16(&mut raw[HDR + XSIZE..], 4096);
        fs::write(empty.path().join("I.001"), raw).unwrap();
        let mut vol = Volume3D::new();
        vol.meta.filename = empty.path().to_path_buf();
        assert!(matches!(
            GeCodec.read_volume_header(&mut vol),
            Err(VoxError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_orientation() {
        assert_eq!(orientation(b'S', 10.0, -10.0), "RPS");
        assert_eq!(orientation(b'L', -10.0, 10.0), "AIL");
        assert_eq!(orientation(b'R', 10.0, -10.0), "AIR");
        assert_eq!(orientation(b'A', 10.0, -10.0), "RIA");
    }
}
