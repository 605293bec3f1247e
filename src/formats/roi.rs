//! MRIcro region-of-interest files
//!
//! A run-length encoded byte mask with no geometry of its own. The
//! dimensions come from the caller (`name.roi[dims 91 109 91]`) or from the
//! Analyze header next to the file.

use super::analyze::AnalyzeHeader;
use super::FORMAT_VERSION;
use crate::compression::InputStream;
use crate::endian::Endian;
use crate::error::{Result, VoxError};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::types::DataType;
use crate::utils::swap_extension;
use crate::volume::Volume3D;
use log::debug;
use std::path::Path;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "MRIcro ROI",
    extensions: &["roi"],
    signature: "roi",
    aliases: &[],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::READ,
    series: Capabilities::NONE,
};

const MAX_SLICE: usize = 32767;

pub struct RoiCodec;

/// Next little-endian `[u16; 2]` record, or `None` at a clean end of file.
fn next_pair(stream: &mut InputStream) -> Result<Option<[u16; 2]>> {
    let mut raw = [0u8; 4];
    let got = stream.read_up_to(&mut raw)?;
    if got < 4 {
        return Ok(None);
    }
    Ok(Some([
        Endian::Little.read_u16(&raw[0..]),
        Endian::Little.read_u16(&raw[2..]),
    ]))
}

impl Codec for RoiCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, _prefix: &[u8], path: &Path, _dims: Dimensionality) -> Sniff {
        if path.to_string_lossy().contains(".roi") {
            Sniff::Yes
        } else {
            Sniff::No
        }
    }

    fn read_volume_header(&self, volume: &mut Volume3D) -> Result<()> {
        let meta = &mut volume.meta;
        if meta.dimx == 0 || meta.dimy == 0 || meta.dimz == 0 {
            let hdr = swap_extension(&meta.filename, "hdr");
            let header = AnalyzeHeader::read(&hdr)?;
            meta.dimx = header.dim[1].max(0) as usize;
            meta.dimy = header.dim[2].max(0) as usize;
            meta.dimz = header.dim[3].max(0) as usize;
            for i in 0..3 {
                meta.voxsize[i] = header.pixdim[i + 1] as f64;
            }
        }
        if meta.dimx == 0 || meta.dimy == 0 || meta.dimz == 0 {
            return Err(VoxError::CorruptHeader(format!(
                "{}: no dimensions for the mask",
                meta.filename.display()
            )));
        }
        meta.datatype = DataType::Byte;
        meta.dimt = 1;
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        meta.header_valid = true;
        Ok(())
    }

    fn read_volume_data(&self, volume: &mut Volume3D) -> Result<()> {
        if !volume.meta.header_valid {
            self.read_volume_header(volume)?;
        }
        let (dimx, dimy, dimz) = volume.dims();
        volume.allocate(dimx, dimy, dimz, DataType::Byte)?;
        volume.meta.header.clear();
        let path = volume.meta.filename.clone();
        let mut stream = InputStream::open(&path)?;

        let mut runs = 0usize;
        while let Some([slice, words]) = next_pair(&mut stream)? {
            let z = slice.wrapping_sub(1) as usize;
            if z > dimz - 1 || z > MAX_SLICE {
                return Err(VoxError::CorruptHeader(format!(
                    "{}: slice {} outside 1..={}",
                    path.display(),
                    slice,
                    dimz
                )));
            }
            for _ in 0..words.saturating_sub(2) / 2 {
                let [start, count] = next_pair(&mut stream)?
                    .ok_or_else(|| VoxError::truncated(4, 0))?;
                let start = start.wrapping_sub(1) as usize;
                let (mut x, mut y) = (start % dimx, start / dimx);
                for _ in 0..count {
                    volume.set(x, y, z, 1.0);
                    x += 1;
                    if x == dimx {
                        x = 0;
                        y += 1;
                    }
                }
                runs += 1;
            }
        }
        debug!("{}: roi with {} runs", path.display(), runs);
        volume.meta.data_valid = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn encode(records: &[u16]) -> Vec<u8> {
        records.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn with_dims(path: &Path, dims: [usize; 3]) -> Volume3D {
        let mut vol = Volume3D::new();
        vol.meta.filename = path.to_path_buf();
        vol.meta.dimx = dims[0];
        vol.meta.dimy = dims[1];
        vol.meta.dimz = dims[2];
        vol
    }

    #[test]
    fn test_runs_wrap_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lesion.roi");
        // slice 2: one run of 3 starting at voxel 4 of a 4-wide row
        // slice 1: one run of 2 starting at voxel 1
        fs::write(&path, encode(&[2, 4, 4, 3, 1, 4, 1, 2])).unwrap();

        let mut vol = with_dims(&path, [4, 3, 2]);
        RoiCodec.read_volume_data(&mut vol).unwrap();
        assert_eq!(vol.datatype(), DataType::Byte);
        assert_eq!(vol.get(3, 0, 1), 1.0);
        assert_eq!(vol.get(0, 1, 1), 1.0);
        assert_eq!(vol.get(1, 1, 1), 1.0);
        assert_eq!(vol.get(2, 1, 1), 0.0);
        assert_eq!(vol.get(0, 0, 0), 1.0);
        assert_eq!(vol.get(1, 0, 0), 1.0);
        let total: f64 = (0..vol.voxels()).map(|i| vol.get_index(i)).sum();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn test_bad_slice() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.roi");
        fs::write(&path, encode(&[3, 2])).unwrap();
        let mut vol = with_dims(&path, [4, 4, 2]);
        assert!(matches!(
            RoiCodec.read_volume_data(&mut vol),
            Err(VoxError::CorruptHeader(_))
        ));

        fs::write(&path, encode(&[0, 2])).unwrap();
        let mut vol = with_dims(&path, [4, 4, 2]);
        assert!(RoiCodec.read_volume_data(&mut vol).is_err());
    }

    #[test]
    fn test_dims_from_sibling_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mask.roi");
        fs::write(&path, encode(&[1, 4, 1, 1])).unwrap();

        let mut vol = with_dims(&path, [0, 0, 0]);
        assert!(RoiCodec.read_volume_header(&mut vol).is_err());

        let mut anat = Volume3D::with_dims(5, 6, 7, DataType::Int16).unwrap();
        anat.meta.voxsize = [2.0, 2.0, 2.0, 0.0];
        anat.meta.filename = temp_dir.path().join("mask.img");
        super::super::AnalyzeCodec.write_volume(&anat).unwrap();

        let mut vol = with_dims(&path, [0, 0, 0]);
        RoiCodec.read_volume_data(&mut vol).unwrap();
        assert_eq!(vol.dims(), (5, 6, 7));
        assert_eq!(vol.meta.voxsize[..3], [2.0, 2.0, 2.0]);
        assert_eq!(vol.get(0, 0, 0), 1.0);
    }

    #[test]
    fn test_sniff_by_name() {
        let p = Path::new("/data/lesion.roi.gz");
        assert_eq!(RoiCodec.sniff(&[], p, Dimensionality::Volume), Sniff::Yes);
        assert_eq!(RoiCodec.sniff(&[], Path::new("a.img"), Dimensionality::Volume), Sniff::No);
    }
}
