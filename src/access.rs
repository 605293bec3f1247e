//! Reading and writing by filename - the main entry points
//!
//! Every model type gets `read_file`/`write_file`. Reads resolve the format
//! through the registry, moving to the next candidate only when a codec
//! answers [`VoxError::NotThisFormat`]. Writes pick the codec from the
//! forced format, the extension, the format the object came from, and
//! finally the native format for the dimensionality.

use crate::error::{Result, VoxError};
use crate::metadata::{label_file_for, read_labels, ColorCycle, CommonMetadata};
use crate::registry::{registry, Codec, Dimensionality};
use crate::series::VolumeSeries4D;
use crate::target::{ParsedTarget, Subvolume};
use crate::types::DataType;
use crate::vector::Vector1D;
use crate::volume::Volume3D;
use log::{debug, warn};
use std::ops::Range;
use std::path::Path;

/// Try each candidate for `path` in rank order.
///
/// A forced format limits the candidates to that codec. Errors other than
/// `NotThisFormat` stop the search.
fn resolve<T>(
    path: &Path,
    dims: Dimensionality,
    forced: Option<&str>,
    mut attempt: impl FnMut(&dyn Codec) -> Result<T>,
) -> Result<T> {
    let candidates: Vec<&dyn Codec> = match forced {
        Some(sig) => match registry().find_by_signature(sig) {
            Some(codec) if codec.descriptor().capabilities(dims).read_header => vec![codec],
            _ => {
                return Err(VoxError::NoFormat(format!(
                    "{} (forced format {} cannot read it)",
                    path.display(),
                    sig
                )))
            }
        },
        None => registry().resolve_candidates(path, dims),
    };
    for codec in candidates {
        match attempt(codec) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_not_this_format() => {
                debug!("{}: not {} ({})", path.display(), codec.descriptor().signature, e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(VoxError::NoFormat(path.display().to_string()))
}

/// Codec that produced `meta`, by its recorded signature
fn codec_for(meta: &CommonMetadata) -> Result<&'static dyn Codec> {
    meta.file_format
        .as_deref()
        .and_then(|sig| registry().find_by_signature(sig))
        .ok_or_else(|| VoxError::NoFormat(meta.filename.display().to_string()))
}

/// Writer for `meta` as `dims`, falling back to `native`.
fn pick_writer(
    meta: &CommonMetadata,
    forced: Option<&str>,
    dims: Dimensionality,
    native: &str,
) -> Result<&'static dyn Codec> {
    let reg = registry();
    let writes = |codec: &&dyn Codec| codec.descriptor().capabilities(dims).write;
    forced
        .and_then(|sig| reg.find_by_signature(sig))
        .filter(writes)
        .or_else(|| reg.find_writer_by_extension(&meta.filename, dims))
        .or_else(|| {
            meta.file_format
                .as_deref()
                .and_then(|sig| reg.find_by_signature(sig))
                .filter(writes)
        })
        .or_else(|| reg.find_by_signature(native))
        .ok_or_else(|| VoxError::NoFormat(meta.filename.display().to_string()))
}

/// Target for a write: the given name, or the object's own filename
fn write_target(meta: &mut CommonMetadata, name: Option<&str>) -> ParsedTarget {
    let target = match name {
        Some(name) => ParsedTarget::parse(name),
        None => ParsedTarget {
            path: meta.filename.clone(),
            ..ParsedTarget::default()
        },
    };
    meta.filename = target.path.clone();
    if let Some(order) = target.byte_order {
        meta.file_byte_order = order;
    }
    target
}

/// Apply the read-side overrides of `target` to a fresh object's metadata.
///
/// Codecs that find a byte order or extents in the header replace these.
fn seed_meta(meta: &mut CommonMetadata, target: &ParsedTarget) {
    meta.filename = target.path.clone();
    if let Some(order) = target.byte_order {
        meta.file_byte_order = order;
    }
    if let Some([x, y, z]) = target.dims {
        meta.dimx = x;
        meta.dimy = y;
        meta.dimz = z;
    }
}

fn load_labels(meta: &mut CommonMetadata) {
    let Some(path) = label_file_for(&meta.filename) else {
        return;
    };
    match read_labels(&path, &mut ColorCycle::new()) {
        Ok(specs) => meta.maskspecs.extend(specs),
        Err(e) => warn!("ignoring label file {}: {}", path.display(), e),
    }
}

impl Volume3D {
    /// Read the header of `name`, leaving the data unread.
    ///
    /// `name:N` and `name:mask` read the header of a 4D file and describe
    /// one of its frames or its presence mask.
    pub fn read_header(&mut self, name: &str) -> Result<()> {
        let target = ParsedTarget::parse(name);
        let path = target.path.clone();

        let mut meta = match target.subvolume {
            Some(selector) => {
                let mut series = VolumeSeries4D::new();
                series.read_header_parsed(&target)?;
                let mut meta = series.meta;
                meta.dimt = 1;
                if selector == Subvolume::Mask {
                    meta.datatype = DataType::Byte;
                    meta.alt_datatype = DataType::Byte;
                    meta.clear_scale();
                }
                meta.subvolume = Some(selector);
                meta
            }
            None => resolve(&path, Dimensionality::Volume, target.format.as_deref(), |codec| {
                let mut volume = Volume3D::new();
                seed_meta(&mut volume.meta, &target);
                codec.read_volume_header(&mut volume)?;
                Ok(volume.meta)
            })?,
        };
        load_labels(&mut meta);
        meta.header_valid = true;
        meta.data_valid = false;
        self.release();
        self.meta = meta;
        Ok(())
    }

    /// Read the voxel data for the header read by [`read_header`](Self::read_header).
    pub fn read_data(&mut self) -> Result<()> {
        if !self.meta.header_valid {
            let name = self.meta.filename.to_string_lossy().into_owned();
            self.read_header(&name)?;
        }
        match self.meta.subvolume {
            Some(Subvolume::Frame(t)) => {
                let series = self.source_series()?;
                let frame = codec_for(&series.meta)?.read_frame(&series, t)?;
                self.adopt(frame);
            }
            Some(Subvolume::Mask) => {
                let mut series = self.source_series()?;
                series.read_data(None)?;
                let mask = series.extract_mask()?;
                self.adopt(mask);
            }
            None => codec_for(&self.meta)?.read_volume_data(self)?,
        }
        self.meta.data_valid = true;
        Ok(())
    }

    /// Header of the series a selector points into
    fn source_series(&self) -> Result<VolumeSeries4D> {
        let mut series = VolumeSeries4D::new();
        series.read_header_parsed(&ParsedTarget {
            path: self.meta.filename.clone(),
            format: self.meta.file_format.clone(),
            byte_order: Some(self.meta.file_byte_order),
            ..ParsedTarget::default()
        })?;
        Ok(series)
    }

    /// Take another volume's data, keeping this volume's filename and
    /// selector.
    fn adopt(&mut self, source: Volume3D) {
        let filename = std::mem::take(&mut self.meta.filename);
        let subvolume = self.meta.subvolume;
        let maskspecs = std::mem::take(&mut self.meta.maskspecs);
        *self = source;
        self.meta.filename = filename;
        self.meta.subvolume = subvolume;
        if !maskspecs.is_empty() {
            self.meta.maskspecs = maskspecs;
        }
    }

    pub fn read_file(&mut self, name: &str) -> Result<()> {
        self.read_header(name)?;
        self.read_data()
    }

    /// Write to `name`, or back to the volume's own filename.
    pub fn write_file(&mut self, name: Option<&str>) -> Result<()> {
        let target = write_target(&mut self.meta, name);
        let codec = pick_writer(&self.meta, target.format.as_deref(), Dimensionality::Volume, "cub1")?;
        debug!(
            "writing {} as {}",
            self.meta.filename.display(),
            codec.descriptor().signature
        );
        codec.write_volume(self)
    }
}

impl VolumeSeries4D {
    fn read_header_parsed(&mut self, target: &ParsedTarget) -> Result<()> {
        let path = &target.path;
        let meta = resolve(path, Dimensionality::Series, target.format.as_deref(), |codec| {
            let mut series = VolumeSeries4D::new();
            seed_meta(&mut series.meta, target);
            codec.read_series_header(&mut series)?;
            Ok(series.meta)
        })?;
        *self = VolumeSeries4D::new();
        self.meta = meta;
        self.meta.header_valid = true;
        Ok(())
    }

    pub fn read_header(&mut self, name: &str) -> Result<()> {
        self.read_header_parsed(&ParsedTarget::parse(name))
    }

    /// Read all time points, or only `range`.
    pub fn read_data(&mut self, range: Option<Range<usize>>) -> Result<()> {
        if !self.meta.header_valid {
            let name = self.meta.filename.to_string_lossy().into_owned();
            self.read_header(&name)?;
        }
        codec_for(&self.meta)?.read_series_data(self, range)?;
        self.meta.data_valid = true;
        Ok(())
    }

    pub fn read_file(&mut self, name: &str) -> Result<()> {
        self.read_header(name)?;
        self.read_data(None)
    }

    /// One time point straight from the file. Needs the header only.
    pub fn read_frame(&self, t: usize) -> Result<Volume3D> {
        codec_for(&self.meta)?.read_frame(self, t)
    }

    /// One voxel's time course straight from the file. Needs the header only.
    pub fn read_timeseries(&self, x: usize, y: usize, z: usize) -> Result<Vec<f64>> {
        codec_for(&self.meta)?.read_timeseries(self, x, y, z)
    }

    pub fn write_file(&mut self, name: Option<&str>) -> Result<()> {
        let target = write_target(&mut self.meta, name);
        let codec = pick_writer(&self.meta, target.format.as_deref(), Dimensionality::Series, "tes1")?;
        debug!(
            "writing {} as {}",
            self.meta.filename.display(),
            codec.descriptor().signature
        );
        codec.write_series(self)
    }
}

impl Vector1D {
    pub fn read_file(&mut self, name: &str) -> Result<()> {
        let target = ParsedTarget::parse(name);
        let path = target.path.clone();
        *self = resolve(&path, Dimensionality::Vector, target.format.as_deref(), |codec| {
            let mut vector = Vector1D::new();
            seed_meta(&mut vector.meta, &target);
            codec.read_vector(&mut vector)?;
            Ok(vector)
        })?;
        Ok(())
    }

    pub fn write_file(&mut self, name: Option<&str>) -> Result<()> {
        let target = write_target(&mut self.meta, name);
        let codec = pick_writer(&self.meta, target.format.as_deref(), Dimensionality::Vector, "ref1")?;
        codec.write_vector(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::Endian;
    use std::fs;
    use tempfile::TempDir;

    fn name(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn sample_volume() -> Volume3D {
        let mut vol = Volume3D::with_dims(4, 3, 2, DataType::Int16).unwrap();
        for i in 0..vol.voxels() {
            vol.set_index(i, i as f64 - 5.0);
        }
        vol
    }

    #[test]
    fn test_volume_write_picks_by_extension() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = sample_volume();
        for file in ["a.cub", "a.nii", "a.img", "a.nii.gz"] {
            let path = temp_dir.path().join(file);
            vol.write_file(Some(&name(&path))).unwrap();

            let mut back = Volume3D::new();
            back.read_file(&name(&path)).unwrap();
            assert_eq!(back.dims(), (4, 3, 2), "{}", file);
            assert_eq!(back.get(3, 2, 1), 18.0, "{}", file);
            assert_eq!(back.get(0, 0, 0), -5.0, "{}", file);
        }
        let mut back = Volume3D::new();
        back.read_header(&name(&temp_dir.path().join("a.img"))).unwrap();
        assert_eq!(back.meta.file_format.as_deref(), Some("img"));
        assert!(!back.has_data());
    }

    #[test]
    fn test_volume_write_fallback_and_forced() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = sample_volume();

        let plain = temp_dir.path().join("noext");
        vol.write_file(Some(&name(&plain))).unwrap();
        assert!(fs::read(&plain).unwrap().starts_with(b"VB98\nCUB1\n"));

        let forced = temp_dir.path().join("forced.dat");
        vol.write_file(Some(&format!("{}[nifti,little]", forced.display())))
            .unwrap();
        assert_eq!(vol.meta.file_byte_order, Endian::Little);
        assert_eq!(vol.meta.filename, forced);
        let raw = fs::read(&forced).unwrap();
        assert_eq!(&raw[344..348], b"n+1\0");

        let mut back = Volume3D::new();
        assert!(back.read_file(&name(&forced)).is_err());
        back.read_file(&format!("{}[nifti]", forced.display())).unwrap();
        assert_eq!(back.meta.file_format.as_deref(), Some("nifti"));
        assert_eq!(back.get(1, 0, 0), -4.0);
    }

    #[test]
    fn test_original_format_kept_on_rewrite() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = sample_volume();
        let first = temp_dir.path().join("first.nii");
        vol.write_file(Some(&name(&first))).unwrap();

        let mut back = Volume3D::new();
        back.read_file(&name(&first)).unwrap();
        let second = temp_dir.path().join("second.out");
        back.write_file(Some(&name(&second))).unwrap();
        assert_eq!(&fs::read(&second).unwrap()[344..348], b"n+1\0");
    }

    #[test]
    fn test_unknown_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("junk.xyz");
        fs::write(&path, b"nothing to see").unwrap();
        let mut vol = Volume3D::new();
        let err = vol.read_file(&name(&path)).unwrap_err();
        assert!(matches!(err, VoxError::NoFormat(_)));
        assert_eq!(err.code(), 130);

        let err = vol.read_file(&format!("{}[nope]", path.display())).unwrap_err();
        assert!(matches!(err, VoxError::NoFormat(_)));
    }

    #[test]
    fn test_forced_byte_order_on_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.cub");
        let mut raw = b"VB98\nCUB1\nDataType: Float\nVoxDims(XYZ): 2 1 1\n\x0c\n".to_vec();
        for v in [1.5f32, 2.5] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(&path, &raw).unwrap();

        let mut vol = Volume3D::new();
        vol.read_file(&format!("{}[little]", path.display())).unwrap();
        assert_eq!(vol.meta.file_byte_order, Endian::Little);
        assert_eq!(vol.get(0, 0, 0), 1.5);
        assert_eq!(vol.get(1, 0, 0), 2.5);

        let mut vol = Volume3D::new();
        vol.read_file(&name(&path)).unwrap();
        assert_eq!(vol.meta.file_byte_order, Endian::Big);
        assert_ne!(vol.get(0, 0, 0), 1.5);
    }

    #[test]
    fn test_labels_loaded_with_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("atlas.cub");
        let mut vol = sample_volume();
        vol.write_file(Some(&name(&path))).unwrap();
        fs::write(temp_dir.path().join("atlas.txt"), "1 left\n2 right\n").unwrap();

        let mut back = Volume3D::new();
        back.read_file(&name(&path)).unwrap();
        assert_eq!(back.meta.maskspecs.len(), 2);
        assert_eq!(back.meta.maskspecs[&2].name, "right");

        fs::write(temp_dir.path().join("atlas.txt"), "garbage\n").unwrap();
        let mut back = Volume3D::new();
        back.read_file(&name(&path)).unwrap();
        assert!(back.meta.maskspecs.is_empty());
    }

    #[test]
    fn test_series_access_and_vector() {
        let temp_dir = TempDir::new().unwrap();
        let mut series = VolumeSeries4D::with_dims(2, 2, 1, 3, DataType::Float32).unwrap();
        series.set(1, 1, 0, 2, 4.5);
        series.set(0, 1, 0, 0, -1.0);
        let path = temp_dir.path().join("run.tes");
        series.write_file(Some(&name(&path))).unwrap();

        let mut back = VolumeSeries4D::new();
        back.read_header(&name(&path)).unwrap();
        assert_eq!(back.dims(), (2, 2, 1, 3));
        assert_eq!(back.read_timeseries(1, 1, 0).unwrap(), vec![0.0, 0.0, 4.5]);
        assert_eq!(back.read_frame(0).unwrap().get(0, 1, 0), -1.0);
        back.read_data(Some(1..3)).unwrap();
        assert_eq!(back.dims(), (2, 2, 1, 2));
        assert_eq!(back.get(1, 1, 0, 1), 4.5);

        let mut vector = Vector1D::from_values(vec![1.0, 2.5, -3.0]);
        let vpath = temp_dir.path().join("regressor");
        vector.write_file(Some(&name(&vpath))).unwrap();
        let mut vback = Vector1D::new();
        vback.read_file(&name(&vpath)).unwrap();
        assert_eq!(vback.values(), &[1.0, 2.5, -3.0]);
    }

    #[test]
    fn test_subvolume_selectors() {
        let temp_dir = TempDir::new().unwrap();
        let mut series = VolumeSeries4D::with_dims(3, 2, 2, 4, DataType::Int16).unwrap();
        series.set(2, 1, 1, 3, 9.0);
        series.set(0, 0, 0, 1, 2.0);
        let path = temp_dir.path().join("run.tes");
        series.write_file(Some(&name(&path))).unwrap();

        let mut frame = Volume3D::new();
        frame.read_header(&format!("{}:3", path.display())).unwrap();
        assert_eq!(frame.dims(), (3, 2, 2));
        assert_eq!(frame.meta.datatype, DataType::Int16);
        frame.read_data().unwrap();
        assert_eq!(frame.get(2, 1, 1), 9.0);
        assert_eq!(frame.get(0, 0, 0), 0.0);
        assert_eq!(frame.meta.subvolume, Some(Subvolume::Frame(3)));

        let mut mask = Volume3D::new();
        mask.read_file(&format!("{}:mask", path.display())).unwrap();
        assert_eq!(mask.datatype(), DataType::Byte);
        assert_eq!(mask.get(2, 1, 1), 1.0);
        assert_eq!(mask.get(0, 0, 0), 1.0);
        assert_eq!(mask.get(1, 0, 0), 0.0);
    }
}
