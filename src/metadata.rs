//! Header fields shared by every volume type

use crate::endian::Endian;
use crate::error::{Result, VoxError};
use crate::target::Subvolume;
use crate::types::DataType;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest positive normal `f32`; values below it count as zero for
/// scale factors and voxel sizes.
pub const FLT_MIN: f64 = f32::MIN_POSITIVE as f64;

/// Colour and label attached to one mask value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskSpec {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub name: String,
}

impl MaskSpec {
    pub fn new(rgb: (u8, u8, u8), name: impl Into<String>) -> Self {
        Self {
            r: rgb.0,
            g: rgb.1,
            b: rgb.2,
            name: name.into(),
        }
    }
}

/// Cycles through a fixed palette of 11 label colours.
///
/// Each reader that assigns colours owns one of these, so two readers never
/// share a position in the cycle.
#[derive(Debug, Clone, Default)]
pub struct ColorCycle {
    index: usize,
}

impl ColorCycle {
    const PALETTE: [(u8, u8, u8); 11] = [
        (255, 0, 0),
        (0, 255, 0),
        (0, 0, 255),
        (210, 210, 0),
        (255, 145, 0),
        (255, 0, 225),
        (26, 184, 63),
        (75, 140, 204),
        (113, 71, 204),
        (181, 110, 89),
        (40, 128, 36),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Colour at the current position, then advance.
    pub fn next_color(&mut self) -> (u8, u8, u8) {
        let color = Self::PALETTE[self.index];
        self.index = (self.index + 1) % Self::PALETTE.len();
        color
    }
}

/// NIfTI orientation fields kept so they survive a read/write cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialTransform {
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern: [f64; 3],
    pub srow: [[f64; 4]; 3],
}

impl Default for SpatialTransform {
    fn default() -> Self {
        Self {
            qform_code: 0,
            sform_code: 0,
            quatern: [0.0; 3],
            srow: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }
}

/// Header fields common to vectors, volumes and series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonMetadata {
    /// Path the object was read from or will be written to
    pub filename: PathBuf,

    pub dimx: usize,
    pub dimy: usize,
    pub dimz: usize,
    pub dimt: usize,

    pub datatype: DataType,

    /// Spatial sizes in mm, then the repetition time in ms
    pub voxsize: [f64; 4],

    /// Reference voxel
    pub origin: [i32; 3],

    /// Unrounded origin, when the source format supplied one
    pub qoffset: Option<[f64; 3]>,

    pub transform: SpatialTransform,

    /// Three-letter orientation code, e.g. `RPI`
    pub orient: String,

    pub scl_slope: f64,
    pub scl_inter: f64,
    pub scaled: bool,
    /// On-disk type of a scaled volume
    pub alt_datatype: DataType,

    pub file_byte_order: Endian,

    /// Free-text header lines, passed through untouched
    pub header: Vec<String>,

    pub maskspecs: BTreeMap<i32, MaskSpec>,

    /// Pending subvolume request, taken from the filename
    pub subvolume: Option<Subvolume>,

    /// Signature of the format the object came from
    pub file_format: Option<String>,

    /// Start of voxel data within the (uncompressed) file
    pub offset: u64,

    pub header_valid: bool,
    pub data_valid: bool,
}

impl Default for CommonMetadata {
    fn default() -> Self {
        Self {
            filename: PathBuf::new(),
            dimx: 0,
            dimy: 0,
            dimz: 0,
            dimt: 0,
            datatype: DataType::Byte,
            voxsize: [0.0, 0.0, 0.0, 1000.0],
            origin: [0; 3],
            qoffset: None,
            transform: SpatialTransform::default(),
            orient: "RPI".to_string(),
            scl_slope: 0.0,
            scl_inter: 0.0,
            scaled: false,
            alt_datatype: DataType::Byte,
            file_byte_order: Endian::Big,
            header: Vec::new(),
            maskspecs: BTreeMap::new(),
            subvolume: None,
            file_format: None,
            offset: 0,
            header_valid: false,
            data_valid: false,
        }
    }
}

impl CommonMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spatial voxels
    pub fn voxels(&self) -> usize {
        self.dimx * self.dimy * self.dimz
    }

    pub fn same_spatial_dims(&self, other: &CommonMetadata) -> bool {
        self.dimx == other.dimx && self.dimy == other.dimy && self.dimz == other.dimz
    }

    pub fn with_voxsize(mut self, x: f64, y: f64, z: f64) -> Self {
        self.voxsize[0] = x;
        self.voxsize[1] = y;
        self.voxsize[2] = z;
        self
    }

    /// Set the origin from fractional voxel coordinates.
    pub fn set_origin(&mut self, x: f64, y: f64, z: f64) {
        self.origin = [x.round() as i32, y.round() as i32, z.round() as i32];
        self.qoffset = Some([x, y, z]);
    }

    pub fn add_header(&mut self, line: impl Into<String>) {
        self.header.push(line.into());
    }

    /// Value of the first header line whose leading token is `tag`
    /// (case-insensitive); the rest of the line, trimmed.
    pub fn get_header(&self, tag: &str) -> Option<&str> {
        self.header.iter().find_map(|line| {
            let line = line.trim_start();
            let end = line.find(char::is_whitespace).unwrap_or(line.len());
            if line[..end].eq_ignore_ascii_case(tag) {
                Some(line[end..].trim())
            } else {
                None
            }
        })
    }

    pub fn add_maskspec(&mut self, index: i32, spec: MaskSpec) {
        self.maskspecs.insert(index, spec);
    }

    /// Absolute position of the first voxel, from whichever header tag the
    /// producing scanner used.
    pub fn corner(&self) -> Option<[f64; 3]> {
        let numbers = |s: &str| -> Vec<f64> {
            s.split_whitespace()
                .map(|t| t.parse::<f64>().unwrap_or(0.0))
                .collect()
        };
        if let Some(value) = self.get_header("AbsoluteCornerPosition:") {
            let v = numbers(value);
            return Some(if v.len() > 2 {
                [v[0], v[1], v[2]]
            } else {
                [0.0; 3]
            });
        }
        if let Some(value) = self.get_header("ZRange:") {
            let v = numbers(value);
            return Some([0.0, 0.0, v.first().copied().unwrap_or(0.0)]);
        }
        if let Some(value) = self.get_header("im_tlhc:") {
            let v = numbers(value);
            if v.len() > 2 {
                return Some([v[0], v[1], v[2]]);
            }
        }
        if let Some(value) = self.get_header("StartLoc:") {
            // "StartLoc: <ras> <position>"
            let v = numbers(value);
            if !v.is_empty() {
                return Some([0.0, 0.0, v.get(1).copied().unwrap_or(0.0)]);
            }
        }
        None
    }

    /// Copy everything except dims, type and validity of data.
    pub fn copy_header_from(&mut self, other: &CommonMetadata) {
        self.voxsize = other.voxsize;
        self.origin = other.origin;
        self.qoffset = other.qoffset;
        self.transform = other.transform;
        self.maskspecs = other.maskspecs.clone();
        self.subvolume = other.subvolume;
        self.orient = other.orient.clone();
        self.scl_slope = other.scl_slope;
        self.scl_inter = other.scl_inter;
        self.scaled = other.scaled;
        self.alt_datatype = other.alt_datatype;
        self.file_byte_order = other.file_byte_order;
        self.header = other.header.clone();
        self.header_valid = other.header_valid;
    }

    /// Reset scale fields to "not scaled"; a zero slope means no scaling.
    pub fn clear_scale(&mut self) {
        self.scaled = false;
        self.scl_slope = 0.0;
        self.scl_inter = 0.0;
    }
}

/// Find the label file that goes with `path`: `<path>.txt`, then the same
/// stem with a `.txt` extension.
pub fn label_file_for(path: &Path) -> Option<PathBuf> {
    let mut appended = path.as_os_str().to_os_string();
    appended.push(".txt");
    let appended = PathBuf::from(appended);
    if appended.is_file() {
        return Some(appended);
    }
    let swapped = path.with_extension("txt");
    if swapped.is_file() {
        return Some(swapped);
    }
    None
}

/// Parse a label file: one `<integer> <label text>` pair per non-blank line.
pub fn read_labels(path: &Path, colors: &mut ColorCycle) -> Result<BTreeMap<i32, MaskSpec>> {
    let text = fs::read_to_string(path)?;
    let mut specs = BTreeMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (index, label) = match line.split_once(char::is_whitespace) {
            Some((index, label)) if !label.trim().is_empty() => (index, label.trim()),
            _ => {
                return Err(VoxError::CorruptHeader(format!(
                    "{}:{}: label line needs an index and a name",
                    path.display(),
                    lineno + 1
                )))
            }
        };
        let index: i32 = index.parse().map_err(|_| {
            VoxError::CorruptHeader(format!(
                "{}:{}: bad label index {:?}",
                path.display(),
                lineno + 1,
                index
            ))
        })?;
        specs.insert(index, MaskSpec::new(colors.next_color(), label));
    }
    debug!("read {} labels from {}", specs.len(), path.display());
    Ok(specs)
}
