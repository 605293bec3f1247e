//! Dense 3D volumes

use crate::endian::swap_in_place;
use crate::error::{Result, VoxError};
use crate::metadata::CommonMetadata;
use crate::types::{convert_buffer, get_value, set_value, ConversionFlags, DataType};
use std::fmt;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};
use std::sync::Arc;

/// Largest accepted extent along any axis. Guards against allocating from a
/// corrupt header.
pub const MAX_DIM: usize = 2_000_000;

pub(crate) fn check_dims(dims: &[usize], element_size: usize) -> Result<usize> {
    let mut total = element_size;
    for &d in dims {
        if d > MAX_DIM {
            return Err(VoxError::InvalidDimensions(format!(
                "extent {} exceeds maximum {}",
                d, MAX_DIM
            )));
        }
        total = total.checked_mul(d).ok_or_else(|| {
            VoxError::InvalidDimensions(format!("{:?} overflows the address space", dims))
        })?;
    }
    Ok(total)
}

/// Storage behind a volume.
///
/// A mirrored buffer aliases another volume's data read-only. Writing to a
/// mirrored volume first gives it a private copy, so the source is never
/// modified or freed through the alias.
#[derive(Debug, Clone)]
pub enum VoxelBuffer {
    Owned(Arc<Vec<u8>>),
    Mirrored(Arc<Vec<u8>>),
}

impl VoxelBuffer {
    pub fn owned(bytes: Vec<u8>) -> Self {
        VoxelBuffer::Owned(Arc::new(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            VoxelBuffer::Owned(data) | VoxelBuffer::Mirrored(data) => data.as_slice(),
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        if let VoxelBuffer::Mirrored(data) = self {
            *self = VoxelBuffer::Owned(Arc::new(data.as_ref().clone()));
        }
        match self {
            VoxelBuffer::Owned(data) => Arc::make_mut(data).as_mut_slice(),
            VoxelBuffer::Mirrored(_) => unreachable!("mirrored buffer was detached above"),
        }
    }

    pub fn is_mirrored(&self) -> bool {
        matches!(self, VoxelBuffer::Mirrored(_))
    }

    /// A read-only alias of this buffer
    pub fn mirror(&self) -> Self {
        match self {
            VoxelBuffer::Owned(data) | VoxelBuffer::Mirrored(data) => {
                VoxelBuffer::Mirrored(Arc::clone(data))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    min: f64,
    max: f64,
    nonfinite: usize,
}

impl Stats {
    /// min > max marks the cache as stale
    const STALE: Stats = Stats {
        min: 1.0,
        max: 0.0,
        nonfinite: 0,
    };

    fn is_stale(&self) -> bool {
        self.min > self.max
    }
}

/// A 3D grid of voxels stored contiguously, x fastest
#[derive(Debug, Clone)]
pub struct Volume3D {
    pub meta: CommonMetadata,
    data: Option<VoxelBuffer>,
    stats: Stats,
}

impl Default for Volume3D {
    fn default() -> Self {
        Self {
            meta: CommonMetadata::default(),
            data: None,
            stats: Stats::STALE,
        }
    }
}

impl Volume3D {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero-filled volume
    pub fn with_dims(dimx: usize, dimy: usize, dimz: usize, datatype: DataType) -> Result<Self> {
        let mut vol = Self::new();
        vol.allocate(dimx, dimy, dimz, datatype)?;
        Ok(vol)
    }

    /// (Re)allocate zero-filled storage.
    pub fn allocate(&mut self, dimx: usize, dimy: usize, dimz: usize, datatype: DataType) -> Result<()> {
        let bytes = check_dims(&[dimx, dimy, dimz], datatype.size_in_bytes())?;
        self.meta.dimx = dimx;
        self.meta.dimy = dimy;
        self.meta.dimz = dimz;
        self.meta.datatype = datatype;
        self.data = Some(VoxelBuffer::owned(vec![0u8; bytes]));
        self.meta.header_valid = true;
        self.meta.data_valid = true;
        self.stats = Stats::STALE;
        Ok(())
    }

    /// Drop the voxel data, keeping the header.
    pub fn release(&mut self) {
        self.data = None;
        self.meta.data_valid = false;
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.meta.dimx, self.meta.dimy, self.meta.dimz)
    }

    pub fn datatype(&self) -> DataType {
        self.meta.datatype
    }

    pub fn voxels(&self) -> usize {
        self.meta.voxels()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_mirrored(&self) -> bool {
        self.data.as_ref().map_or(false, VoxelBuffer::is_mirrored)
    }

    /// Raw native-order bytes (empty before allocation)
    pub fn data(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], VoxelBuffer::bytes)
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match self.data.as_mut() {
            Some(buffer) => buffer.bytes_mut(),
            None => &mut [],
        }
    }

    /// Install raw bytes read from disk. The length must match the header.
    pub fn set_data(&mut self, bytes: Vec<u8>) -> Result<()> {
        let expected = self.voxels() * self.meta.datatype.size_in_bytes();
        if bytes.len() != expected {
            return Err(VoxError::truncated(expected, bytes.len()));
        }
        self.data = Some(VoxelBuffer::owned(bytes));
        self.meta.data_valid = true;
        self.stats = Stats::STALE;
        Ok(())
    }

    #[inline]
    pub fn index_of(&self, x: usize, y: usize, z: usize) -> usize {
        self.meta.dimx * (self.meta.dimy * z + y) + x
    }

    #[inline]
    pub fn in_bounds(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.meta.dimx && y < self.meta.dimy && z < self.meta.dimz
    }

    /// Value at (x,y,z); zero outside the volume or before allocation.
    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        if !self.in_bounds(x, y, z) || self.data.is_none() {
            return 0.0;
        }
        self.get_index(self.index_of(x, y, z))
    }

    /// Store at (x,y,z). Writes outside the volume are ignored.
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f64) {
        if !self.in_bounds(x, y, z) || self.data.is_none() {
            return;
        }
        let index = self.index_of(x, y, z);
        self.set_index(index, value);
    }

    /// Value at a linear index. Panics past the end of the buffer.
    #[inline]
    pub fn get_index(&self, index: usize) -> f64 {
        get_value(self.data(), self.meta.datatype, index)
    }

    /// Store at a linear index; integer types round. Panics past the end.
    #[inline]
    pub fn set_index(&mut self, index: usize, value: f64) {
        let datatype = self.meta.datatype;
        set_value(self.data_mut(), datatype, index, value);
    }

    pub fn zero(&mut self) {
        if let Some(buffer) = self.data.as_mut() {
            buffer.bytes_mut().fill(0);
        }
        self.stats = Stats::STALE;
    }

    /// Mark cached min/max as stale. Mutations do not do this on their own.
    pub fn invalidate_stats(&mut self) {
        self.stats = Stats::STALE;
    }

    fn refresh_stats(&mut self) {
        if !self.stats.is_stale() {
            return;
        }
        let mut stats = Stats {
            min: 0.0,
            max: 0.0,
            nonfinite: 0,
        };
        if self.data.is_some() && self.voxels() > 0 {
            let first = self.get_index(0);
            stats.min = first;
            stats.max = first;
            for i in 0..self.voxels() {
                let value = self.get_index(i);
                if !value.is_finite() {
                    stats.nonfinite += 1;
                    continue;
                }
                stats.min = stats.min.min(value);
                stats.max = stats.max.max(value);
            }
        }
        self.stats = stats;
    }

    /// Smallest and largest finite values.
    ///
    /// The result is cached and stays stale after mutation until
    /// [`invalidate_stats`](Self::invalidate_stats) or [`zero`](Self::zero).
    pub fn min_max(&mut self) -> (f64, f64) {
        self.refresh_stats();
        (self.stats.min, self.stats.max)
    }

    pub fn nonfinite_count(&mut self) -> usize {
        self.refresh_stats();
        self.stats.nonfinite
    }

    /// Reverse the byte order of every element.
    pub fn byte_swap(&mut self) {
        let width = self.meta.datatype.size_in_bytes();
        let count = self.voxels();
        swap_in_place(self.data_mut(), width, count);
    }

    /// Convert the voxel data to `datatype`.
    pub fn type_convert(&mut self, datatype: DataType, flags: ConversionFlags) -> Result<()> {
        if self.data.is_none() {
            return Err(VoxError::Unsupported("type conversion without data".to_string()));
        }
        if datatype != self.meta.datatype {
            let converted = convert_buffer(self.data(), self.voxels(), self.meta.datatype, datatype)?;
            self.data = Some(VoxelBuffer::owned(converted));
            self.meta.datatype = datatype;
        }
        if flags.contains(ConversionFlags::SET_ALT) {
            self.meta.alt_datatype = datatype;
        }
        if flags.contains(ConversionFlags::NO_SCALE) {
            self.meta.clear_scale();
        }
        Ok(())
    }

    /// Copy header and data from `source`. With `mirror`, the data is a
    /// read-only alias of the source's buffer instead of a copy.
    pub fn copy_from(&mut self, source: &Volume3D, mirror: bool) {
        self.meta = source.meta.clone();
        self.data = source.data.as_ref().map(|buffer| {
            if mirror {
                buffer.mirror()
            } else {
                VoxelBuffer::owned(buffer.bytes().to_vec())
            }
        });
        self.stats = Stats::STALE;
    }

    /// A volume aliasing this one's data read-only
    pub fn mirror(&self) -> Volume3D {
        let mut out = Volume3D::new();
        out.copy_from(self, true);
        out
    }

    fn map_values(&mut self, f: impl Fn(f64) -> f64) {
        for i in 0..self.voxels() {
            let value = self.get_index(i);
            self.set_index(i, f(value));
        }
    }

    /// Combine with a same-shaped volume. A shape mismatch zeroes `self`
    /// instead of failing; callers rely on this.
    fn zip_values(&mut self, other: &Volume3D, f: impl Fn(f64, f64) -> f64) {
        if !self.meta.same_spatial_dims(&other.meta) {
            self.zero();
            return;
        }
        for i in 0..self.voxels() {
            let value = f(self.get_index(i), other.get_index(i));
            self.set_index(i, value);
        }
    }

    /// Apply `raw * slope + inter` after a read, promoting integer data to
    /// float32 first.
    pub(crate) fn apply_scale(&mut self) -> Result<()> {
        if !self.meta.scaled {
            return Ok(());
        }
        if self.meta.datatype.is_integer() {
            self.type_convert(DataType::Float32, ConversionFlags::NONE)?;
        }
        let (slope, inter) = (self.meta.scl_slope, self.meta.scl_inter);
        self.map_values(|v| v * slope + inter);
        Ok(())
    }

    /// Copy of the data as it should be stored: scaling removed, converted
    /// back to the on-disk type, in `order`.
    pub(crate) fn disk_image(&self, order: crate::endian::Endian) -> Result<Volume3D> {
        let mut out = Volume3D::new();
        out.copy_from(self, false);
        if out.meta.scaled {
            let (slope, inter) = (out.meta.scl_slope, out.meta.scl_inter);
            out.map_values(|v| (v - inter) / slope);
            let alt = out.meta.alt_datatype;
            if alt != out.meta.datatype {
                out.type_convert(alt, ConversionFlags::NONE)?;
            }
        }
        if !order.is_native() {
            out.byte_swap();
        }
        Ok(out)
    }

    /// Size of the data on disk in bytes
    pub fn disk_size(&self) -> usize {
        let datatype = if self.meta.scaled {
            self.meta.alt_datatype
        } else {
            self.meta.datatype
        };
        self.voxels() * datatype.size_in_bytes()
    }
}

impl AddAssign<f64> for Volume3D {
    fn add_assign(&mut self, rhs: f64) {
        self.map_values(|v| v + rhs);
    }
}

impl SubAssign<f64> for Volume3D {
    fn sub_assign(&mut self, rhs: f64) {
        self.map_values(|v| v - rhs);
    }
}

impl MulAssign<f64> for Volume3D {
    fn mul_assign(&mut self, rhs: f64) {
        self.map_values(|v| v * rhs);
    }
}

impl DivAssign<f64> for Volume3D {
    fn div_assign(&mut self, rhs: f64) {
        self.map_values(|v| v / rhs);
    }
}

impl AddAssign<&Volume3D> for Volume3D {
    fn add_assign(&mut self, rhs: &Volume3D) {
        self.zip_values(rhs, |a, b| a + b);
    }
}

impl SubAssign<&Volume3D> for Volume3D {
    fn sub_assign(&mut self, rhs: &Volume3D) {
        self.zip_values(rhs, |a, b| a - b);
    }
}

impl MulAssign<&Volume3D> for Volume3D {
    fn mul_assign(&mut self, rhs: &Volume3D) {
        self.zip_values(rhs, |a, b| a * b);
    }
}

impl DivAssign<&Volume3D> for Volume3D {
    fn div_assign(&mut self, rhs: &Volume3D) {
        self.zip_values(rhs, |a, b| a / b);
    }
}

impl fmt::Display for Volume3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = &self.meta;
        let name = meta
            .filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let shown_type = if meta.scaled {
            meta.alt_datatype
        } else {
            meta.datatype
        };
        writeln!(
            f,
            "+- 3D image {} ({}) ({}{})",
            name,
            meta.file_format.as_deref().unwrap_or("no format"),
            shown_type,
            if meta.scaled { ", scaled" } else { "" }
        )?;
        if !meta.header_valid {
            writeln!(f, "+- invalid 3D data")?;
        }
        writeln!(f, "| {}x{}x{} voxels", meta.dimx, meta.dimy, meta.dimz)?;
        writeln!(
            f,
            "| {:.4} x {:.4} x {:.4} mm",
            meta.voxsize[0], meta.voxsize[1], meta.voxsize[2]
        )?;
        writeln!(
            f,
            "| {} on disk ({})",
            crate::utils::format_bytes(self.disk_size()),
            meta.file_byte_order
        )?;
        writeln!(
            f,
            "| origin: ({},{},{})",
            meta.origin[0], meta.origin[1], meta.origin[2]
        )?;
        write!(f, "+- orientation: {}", meta.orient)
    }
}
