//! Sparse 4D volume series
//!
//! A series stores one time course per spatial voxel. Slots are allocated
//! lazily: a voxel whose course has never held a nonzero value has no
//! storage and reads as zero. The presence mask mirrors which slots exist.
//!
//! Zeroing a present voxel through [`VolumeSeries4D::set`] does not free its
//! slot. The slot stays present (and counted in `realvoxels`) until
//! [`VolumeSeries4D::remask`] or [`VolumeSeries4D::zero_voxel`] runs.

use crate::endian::{swap_in_place, Endian};
use crate::error::{Result, VoxError};
use crate::metadata::CommonMetadata;
use crate::types::{convert_buffer, get_value, set_value, ConversionFlags, DataType};
use crate::volume::{check_dims, Volume3D};
use std::fmt;
use std::sync::Arc;

/// One voxel's time course, `dimt` elements of the series type
pub type SeriesSlot = Arc<Vec<u8>>;

#[derive(Debug, Clone, Default)]
pub struct VolumeSeries4D {
    pub meta: CommonMetadata,
    slots: Vec<Option<SeriesSlot>>,
    presence: Vec<u8>,
    realvoxels: usize,
    mirrored: bool,
}

impl VolumeSeries4D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dims(
        dimx: usize,
        dimy: usize,
        dimz: usize,
        dimt: usize,
        datatype: DataType,
    ) -> Result<Self> {
        let mut series = Self::new();
        series.allocate(dimx, dimy, dimz, dimt, datatype)?;
        Ok(series)
    }

    /// Size the series. No voxel storage is allocated yet.
    pub fn allocate(
        &mut self,
        dimx: usize,
        dimy: usize,
        dimz: usize,
        dimt: usize,
        datatype: DataType,
    ) -> Result<()> {
        check_dims(&[dimx, dimy, dimz], 1)?;
        check_dims(&[dimt], datatype.size_in_bytes())?;
        self.meta.dimx = dimx;
        self.meta.dimy = dimy;
        self.meta.dimz = dimz;
        self.meta.dimt = dimt;
        self.meta.datatype = datatype;
        let voxels = dimx * dimy * dimz;
        self.slots = vec![None; voxels];
        self.presence = vec![0; voxels];
        self.realvoxels = 0;
        self.mirrored = false;
        self.meta.header_valid = true;
        self.meta.data_valid = true;
        Ok(())
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        (self.meta.dimx, self.meta.dimy, self.meta.dimz, self.meta.dimt)
    }

    pub fn datatype(&self) -> DataType {
        self.meta.datatype
    }

    /// Number of spatial voxels
    pub fn voxels(&self) -> usize {
        self.slots.len()
    }

    fn slot_bytes(&self) -> usize {
        self.meta.dimt * self.meta.datatype.size_in_bytes()
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    #[inline]
    pub fn index_of(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        if x < self.meta.dimx && y < self.meta.dimy && z < self.meta.dimz {
            Some(self.meta.dimx * (self.meta.dimy * z + y) + x)
        } else {
            None
        }
    }

    /// Give voxel `index` a zero-filled slot if it has none.
    pub fn build_slot(&mut self, index: usize) {
        if index >= self.slots.len() || self.slots[index].is_some() {
            return;
        }
        self.slots[index] = Some(Arc::new(vec![0u8; self.slot_bytes()]));
        self.presence[index] = 1;
        self.realvoxels += 1;
    }

    /// Install a slot read from disk.
    pub(crate) fn set_slot(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        if bytes.len() != self.slot_bytes() {
            return Err(VoxError::truncated(self.slot_bytes(), bytes.len()));
        }
        if index >= self.slots.len() {
            return Err(VoxError::InvalidDimensions(format!(
                "voxel {} outside {} voxels",
                index,
                self.slots.len()
            )));
        }
        if self.slots[index].is_none() {
            self.realvoxels += 1;
        }
        self.slots[index] = Some(Arc::new(bytes));
        self.presence[index] = 1;
        Ok(())
    }

    pub fn slot(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref().map(Vec::as_slice)
    }

    /// Writable slot; a shared slot is copied first.
    fn slot_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.slots
            .get_mut(index)?
            .as_mut()
            .map(|slot| Arc::make_mut(slot).as_mut_slice())
    }

    pub fn is_present(&self, index: usize) -> bool {
        self.presence.get(index).map_or(false, |&p| p != 0)
    }

    /// Presence mask value at (x,y,z); 0 outside the volume
    pub fn mask_value(&self, x: usize, y: usize, z: usize) -> u8 {
        self.index_of(x, y, z).map_or(0, |i| self.presence[i])
    }

    /// Cached count of present slots
    pub fn realvoxels(&self) -> usize {
        self.realvoxels
    }

    /// Count present slots by scanning the mask.
    pub fn count_present(&self) -> usize {
        self.presence.iter().filter(|&&p| p != 0).count()
    }

    pub fn get(&self, x: usize, y: usize, z: usize, t: usize) -> f64 {
        match self.index_of(x, y, z) {
            Some(i) if t < self.meta.dimt => self.get_at(i, t),
            _ => 0.0,
        }
    }

    /// Value of voxel `index` at time `t`; zero for an absent slot.
    pub fn get_at(&self, index: usize, t: usize) -> f64 {
        match self.slot(index) {
            Some(slot) => get_value(slot, self.meta.datatype, t),
            None => 0.0,
        }
    }

    /// Store a value. A zero written to an absent voxel allocates nothing.
    pub fn set(&mut self, x: usize, y: usize, z: usize, t: usize, value: f64) {
        if t >= self.meta.dimt {
            return;
        }
        if let Some(i) = self.index_of(x, y, z) {
            self.set_at(i, t, value);
        }
    }

    pub fn set_at(&mut self, index: usize, t: usize, value: f64) {
        if index >= self.slots.len() || t >= self.meta.dimt {
            return;
        }
        if self.slots[index].is_none() {
            if value == 0.0 {
                return;
            }
            self.build_slot(index);
        }
        let datatype = self.meta.datatype;
        if let Some(slot) = self.slot_mut(index) {
            set_value(slot, datatype, t, value);
        }
    }

    /// Write time point `t` from a dense frame of the same spatial shape.
    pub fn set_frame(&mut self, t: usize, frame: &Volume3D) -> Result<()> {
        if !self.meta.same_spatial_dims(&frame.meta) || t >= self.meta.dimt {
            return Err(VoxError::InvalidDimensions(format!(
                "frame {} of {}x{}x{} into {}x{}x{}x{}",
                t,
                frame.meta.dimx,
                frame.meta.dimy,
                frame.meta.dimz,
                self.meta.dimx,
                self.meta.dimy,
                self.meta.dimz,
                self.meta.dimt
            )));
        }
        let datatype = self.meta.datatype;
        let width = datatype.size_in_bytes();
        let converted;
        let source = if frame.datatype() == datatype {
            frame.data()
        } else {
            converted = convert_buffer(frame.data(), frame.voxels(), frame.datatype(), datatype)?;
            converted.as_slice()
        };
        for i in 0..self.slots.len() {
            let value = get_value(source, datatype, i);
            if value == 0.0 && self.slots[i].is_none() {
                continue;
            }
            self.build_slot(i);
            if let Some(slot) = self.slot_mut(i) {
                slot[t * width..(t + 1) * width].copy_from_slice(&source[i * width..(i + 1) * width]);
            }
        }
        Ok(())
    }

    /// Dense copy of time point `t`
    pub fn get_frame(&self, t: usize) -> Result<Volume3D> {
        if t >= self.meta.dimt {
            return Err(VoxError::InvalidDimensions(format!(
                "frame {} of {}",
                t, self.meta.dimt
            )));
        }
        let mut frame = self.empty_frame(self.meta.datatype)?;
        let width = self.meta.datatype.size_in_bytes();
        let data = frame.data_mut();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                data[i * width..(i + 1) * width].copy_from_slice(&slot[t * width..(t + 1) * width]);
            }
        }
        Ok(frame)
    }

    fn empty_frame(&self, datatype: DataType) -> Result<Volume3D> {
        let mut frame = Volume3D::new();
        frame.meta.copy_header_from(&self.meta);
        frame.meta.filename = self.meta.filename.clone();
        frame.meta.file_format = self.meta.file_format.clone();
        frame.meta.subvolume = None;
        frame.allocate(self.meta.dimx, self.meta.dimy, self.meta.dimz, datatype)?;
        Ok(frame)
    }

    /// Full time course at (x,y,z); zeros for an absent voxel, empty outside.
    pub fn get_timeseries(&self, x: usize, y: usize, z: usize) -> Vec<f64> {
        match self.index_of(x, y, z) {
            Some(i) => (0..self.meta.dimt).map(|t| self.get_at(i, t)).collect(),
            None => Vec::new(),
        }
    }

    /// Byte volume holding 1 where a slot is present
    pub fn extract_mask(&self) -> Result<Volume3D> {
        let mut mask = self.empty_frame(DataType::Byte)?;
        mask.meta.clear_scale();
        mask.meta.alt_datatype = DataType::Byte;
        mask.data_mut().copy_from_slice(&self.presence);
        Ok(mask)
    }

    /// Free every slot with no value above `f64::MIN_POSITIVE` in magnitude
    /// (all zero, subnormal or NaN) and rebuild the mask.
    pub fn remask(&mut self) {
        let datatype = self.meta.datatype;
        let dimt = self.meta.dimt;
        for (slot, present) in self.slots.iter_mut().zip(self.presence.iter_mut()) {
            let keep = slot.as_ref().map_or(false, |s| {
                (0..dimt).any(|t| get_value(s, datatype, t).abs() > f64::MIN_POSITIVE)
            });
            if !keep {
                *slot = None;
            }
            *present = keep as u8;
        }
        self.realvoxels = self.count_present();
    }

    /// Clear voxel `index`, freeing its slot.
    pub fn zero_voxel(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                self.realvoxels -= 1;
            }
            self.presence[index] = 0;
        }
    }

    /// Drop absent voxels and reshape to (n,1,1), n the present count.
    pub fn compact(&mut self) {
        let kept: Vec<Option<SeriesSlot>> = self
            .slots
            .drain(..)
            .filter(Option::is_some)
            .collect();
        let n = kept.len();
        self.slots = kept;
        self.presence = vec![1; n];
        self.realvoxels = n;
        self.meta.dimx = n;
        self.meta.dimy = 1;
        self.meta.dimz = 1;
    }

    pub fn byte_swap(&mut self) {
        let width = self.meta.datatype.size_in_bytes();
        let dimt = self.meta.dimt;
        for slot in self.slots.iter_mut().flatten() {
            swap_in_place(Arc::make_mut(slot).as_mut_slice(), width, dimt);
        }
    }

    pub fn type_convert(&mut self, datatype: DataType, flags: ConversionFlags) -> Result<()> {
        if datatype != self.meta.datatype {
            let from = self.meta.datatype;
            let dimt = self.meta.dimt;
            for slot in self.slots.iter_mut().flatten() {
                *slot = Arc::new(convert_buffer(slot.as_slice(), dimt, from, datatype)?);
            }
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

    /// Copy header and slots from `source`. With `mirror`, slots are shared
    /// read-only and each is copied on its first write.
    pub fn copy_from(&mut self, source: &VolumeSeries4D, mirror: bool) {
        self.meta = source.meta.clone();
        self.slots = if mirror {
            source.slots.clone()
        } else {
            source
                .slots
                .iter()
                .map(|slot| slot.as_ref().map(|s| Arc::new(s.as_ref().clone())))
                .collect()
        };
        self.presence = source.presence.clone();
        self.realvoxels = source.realvoxels;
        self.mirrored = mirror;
    }

    fn map_values(&mut self, f: impl Fn(f64) -> f64) {
        let datatype = self.meta.datatype;
        let dimt = self.meta.dimt;
        for slot in self.slots.iter_mut().flatten() {
            let slot = Arc::make_mut(slot);
            for t in 0..dimt {
                let value = get_value(slot, datatype, t);
                set_value(slot, datatype, t, f(value));
            }
        }
    }

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

    /// Unscaled copy in the on-disk type and `order`
    pub(crate) fn disk_image(&self, order: Endian) -> Result<VolumeSeries4D> {
        let mut out = VolumeSeries4D::new();
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

    pub(crate) fn presence(&self) -> &[u8] {
        &self.presence
    }
}

impl fmt::Display for VolumeSeries4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = &self.meta;
        let name = meta
            .filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(
            f,
            "+- 4D image {} ({}) ({}{})",
            name,
            meta.file_format.as_deref().unwrap_or("no format"),
            if meta.scaled { meta.alt_datatype } else { meta.datatype },
            if meta.scaled { ", scaled" } else { "" }
        )?;
        writeln!(
            f,
            "| {}x{}x{} voxels, {} time points",
            meta.dimx, meta.dimy, meta.dimz, meta.dimt
        )?;
        writeln!(f, "| {} voxels with data", self.realvoxels)?;
        writeln!(
            f,
            "| {:.4} x {:.4} x {:.4} mm, TR {:.4} ms",
            meta.voxsize[0], meta.voxsize[1], meta.voxsize[2], meta.voxsize[3]
        )?;
        writeln!(
            f,
            "| origin: ({},{},{})",
            meta.origin[0], meta.origin[1], meta.origin[2]
        )?;
        write!(f, "+- orientation: {}", meta.orient)
    }
}
