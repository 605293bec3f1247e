//! BrainVoyager VMP statistical maps (write only)
//!
//! One map per file: a little-endian header of fixed display settings, the
//! map name, the grid extent, then the values as float32.

use super::FORMAT_VERSION;
use crate::error::Result;
use crate::io::write_atomic;
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::types::{get_value, DataType};
use crate::utils::swap_extension;
use crate::volume::Volume3D;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "BrainVoyager VMP",
    extensions: &["vmp"],
    signature: "vmp3d",
    aliases: &["vmp"],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::WRITE_ONLY,
    series: Capabilities::NONE,
};

const VERSION: i16 = 2;
const CLUSTER_SIZE: i32 = 50;
const THRESHOLD: f32 = 0.0;
const COLOR_THRESHOLD: f32 = 1000.0;
const DF1: i32 = 157;
const BONFERRONI: i32 = 54228;
const CRITICAL_RGB: [u8; 3] = [0, 0, 100];
const MAX_RGB: [u8; 3] = [0, 0, 255];

/// Little-endian field writer over a growing buffer
#[derive(Default)]
struct Fields(Vec<u8>);

impl Fields {
    fn i16(&mut self, value: i16) -> &mut Self {
        let at = self.grow(2);
        LittleEndian::write_i16(&mut self.0[at..], value);
        self
    }

    fn i32(&mut self, value: i32) -> &mut Self {
        let at = self.grow(4);
        LittleEndian::write_i32(&mut self.0[at..], value);
        self
    }

    fn f32(&mut self, value: f32) -> &mut Self {
        let at = self.grow(4);
        LittleEndian::write_f32(&mut self.0[at..], value);
        self
    }

    fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.0.extend_from_slice(value);
        self
    }

    fn grow(&mut self, by: usize) -> usize {
        let at = self.0.len();
        self.0.resize(at + by, 0);
        at
    }
}

/// Header bytes for a map of `volume`
fn encode_header(volume: &Volume3D, name: &str) -> Vec<u8> {
    let (x, y, z) = volume.dims();
    let (x, y, z) = (x as i32, y as i32, z as i32);
    let mut fields = Fields::default();
    fields
        .i16(VERSION)
        .i32(1) // maps
        .i32(1) // map type
        .i32(0) // lags
        .i32(CLUSTER_SIZE)
        .bytes(&[0]) // cluster check off
        .f32(THRESHOLD)
        .f32(COLOR_THRESHOLD)
        .i32(DF1)
        .i32(0)
        .i32(BONFERRONI)
        .bytes(&CRITICAL_RGB)
        .bytes(&MAX_RGB)
        .bytes(&[0]) // no SMP colour
        .f32(1.0)
        .bytes(name.as_bytes())
        .bytes(&[0])
        .i32(x)
        .i32(y)
        .i32(z)
        .i32(0)
        .i32(x - 1)
        .i32(0)
        .i32(y - 1)
        .i32(0)
        .i32(z - 1)
        .i32(1); // resolution in mm
    fields.0
}

pub struct VmpCodec;

impl Codec for VmpCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, _prefix: &[u8], _path: &Path, _dims: Dimensionality) -> Sniff {
        Sniff::No
    }

    fn write_volume(&self, volume: &Volume3D) -> Result<()> {
        let target = swap_extension(&volume.meta.filename, "vmp");
        let name = volume.meta.filename.to_string_lossy();
        let mut out = encode_header(volume, &name);
        let start = out.len();
        out.resize(start + volume.voxels() * 4, 0);
        let datatype = volume.datatype();
        let data = volume.data();
        for i in 0..volume.voxels() {
            let value = get_value(data, datatype, i) as f32;
            LittleEndian::write_f32(&mut out[start + 4 * i..], value);
        }
        write_atomic(&target, |file| file.write_bytes(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let temp_dir = TempDir::new().unwrap();
        let mut vol = Volume3D::with_dims(2, 3, 4, DataType::Int16).unwrap();
        vol.set(1, 2, 3, -7.0);
        vol.set(0, 0, 0, 5.0);
        let path = temp_dir.path().join("map.vmp");
        vol.meta.filename = path.clone();
        VmpCodec.write_volume(&vol).unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(LittleEndian::read_i16(&raw), 2);
        assert_eq!(LittleEndian::read_i32(&raw[2..]), 1);
        assert_eq!(LittleEndian::read_i32(&raw[14..]), 50);
        assert_eq!(raw[18], 0);
        assert_eq!(LittleEndian::read_f32(&raw[23..]), 1000.0);
        assert_eq!(LittleEndian::read_i32(&raw[27..]), 157);
        assert_eq!(LittleEndian::read_i32(&raw[35..]), 54228);
        assert_eq!(&raw[39..45], &[0, 0, 100, 0, 0, 255]);
        assert_eq!(LittleEndian::read_f32(&raw[46..]), 1.0);

        let name = path.to_string_lossy();
        let after_name = 50 + name.len() + 1;
        assert_eq!(&raw[50..50 + name.len()], name.as_bytes());
        assert_eq!(raw[after_name - 1], 0);
        let dims: Vec<i32> = (0..10)
            .map(|i| LittleEndian::read_i32(&raw[after_name + 4 * i..]))
            .collect();
        assert_eq!(dims, vec![2, 3, 4, 0, 1, 0, 2, 0, 3, 1]);

        let data = &raw[after_name + 40..];
        assert_eq!(data.len(), 24 * 4);
        assert_eq!(LittleEndian::read_f32(data), 5.0);
        assert_eq!(LittleEndian::read_f32(&data[23 * 4..]), -7.0);
    }

    #[test]
    fn test_never_sniffs() {
        assert_eq!(
            VmpCodec.sniff(b"anything", Path::new("x.vmp"), Dimensionality::Volume),
            Sniff::No
        );
        let mut vol = Volume3D::new();
        assert!(VmpCodec.read_volume_header(&mut vol).is_err());
    }
}
