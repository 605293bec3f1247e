//! CUB1, the native 3D format
//!
//! ```text
//! VB98\nCUB1\n
//! DataType: Float
//! VoxDims(XYZ): 64 64 32
//! ...free header lines...
//! \x0c\n
//! <raw voxel data>
//! ```

use super::{
    dim_arg, float_arg, format_origin, format_trailer, format_voxsizes, int_arg,
    read_text_header, split_keyword, FORMAT_VERSION,
};
use crate::compression::InputStream;
use crate::error::Result;
use crate::io::write_atomic;
use crate::metadata::{CommonMetadata, MaskSpec, FLT_MIN};
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::types::DataType;
use crate::endian::Endian;
use crate::volume::Volume3D;
use log::debug;
use std::path::Path;

pub(crate) const MAGIC: &[u8] = b"VB98\nCUB1\n";

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "VoxBo CUB1",
    extensions: &["cub"],
    signature: "cub1",
    aliases: &[],
    version: FORMAT_VERSION,
    vector: Capabilities::NONE,
    volume: Capabilities::READ_WRITE,
    series: Capabilities::NONE,
};

/// True when the first two lines of `prefix` are `VB98` and `kind`.
pub(crate) fn has_vb98_magic(prefix: &[u8], kind: &str) -> bool {
    if prefix.len() < 40 {
        return false;
    }
    let mut lines = prefix.split(|&b| b == b'\n');
    lines.next() == Some(b"VB98".as_slice()) && lines.next() == Some(kind.as_bytes())
}

pub struct CubCodec;

/// Apply one header line to `meta`, keeping unknown lines as free text.
fn apply_line(meta: &mut CommonMetadata, line: &str, dtype: &mut Option<DataType>) {
    let (keyword, args) = split_keyword(line);
    match keyword.as_str() {
        "voxdims(xyz)" if args.len() > 2 => {
            meta.dimx = dim_arg(&args, 0);
            meta.dimy = dim_arg(&args, 1);
            meta.dimz = dim_arg(&args, 2);
        }
        "datatype" if !args.is_empty() => *dtype = Some(DataType::parse_name(args[0])),
        "voxsizes(xyz)" if args.len() > 2 => {
            meta.voxsize[0] = float_arg(&args, 0);
            meta.voxsize[1] = float_arg(&args, 1);
            meta.voxsize[2] = float_arg(&args, 2);
        }
        "origin(xyz)" if args.len() > 2 => {
            meta.origin = [
                int_arg(&args, 0) as i32,
                int_arg(&args, 1) as i32,
                int_arg(&args, 2) as i32,
            ];
        }
        "byteorder" if !args.is_empty() => {
            meta.file_byte_order = if args[0].eq_ignore_ascii_case("lsbfirst") {
                Endian::Little
            } else {
                Endian::Big
            };
        }
        "orientation" if !args.is_empty() => meta.orient = args[0].to_string(),
        "scl_slope" => meta.scl_slope = float_arg(&args, 0),
        "scl_inter" => meta.scl_inter = float_arg(&args, 0),
        "vb_maskspec" if args.len() > 4 => {
            let channel = |i: usize| int_arg(&args, i).clamp(0, 255) as u8;
            meta.add_maskspec(
                int_arg(&args, 0) as i32,
                MaskSpec::new((channel(1), channel(2), channel(3)), args[4..].join(" ")),
            );
        }
        _ => meta.add_header(line),
    }
}

impl Codec for CubCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, prefix: &[u8], _path: &Path, _dims: Dimensionality) -> Sniff {
        if has_vb98_magic(prefix, "CUB1") {
            Sniff::Yes
        } else {
            Sniff::No
        }
    }

    fn read_volume_header(&self, volume: &mut Volume3D) -> Result<()> {
        let meta = &mut volume.meta;
        let mut stream = InputStream::open(&meta.filename)?;
        let lines = read_text_header(&mut stream, MAGIC)?;
        meta.header.clear();
        meta.maskspecs.clear();
        let mut dtype = None;
        for line in &lines {
            apply_line(meta, line, &mut dtype);
        }
        meta.datatype = dtype.unwrap_or(DataType::Byte);
        meta.offset = stream.position();
        if meta.scl_slope > FLT_MIN {
            meta.scaled = true;
            meta.alt_datatype = meta.datatype;
        }
        meta.file_format = Some(DESCRIPTOR.signature.to_string());
        meta.header_valid = true;
        debug!(
            "{}: cub1 {}x{}x{} {} at offset {}",
            meta.filename.display(),
            meta.dimx,
            meta.dimy,
            meta.dimz,
            meta.datatype,
            meta.offset
        );
        Ok(())
    }

    fn read_volume_data(&self, volume: &mut Volume3D) -> Result<()> {
        if !volume.meta.header_valid {
            self.read_volume_header(volume)?;
        }
        let (dimx, dimy, dimz) = volume.dims();
        let datatype = volume.datatype();
        volume.allocate(dimx, dimy, dimz, datatype)?;
        let mut stream = InputStream::open(&volume.meta.filename)?;
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
        let disk = volume.disk_image(volume.meta.file_byte_order)?;
        let meta = &disk.meta;

        let mut header = String::from_utf8_lossy(MAGIC).into_owned();
        header.push_str(&format!("DataType: {}\n", meta.datatype.header_name()));
        header.push_str(&format!(
            "VoxDims(XYZ): {} {} {}\n",
            meta.dimx, meta.dimy, meta.dimz
        ));
        format_voxsizes(meta, &mut header);
        format_origin(meta, &mut header);
        header.push_str(&format!("Byteorder: {}\n", meta.file_byte_order.header_name()));
        format_trailer(meta, &mut header);
        header.push_str("\x0c\n");

        write_atomic(&volume.meta.filename, |file| {
            file.write_bytes(header.as_bytes())?;
            file.write_bytes(disk.data())
        })
    }
}
