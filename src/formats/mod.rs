//! Built-in codecs
//!
//! Registry order matters: it breaks ties between equally ranked
//! candidates, so the native formats come first.

pub mod analyze;
pub mod cub;
pub mod ge;
pub mod nifti;
pub mod refvec;
pub mod roi;
pub mod tes;
pub mod vmp;

use crate::compression::InputStream;
use crate::error::{Result, VoxError};
use crate::metadata::CommonMetadata;
use crate::registry::FormatRegistry;
use std::io::BufRead;

pub use analyze::AnalyzeCodec;
pub use cub::CubCodec;
pub use ge::GeCodec;
pub use nifti::NiftiCodec;
pub use refvec::RefCodec;
pub use roi::RoiCodec;
pub use tes::TesCodec;
pub use vmp::VmpCodec;

/// Version string reported by the built-in descriptors
pub(crate) const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry with every built-in codec
pub fn builtin() -> FormatRegistry {
    FormatRegistry::builder()
        .register(CubCodec)
        .register(TesCodec)
        .register(RefCodec)
        .register(AnalyzeCodec)
        .register(NiftiCodec)
        .register(RoiCodec)
        .register(GeCodec)
        .register(VmpCodec)
        .build()
}

/// Lines of a `VB98` text header.
///
/// Checks the 10-byte magic, then collects lines up to the form-feed line.
/// The stream is left just past the form feed line.
pub(crate) fn read_text_header(stream: &mut InputStream, magic: &[u8]) -> Result<Vec<String>> {
    let mut leading = vec![0u8; magic.len()];
    let got = stream.read_up_to(&mut leading)?;
    if got < magic.len() || leading != magic {
        return Err(VoxError::NotThisFormat(format!(
            "{} does not start with {:?}",
            stream.path().display(),
            String::from_utf8_lossy(magic)
        )));
    }
    let mut lines = Vec::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if stream.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        if raw.first() == Some(&0x0c) {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    Ok(lines)
}

/// Split a header line into a keyword (lowercased, trailing `:` removed)
/// and its whitespace-separated arguments.
pub(crate) fn split_keyword(line: &str) -> (String, Vec<&str>) {
    let mut tokens = line.split_whitespace();
    let keyword = tokens
        .next()
        .unwrap_or("")
        .trim_end_matches(':')
        .to_ascii_lowercase();
    (keyword, tokens.collect())
}

/// Lenient integer parse: leading garbage gives 0, like `strtol`.
pub(crate) fn int_arg(args: &[&str], i: usize) -> i64 {
    args.get(i)
        .and_then(|s| s.parse::<f64>().ok())
        .map_or(0, |v| v as i64)
}

pub(crate) fn float_arg(args: &[&str], i: usize) -> f64 {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0.0)
}

pub(crate) fn dim_arg(args: &[&str], i: usize) -> usize {
    int_arg(args, i).max(0) as usize
}

/// Header lines shared by the text formats after the geometry lines:
/// orientation, scale, mask specs and free lines.
pub(crate) fn format_trailer(meta: &CommonMetadata, out: &mut String) {
    out.push_str(&format!("Orientation: {}\n", meta.orient));
    if meta.scaled {
        out.push_str(&format!("scl_slope: {}\n", meta.scl_slope));
        out.push_str(&format!("scl_inter: {}\n", meta.scl_inter));
    }
    for (index, spec) in &meta.maskspecs {
        out.push_str(&format!(
            "vb_maskspec: {} {} {} {} {}\n",
            index, spec.r, spec.g, spec.b, spec.name
        ));
    }
    for line in &meta.header {
        out.push_str(line);
        out.push('\n');
    }
}

/// Voxel sizes line, written only when the sizes sum positive
pub(crate) fn format_voxsizes(meta: &CommonMetadata, out: &mut String) {
    if meta.voxsize[0] + meta.voxsize[1] + meta.voxsize[2] > 0.0 {
        out.push_str(&format!(
            "VoxSizes(XYZ): {:.4} {:.4} {:.4}\n",
            meta.voxsize[0], meta.voxsize[1], meta.voxsize[2]
        ));
    }
}

pub(crate) fn format_origin(meta: &CommonMetadata, out: &mut String) {
    if meta.origin[0] + meta.origin[1] + meta.origin[2] > 0 {
        out.push_str(&format!(
            "Origin(XYZ): {} {} {}\n",
            meta.origin[0], meta.origin[1], meta.origin[2]
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_text_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("h.cub");
        fs::write(&path, b"VB98\nCUB1\nDataType: Float\nNote: hi there\r\n\x0c\nDATA").unwrap();

        let mut stream = InputStream::open(&path).unwrap();
        let lines = read_text_header(&mut stream, b"VB98\nCUB1\n").unwrap();
        assert_eq!(lines, vec!["DataType: Float", "Note: hi there"]);
        assert_eq!(stream.position(), 44);

        let mut stream = InputStream::open(&path).unwrap();
        let err = read_text_header(&mut stream, b"VB98\nTES1\n").unwrap_err();
        assert!(err.is_not_this_format());
    }

    #[test]
    fn test_split_keyword() {
        let (kw, args) = split_keyword("VoxDims(TXYZ):  5 4 3 2");
        assert_eq!(kw, "voxdims(txyz)");
        assert_eq!(args, vec!["5", "4", "3", "2"]);
        assert_eq!(int_arg(&args, 1), 4);
        assert_eq!(int_arg(&args, 9), 0);
        assert_eq!(float_arg(&["2.5"], 0), 2.5);
        assert_eq!(split_keyword("").0, "");
    }
}
