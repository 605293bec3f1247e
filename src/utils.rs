//! Utility functions

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Lowercased extension of `path`, looking through a trailing `.gz`.
pub fn format_extension(path: &Path) -> Option<String> {
    let stripped = strip_gz(path);
    stripped
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// `path` without a trailing `.gz`
pub fn strip_gz(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("gz") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Replace the extension, keeping a trailing `.gz` if there was one.
///
/// `brain.img.gz` with `hdr` becomes `brain.hdr.gz`.
pub fn swap_extension(path: &Path, ext: &str) -> PathBuf {
    let gz = strip_gz(path) != path;
    let swapped = strip_gz(path).with_extension(ext);
    if gz {
        append_suffix(&swapped, ".gz")
    } else {
        swapped
    }
}

/// Append `suffix` to the full file name, e.g. `a.cub` + `.txt` = `a.cub.txt`.
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Copy `text` into a fixed-width field, padding with `fill`.
pub(crate) fn put_fixed_str(field: &mut [u8], text: &str, fill: u8) {
    field.fill(fill);
    let bytes = text.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}

/// NUL-terminated text from a fixed-width field
pub(crate) fn get_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim_end().to_string()
}
