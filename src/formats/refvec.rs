//! REF1 text vectors: one number per line
//!
//! Lines starting with `;`, `#` or `%` are header lines. Files written here
//! start with `;VB98` and `;REF1`.

use super::FORMAT_VERSION;
use crate::error::{Result, VoxError};
use crate::io::write_atomic;
use crate::registry::{Capabilities, Codec, Dimensionality, FormatDescriptor, Sniff};
use crate::vector::Vector1D;
use log::debug;
use std::fs;
use std::path::Path;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "VoxBo REF1",
    extensions: &["ref"],
    signature: "ref1",
    aliases: &[],
    version: FORMAT_VERSION,
    vector: Capabilities::READ_WRITE,
    volume: Capabilities::NONE,
    series: Capabilities::NONE,
};

const COMMENT_CHARS: [char; 3] = [';', '#', '%'];

pub struct RefCodec;

impl RefCodec {
    /// Structural check of the complete lines in `prefix`.
    fn looks_like_ref(prefix: &[u8]) -> bool {
        if prefix.len() < 2 {
            return false;
        }
        let text = String::from_utf8_lossy(prefix);
        let mut lines: Vec<&str> = text.split('\n').collect();
        // the last piece may be cut off
        lines.pop();
        let mut numbers = 0;
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim_end_matches('\r');
            if line.starts_with(COMMENT_CHARS) {
                i += 1;
                continue;
            }
            if i == 0 && line == "VB98" {
                if lines.get(1).map(|l| l.trim_end_matches('\r')) != Some("REF1") {
                    return false;
                }
                i += 2;
                continue;
            }
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (None, _) => {}
                (Some(token), None) if token.parse::<f64>().is_ok() => numbers += 1,
                _ => return false,
            }
            i += 1;
        }
        numbers > 0
    }
}

impl Codec for RefCodec {
    fn descriptor(&self) -> &FormatDescriptor {
        &DESCRIPTOR
    }

    fn sniff(&self, prefix: &[u8], path: &Path, dims: Dimensionality) -> Sniff {
        if !Self::looks_like_ref(prefix) {
            return Sniff::No;
        }
        // cheap enough to settle here
        if self.confirm(path, dims) {
            Sniff::Yes
        } else {
            Sniff::No
        }
    }

    fn read_vector(&self, vector: &mut Vector1D) -> Result<()> {
        let path = vector.meta.filename.clone();
        let raw = fs::read(&path)?;
        let text = String::from_utf8_lossy(&raw);
        let mut header = Vec::new();
        let mut values = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(COMMENT_CHARS) {
                let rest = line[1..].trim();
                if rest != "VB98" && rest != "REF1" {
                    header.push(rest.to_string());
                }
                continue;
            }
            let value = line.parse::<f64>().map_err(|_| {
                VoxError::CorruptHeader(format!(
                    "{}:{}: not a number: {:?}",
                    path.display(),
                    lineno + 1,
                    line
                ))
            })?;
            values.push(value);
        }
        debug!("{}: ref1 with {} values", path.display(), values.len());
        vector.meta.header = header;
        vector.set_values(values);
        vector.meta.file_format = Some(DESCRIPTOR.signature.to_string());
        vector.meta.header_valid = true;
        Ok(())
    }

    fn write_vector(&self, vector: &Vector1D) -> Result<()> {
        let mut text = String::from(";VB98\n;REF1\n");
        for line in vector.header() {
            text.push_str(&format!("; {}\n", line));
        }
        for value in vector.values() {
            text.push_str(&format!("{}\n", value));
        }
        write_atomic(&vector.meta.filename, |file| file.write_bytes(text.as_bytes()))
    }
}
