//! Filename mini-language
//!
//! A volume name may carry overrides after the path:
//!
//! - `brain.img[big]`, `brain.img[little]`: force the file byte order
//!   (`msbfirst`, `lsbfirst` and `small` are accepted too)
//! - `mask.roi[dims/64x64x32]`: force the dimensions
//! - `data.raw[nifti]`: force a format by signature
//! - `run1.nii:3`: select volume 3 of a series
//! - `run1.tes:mask`: derive the presence mask of a series
//!
//! Bracket tokens are separated by any of `/ , ; x` and may be combined,
//! e.g. `foo[cub1,big]`.

use crate::endian::Endian;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which part of a series a 3D read should take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subvolume {
    /// One time point
    Frame(usize),
    /// Presence mask of the series
    Mask,
}

impl fmt::Display for Subvolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subvolume::Frame(t) => write!(f, "{}", t),
            Subvolume::Mask => f.write_str("mask"),
        }
    }
}

/// A filename with its overrides split out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTarget {
    pub path: PathBuf,
    /// Forced format signature
    pub format: Option<String>,
    pub byte_order: Option<Endian>,
    pub dims: Option<[usize; 3]>,
    pub subvolume: Option<Subvolume>,
}

impl ParsedTarget {
    pub fn parse(name: &str) -> Self {
        let mut target = ParsedTarget::default();
        let mut rest = name;

        if let (Some(left), Some(right)) = (rest.rfind('['), rest.rfind(']')) {
            if right > left + 1 && right == rest.len() - 1 {
                let inner = &rest[left + 1..right];
                target.apply_bracket(inner);
                rest = &rest[..left];
            }
        }

        if let Some(colon) = rest.rfind(':') {
            let tag = &rest[colon + 1..];
            if tag.eq_ignore_ascii_case("mask") {
                target.subvolume = Some(Subvolume::Mask);
                rest = &rest[..colon];
            } else if let Ok(t) = tag.parse::<usize>() {
                target.subvolume = Some(Subvolume::Frame(t));
                rest = &rest[..colon];
            }
        }

        target.path = PathBuf::from(rest);
        target
    }

    fn apply_bracket(&mut self, inner: &str) {
        let tokens: Vec<&str> = inner
            .split(|c| matches!(c, '/' | ',' | ';' | 'x'))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "big" | "msbfirst" => self.byte_order = Some(Endian::Big),
                "little" | "small" | "lsbfirst" => self.byte_order = Some(Endian::Little),
                "dims" | "dim" if i + 3 < tokens.len() => {
                    let parsed: Vec<usize> = tokens[i + 1..=i + 3]
                        .iter()
                        .map(|t| t.parse().unwrap_or(0))
                        .collect();
                    self.dims = Some([parsed[0], parsed[1], parsed[2]]);
                    i += 3;
                }
                other => self.format = Some(other.to_ascii_lowercase()),
            }
            i += 1;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl From<&str> for ParsedTarget {
    fn from(name: &str) -> Self {
        ParsedTarget::parse(name)
    }
}
