//! Format registry and the codec capability trait
//!
//! Every on-disk format is a [`Codec`]. The process-wide [`registry`] holds
//! the built-in codecs in a fixed order; [`FormatRegistry::builder`] makes
//! custom registries (mostly useful in tests).

use crate::compression::read_prefix;
use crate::error::{Result, VoxError};
use crate::series::VolumeSeries4D;
use crate::utils::format_extension;
use crate::vector::Vector1D;
use crate::volume::Volume3D;
use log::debug;
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;

/// Bytes handed to [`Codec::sniff`]
pub const PREFIX_LEN: usize = 16384;

/// Outcome of a cheap signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Sniff {
    No,
    Maybe,
    Yes,
}

/// Object kinds a codec can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimensionality {
    Vector = 1,
    Volume = 3,
    Series = 4,
}

/// Operations a codec supports for one dimensionality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub sniff: bool,
    pub read_header: bool,
    pub read_data: bool,
    pub write: bool,
    pub read_frame: bool,
    pub read_timeseries: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        sniff: false,
        read_header: false,
        read_data: false,
        write: false,
        read_frame: false,
        read_timeseries: false,
    };

    /// Sniff, header and data
    pub const READ: Self = Self {
        sniff: true,
        read_header: true,
        read_data: true,
        ..Self::NONE
    };

    pub const READ_WRITE: Self = Self {
        write: true,
        ..Self::READ
    };

    pub const WRITE_ONLY: Self = Self {
        write: true,
        ..Self::NONE
    };

    pub const fn with_frames(self) -> Self {
        Self {
            read_frame: true,
            read_timeseries: true,
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// Static description of a format
#[derive(Debug, Clone)]
pub struct FormatDescriptor {
    pub name: &'static str,
    /// Lowercase extensions without the dot
    pub extensions: &'static [&'static str],
    pub signature: &'static str,
    pub aliases: &'static [&'static str],
    pub version: &'static str,
    pub vector: Capabilities,
    pub volume: Capabilities,
    pub series: Capabilities,
}

impl FormatDescriptor {
    pub fn capabilities(&self, dims: Dimensionality) -> Capabilities {
        match dims {
            Dimensionality::Vector => self.vector,
            Dimensionality::Volume => self.volume,
            Dimensionality::Series => self.series,
        }
    }

    pub fn handles(&self, dims: Dimensionality) -> bool {
        !self.capabilities(dims).is_empty()
    }

    /// Signature or alias match, case-insensitive
    pub fn matches_signature(&self, sig: &str) -> bool {
        self.signature.eq_ignore_ascii_case(sig)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(sig))
    }

    /// Extension match, looking through `.gz`
    pub fn matches_extension(&self, path: &Path) -> bool {
        match format_extension(path) {
            Some(ext) => self.extensions.iter().any(|e| *e == ext),
            None => false,
        }
    }
}

fn unsupported(descriptor: &FormatDescriptor, what: &str) -> VoxError {
    VoxError::Unsupported(format!("{} cannot {}", descriptor.name, what))
}

/// One format's readers and writers
///
/// Only [`descriptor`](Codec::descriptor) and [`sniff`](Codec::sniff) are
/// required. The rest default to [`VoxError::Unsupported`]; a codec
/// overrides what its descriptor advertises. Readers take the path from
/// `meta.filename` and writers write to it.
pub trait Codec: Send + Sync {
    fn descriptor(&self) -> &FormatDescriptor;

    /// Cheap check of the leading bytes of `path` (possibly fewer than
    /// [`PREFIX_LEN`], empty for directories).
    fn sniff(&self, prefix: &[u8], path: &Path, dims: Dimensionality) -> Sniff;

    fn read_vector(&self, _vector: &mut Vector1D) -> Result<()> {
        Err(unsupported(self.descriptor(), "read vectors"))
    }

    fn write_vector(&self, _vector: &Vector1D) -> Result<()> {
        Err(unsupported(self.descriptor(), "write vectors"))
    }

    fn read_volume_header(&self, _volume: &mut Volume3D) -> Result<()> {
        Err(unsupported(self.descriptor(), "read 3D headers"))
    }

    fn read_volume_data(&self, _volume: &mut Volume3D) -> Result<()> {
        Err(unsupported(self.descriptor(), "read 3D data"))
    }

    fn write_volume(&self, _volume: &Volume3D) -> Result<()> {
        Err(unsupported(self.descriptor(), "write 3D data"))
    }

    fn read_series_header(&self, _series: &mut VolumeSeries4D) -> Result<()> {
        Err(unsupported(self.descriptor(), "read 4D headers"))
    }

    /// Read all time points, or only `range` when given.
    fn read_series_data(
        &self,
        _series: &mut VolumeSeries4D,
        _range: Option<Range<usize>>,
    ) -> Result<()> {
        Err(unsupported(self.descriptor(), "read 4D data"))
    }

    fn write_series(&self, _series: &VolumeSeries4D) -> Result<()> {
        Err(unsupported(self.descriptor(), "write 4D data"))
    }

    /// One time point of a series whose header has been read
    fn read_frame(&self, _series: &VolumeSeries4D, _t: usize) -> Result<Volume3D> {
        Err(unsupported(self.descriptor(), "read single frames"))
    }

    /// One voxel's time course of a series whose header has been read
    fn read_timeseries(
        &self,
        _series: &VolumeSeries4D,
        _x: usize,
        _y: usize,
        _z: usize,
    ) -> Result<Vec<f64>> {
        Err(unsupported(self.descriptor(), "read single time series"))
    }

    /// Settle a `Maybe` sniff by parsing the header.
    fn confirm(&self, path: &Path, dims: Dimensionality) -> bool {
        let result = match dims {
            Dimensionality::Vector => {
                let mut vector = Vector1D::new();
                vector.meta.filename = path.to_path_buf();
                self.read_vector(&mut vector)
            }
            Dimensionality::Volume => {
                let mut volume = Volume3D::new();
                volume.meta.filename = path.to_path_buf();
                self.read_volume_header(&mut volume)
            }
            Dimensionality::Series => {
                let mut series = VolumeSeries4D::new();
                series.meta.filename = path.to_path_buf();
                self.read_series_header(&mut series)
            }
        };
        result.is_ok()
    }
}

/// An ordered, immutable list of codecs
pub struct FormatRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

#[derive(Default)]
pub struct FormatRegistryBuilder {
    codecs: Vec<Box<dyn Codec>>,
}

impl FormatRegistryBuilder {
    pub fn register(mut self, codec: impl Codec + 'static) -> Self {
        self.codecs.push(Box::new(codec));
        self
    }

    pub fn build(self) -> FormatRegistry {
        FormatRegistry {
            codecs: self.codecs,
        }
    }
}

impl FormatRegistry {
    pub fn builder() -> FormatRegistryBuilder {
        FormatRegistryBuilder::default()
    }

    pub fn codecs(&self) -> impl Iterator<Item = &dyn Codec> {
        self.codecs.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn find_by_signature(&self, sig: &str) -> Option<&dyn Codec> {
        self.codecs()
            .find(|c| c.descriptor().matches_signature(sig))
    }

    /// First codec that writes `dims` and claims the extension of `path`
    pub fn find_writer_by_extension(&self, path: &Path, dims: Dimensionality) -> Option<&dyn Codec> {
        self.codecs().find(|c| {
            let d = c.descriptor();
            d.capabilities(dims).write && d.matches_extension(path)
        })
    }

    /// Codecs that can read `path` as `dims`, best first.
    ///
    /// Extension matches rank first, then definite sniffs, then `Maybe`
    /// sniffs confirmed by a header parse. Ties keep registry order.
    pub fn resolve_candidates(&self, path: &Path, dims: Dimensionality) -> Vec<&dyn Codec> {
        let prefix = read_prefix(path, PREFIX_LEN);
        let mut ranked: Vec<(bool, Sniff, usize, &dyn Codec)> = Vec::new();
        for (order, codec) in self.codecs().enumerate() {
            let descriptor = codec.descriptor();
            if !descriptor.capabilities(dims).sniff {
                continue;
            }
            let sniff = codec.sniff(&prefix, path, dims);
            let sniff = match sniff {
                Sniff::No => continue,
                Sniff::Maybe if !codec.confirm(path, dims) => {
                    debug!("{}: unconfirmed maybe from {}", path.display(), descriptor.signature);
                    continue;
                }
                other => other,
            };
            ranked.push((descriptor.matches_extension(path), sniff, order, codec));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        let candidates: Vec<&dyn Codec> = ranked.into_iter().map(|(_, _, _, c)| c).collect();
        debug!(
            "{} as {:?}: candidates [{}]",
            path.display(),
            dims,
            candidates
                .iter()
                .map(|c| c.descriptor().signature)
                .collect::<Vec<_>>()
                .join(", ")
        );
        candidates
    }
}

/// The process-wide registry of built-in formats
pub fn registry() -> &'static FormatRegistry {
    static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();
    REGISTRY.get_or_init(crate::formats::builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fake {
        descriptor: FormatDescriptor,
        answer: Sniff,
        parses: bool,
    }

    impl Fake {
        fn new(sig: &'static str, ext: &'static [&'static str], answer: Sniff, parses: bool) -> Self {
            Self {
                descriptor: FormatDescriptor {
                    name: sig,
                    extensions: ext,
                    signature: sig,
                    aliases: &[],
                    version: "1.0",
                    vector: Capabilities::NONE,
                    volume: Capabilities::READ_WRITE,
                    series: Capabilities::NONE,
                },
                answer,
                parses,
            }
        }
    }

    impl Codec for Fake {
        fn descriptor(&self) -> &FormatDescriptor {
            &self.descriptor
        }

        fn sniff(&self, _prefix: &[u8], _path: &Path, _dims: Dimensionality) -> Sniff {
            self.answer
        }

        fn read_volume_header(&self, _volume: &mut Volume3D) -> Result<()> {
            if self.parses {
                Ok(())
            } else {
                Err(VoxError::NotThisFormat("fake".to_string()))
            }
        }
    }

    #[test]
    fn test_ranking() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.bbb.gz");
        fs::write(&path, b"anything").unwrap();

        let reg = FormatRegistry::builder()
            .register(Fake::new("aaa", &["aaa"], Sniff::Maybe, true))
            .register(Fake::new("nope", &["bbb"], Sniff::No, true))
            .register(Fake::new("ccc", &["ccc"], Sniff::Yes, true))
            .register(Fake::new("bad", &["ddd"], Sniff::Maybe, false))
            .register(Fake::new("bbb", &["bbb"], Sniff::Maybe, true))
            .build();

        let order: Vec<&str> = reg
            .resolve_candidates(&path, Dimensionality::Volume)
            .iter()
            .map(|c| c.descriptor().signature)
            .collect();
        assert_eq!(order, vec!["bbb", "ccc", "aaa"]);

        // deterministic
        for _ in 0..3 {
            let again: Vec<&str> = reg
                .resolve_candidates(&path, Dimensionality::Volume)
                .iter()
                .map(|c| c.descriptor().signature)
                .collect();
            assert_eq!(again, order);
        }

        assert!(reg.resolve_candidates(&path, Dimensionality::Series).is_empty());
    }

    #[test]
    fn test_lookup() {
        let reg = FormatRegistry::builder()
            .register(Fake::new("aaa", &["aaa", "aa"], Sniff::No, true))
            .build();
        assert!(reg.find_by_signature("AAA").is_some());
        assert!(reg.find_by_signature("zzz").is_none());
        assert!(reg
            .find_writer_by_extension(Path::new("x/out.AA.gz"), Dimensionality::Volume)
            .is_some());
        assert!(reg
            .find_writer_by_extension(Path::new("out.aa"), Dimensionality::Series)
            .is_none());
    }

    #[test]
    fn test_builtin_order() {
        let sigs: Vec<&str> = registry().codecs().map(|c| c.descriptor().signature).collect();
        assert_eq!(
            sigs,
            vec!["cub1", "tes1", "ref1", "img", "nifti", "roi", "ge", "vmp3d"]
        );
        assert!(registry().find_by_signature("nifti4d").is_some());
        assert!(registry().find_by_signature("img3d").is_some());
    }
}
