//! voxio - 3D/4D image volumes and their legacy file formats
//!
//! A uniform in-memory model for scientific image volumes plus a registry of
//! codecs that move that model to and from disk.
//!
//! # Features
//!
//! - Dense 3D volumes, sparse 4D series and 1D vectors
//! - NIfTI-1, Analyze 7.5, CUB1/TES1/REF1, MRIcro ROI, GE slice directories
//!   and BrainVoyager VMP output
//! - Format detection by extension and signature, with fallback
//! - Transparent gzip on read, `.gz` output on write
//! - Atomic replace of every file written
//!
//! # Filenames
//!
//! Names may carry overrides, e.g. `brain.img[big]`, `run.nii:3`,
//! `run.tes:mask` or `lesion.roi[dims/91x109x91]`. See [`target`].
//!
//! # Example
//!
//! ```rust,ignore
//! use voxio::{Volume3D, VolumeSeries4D};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut anat = Volume3D::new();
//! anat.read_file("subject01/anat.nii.gz")?;
//! anat.write_file(Some("anat.cub"))?;
//!
//! let mut run = VolumeSeries4D::new();
//! run.read_header("subject01/run1.nii")?;
//! let course = run.read_timeseries(32, 32, 20)?;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod compression;
pub mod endian;
pub mod error;
pub mod formats;
pub mod io;
pub mod metadata;
pub mod registry;
pub mod series;
pub mod target;
pub mod types;
pub mod utils;
pub mod vector;
pub mod volume;

// Re-exports
pub use compression::{CompressionMethod, InputStream};
pub use endian::Endian;
pub use error::{Result, VoxError};
pub use io::AtomicFile;
pub use metadata::{ColorCycle, CommonMetadata, MaskSpec, SpatialTransform};
pub use registry::{registry, Codec, Dimensionality, FormatDescriptor, FormatRegistry, Sniff};
pub use series::VolumeSeries4D;
pub use target::{ParsedTarget, Subvolume};
pub use types::{ConversionFlags, DataType};
pub use vector::Vector1D;
pub use volume::Volume3D;

/// Version of the voxio implementation
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_builtin_registry() {
        let names: Vec<&str> = registry().codecs().map(|c| c.descriptor().signature).collect();
        assert_eq!(
            names,
            vec!["cub1", "tes1", "ref1", "img", "nifti", "roi", "ge", "vmp3d"]
        );
        assert!(registry().find_by_signature("NII").is_some());
        assert!(registry().find_by_signature("img4d").is_some());
    }
}
