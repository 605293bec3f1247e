//! Error types for volume I/O

use thiserror::Error;

/// Main error type for volume and codec operations
#[derive(Error, Debug)]
pub enum VoxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not in the format the codec handles. The registry
    /// moves on to the next candidate when it sees this one.
    #[error("Not this format: {0}")]
    NotThisFormat(String),

    #[error("Truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedType(String),

    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: String, to: String },

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("No format found for {0}")]
    NoFormat(String),
}

impl VoxError {
    /// Stable numeric code, for callers that report failures as numbers.
    pub fn code(&self) -> u32 {
        match self {
            VoxError::Io(_) => 100,
            VoxError::NotThisFormat(_) => 101,
            VoxError::TruncatedData { .. } => 102,
            VoxError::UnsupportedType(_) => 105,
            VoxError::CorruptHeader(_) => 106,
            VoxError::UnsupportedConversion { .. } => 107,
            VoxError::InvalidDimensions(_) => 110,
            VoxError::Unsupported(_) => 120,
            VoxError::NoFormat(_) => 130,
        }
    }

    pub fn is_not_this_format(&self) -> bool {
        matches!(self, VoxError::NotThisFormat(_))
    }

    pub(crate) fn truncated(expected: usize, actual: usize) -> Self {
        VoxError::TruncatedData { expected, actual }
    }
}

/// Specialized Result type for volume operations
pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            VoxError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")),
            VoxError::NotThisFormat("x".into()),
            VoxError::truncated(4, 2),
            VoxError::UnsupportedType("x".into()),
            VoxError::CorruptHeader("x".into()),
            VoxError::UnsupportedConversion {
                from: "a".into(),
                to: "b".into(),
            },
            VoxError::InvalidDimensions("x".into()),
            VoxError::Unsupported("x".into()),
            VoxError::NoFormat("x".into()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_truncated_message() {
        let err = VoxError::truncated(348, 10);
        assert_eq!(
            err.to_string(),
            "Truncated data: expected 348 bytes, got 10"
        );
        assert!(!err.is_not_this_format());
        assert!(VoxError::NotThisFormat("nope".into()).is_not_this_format());
    }
}
