//! Element type tag and conversions between raw voxel buffers
//!
//! Voxel data is held as raw native-order bytes tagged with a [`DataType`].
//! The helpers here read and write single elements through `f64` and convert
//! whole buffers between tags.

use crate::error::{Result, VoxError};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types a volume can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    #[default]
    Byte = 0,
    /// Signed 16-bit integer
    Int16 = 1,
    /// Signed 32-bit integer
    Int32 = 2,
    /// 32-bit floating point
    Float32 = 3,
    /// 64-bit floating point
    Float64 = 4,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Byte,
        DataType::Int16,
        DataType::Int32,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Byte => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Parse a type name as found in text headers. Unknown names are bytes.
    pub fn parse_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "integer" | "short" | "int16" => DataType::Int16,
            "long" | "int32" => DataType::Int32,
            "float" => DataType::Float32,
            "double" => DataType::Float64,
            _ => DataType::Byte,
        }
    }

    /// Name written into text headers
    pub fn header_name(&self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::Int16 => "Integer",
            DataType::Int32 => "Long",
            DataType::Float32 => "Float",
            DataType::Float64 => "Double",
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = VoxError;

    fn try_from(value: u8) -> Result<Self> {
        DataType::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| VoxError::UnsupportedType(format!("type code {}", value)))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name())
    }
}

/// Options for in-place type conversion of volumes and series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversionFlags(u8);

impl ConversionFlags {
    pub const NONE: Self = Self(0);
    /// Record the new type as the on-disk (alternate) type
    pub const SET_ALT: Self = Self(0x01);
    /// Drop scale slope and intercept
    pub const NO_SCALE: Self = Self(0x02);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ConversionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A primitive that can live in a voxel buffer
pub trait Element: Copy + AsPrimitive<f64> + 'static {
    const TYPE: DataType;

    fn read_ne(bytes: &[u8]) -> Self;

    fn write_ne(self, out: &mut [u8]);

    /// Store a double. Integer types round to nearest.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $tag:expr, $round:expr) => {
        impl Element for $t {
            const TYPE: DataType = $tag;

            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_ne_bytes(raw)
            }

            #[inline]
            fn write_ne(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                if $round {
                    value.round() as $t
                } else {
                    value as $t
                }
            }
        }
    };
}

impl_element!(u8, DataType::Byte, true);
impl_element!(i16, DataType::Int16, true);
impl_element!(i32, DataType::Int32, true);
impl_element!(f32, DataType::Float32, false);
impl_element!(f64, DataType::Float64, false);

/// Run `$body` with `$T` bound to the primitive behind `$tag`.
macro_rules! with_element {
    ($tag:expr, $T:ident => $body:expr) => {
        match $tag {
            $crate::types::DataType::Byte => {
                type $T = u8;
                $body
            }
            $crate::types::DataType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::types::DataType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::types::DataType::Float32 => {
                type $T = f32;
                $body
            }
            $crate::types::DataType::Float64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use with_element;

/// Widening read of element `index`.
#[inline]
pub fn get_value(buf: &[u8], tag: DataType, index: usize) -> f64 {
    let at = index * tag.size_in_bytes();
    with_element!(tag, T => T::read_ne(&buf[at..]).as_())
}

/// Store `value` at element `index`; integer tags round to nearest.
#[inline]
pub fn set_value(buf: &mut [u8], tag: DataType, index: usize, value: f64) {
    let at = index * tag.size_in_bytes();
    with_element!(tag, T => T::from_f64(value).write_ne(&mut buf[at..]))
}

fn cast_elements<S, D>(src: &[u8], n: usize) -> Vec<u8>
where
    S: Element + AsPrimitive<D>,
    D: Element,
{
    let src_size = std::mem::size_of::<S>();
    let dst_size = std::mem::size_of::<D>();
    let mut out = vec![0u8; n * dst_size];
    for (chunk, dst) in src
        .chunks_exact(src_size)
        .take(n)
        .zip(out.chunks_exact_mut(dst_size))
    {
        let value: D = S::read_ne(chunk).as_();
        value.write_ne(dst);
    }
    out
}

/// Convert `n` elements of `src` from one tag to another.
///
/// This is a plain numeric cast: narrowing from float to integer truncates
/// toward zero (saturating at the type bounds) and does not round.
pub fn convert_buffer(src: &[u8], n: usize, from: DataType, to: DataType) -> Result<Vec<u8>> {
    if src.len() < n * from.size_in_bytes() {
        return Err(VoxError::UnsupportedConversion {
            from: format!("{} ({} bytes)", from, src.len()),
            to: format!("{} x {}", n, to),
        });
    }
    if from == to {
        return Ok(src[..n * from.size_in_bytes()].to_vec());
    }
    Ok(with_element!(from, S => with_element!(to, D => cast_elements::<S, D>(src, n))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::Byte.size_in_bytes(), 1);
        assert_eq!(DataType::Int16.size_in_bytes(), 2);
        assert_eq!(DataType::Int32.size_in_bytes(), 4);
        assert_eq!(DataType::Float32.size_in_bytes(), 4);
        assert_eq!(DataType::Float64.size_in_bytes(), 8);
    }

    #[test]
    fn test_conversion_flags() {
        let both = ConversionFlags::SET_ALT | ConversionFlags::NO_SCALE;
        assert!(both.contains(ConversionFlags::SET_ALT));
        assert!(both.contains(ConversionFlags::NO_SCALE));
        assert!(!ConversionFlags::NONE.contains(ConversionFlags::SET_ALT));
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(DataType::parse_name("Integer"), DataType::Int16);
        assert_eq!(DataType::parse_name("short"), DataType::Int16);
        assert_eq!(DataType::parse_name("LONG"), DataType::Int32);
        assert_eq!(DataType::parse_name("Float"), DataType::Float32);
        assert_eq!(DataType::parse_name("double"), DataType::Float64);
        assert_eq!(DataType::parse_name("complex"), DataType::Byte);
        for tag in DataType::ALL {
            assert_eq!(DataType::parse_name(tag.header_name()), tag);
        }
    }

    #[test]
    fn test_try_from_code() {
        assert_eq!(DataType::try_from(3).unwrap(), DataType::Float32);
        assert!(matches!(
            DataType::try_from(9),
            Err(VoxError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_set_value_rounds_integers() {
        let mut buf = vec![0u8; 8];
        set_value(&mut buf, DataType::Int16, 1, 2.6);
        assert_eq!(get_value(&buf, DataType::Int16, 1), 3.0);
        set_value(&mut buf, DataType::Int16, 0, -2.5);
        assert_eq!(get_value(&buf, DataType::Int16, 0), -3.0);

        set_value(&mut buf, DataType::Float32, 1, 2.6);
        assert!((get_value(&buf, DataType::Float32, 1) - 2.6).abs() < 1e-6);
    }

    #[test]
    fn test_convert_truncates_floats() {
        let mut src = vec![0u8; 3 * 4];
        set_value(&mut src, DataType::Float32, 0, 1.9);
        set_value(&mut src, DataType::Float32, 1, -1.9);
        set_value(&mut src, DataType::Float32, 2, 300.0);

        let out = convert_buffer(&src, 3, DataType::Float32, DataType::Int16).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(get_value(&out, DataType::Int16, 0), 1.0);
        assert_eq!(get_value(&out, DataType::Int16, 1), -1.0);
        assert_eq!(get_value(&out, DataType::Int16, 2), 300.0);

        let bytes = convert_buffer(&src, 3, DataType::Float32, DataType::Byte).unwrap();
        assert_eq!(get_value(&bytes, DataType::Byte, 2), 255.0);
    }

    #[test]
    fn test_convert_widening() {
        let src = vec![7u8, 200u8];
        let out = convert_buffer(&src, 2, DataType::Byte, DataType::Float64).unwrap();
        assert_eq!(get_value(&out, DataType::Float64, 0), 7.0);
        assert_eq!(get_value(&out, DataType::Float64, 1), 200.0);
    }

    #[test]
    fn test_convert_short_source() {
        let src = vec![0u8; 3];
        let err = convert_buffer(&src, 2, DataType::Int16, DataType::Float32).unwrap_err();
        assert!(matches!(err, VoxError::UnsupportedConversion { .. }));
    }
}
