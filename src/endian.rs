//! Byte order detection and swapping

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Byte order of data in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Order of the running machine, probed once.
    pub fn native() -> Self {
        static NATIVE: OnceLock<Endian> = OnceLock::new();
        *NATIVE.get_or_init(|| {
            if 1u16.to_ne_bytes()[0] == 1 {
                Endian::Little
            } else {
                Endian::Big
            }
        })
    }

    pub fn is_native(self) -> bool {
        self == Endian::native()
    }

    pub fn flipped(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    /// Keyword used by the text headers
    pub fn header_name(self) -> &'static str {
        match self {
            Endian::Big => "msbfirst",
            Endian::Little => "lsbfirst",
        }
    }

    pub fn read_i16(self, buf: &[u8]) -> i16 {
        match self {
            Endian::Little => LittleEndian::read_i16(buf),
            Endian::Big => BigEndian::read_i16(buf),
        }
    }

    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn read_i32(self, buf: &[u8]) -> i32 {
        match self {
            Endian::Little => LittleEndian::read_i32(buf),
            Endian::Big => BigEndian::read_i32(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn read_f32(self, buf: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(buf),
            Endian::Big => BigEndian::read_f32(buf),
        }
    }

    pub fn read_f64(self, buf: &[u8]) -> f64 {
        match self {
            Endian::Little => LittleEndian::read_f64(buf),
            Endian::Big => BigEndian::read_f64(buf),
        }
    }

    pub fn write_i16(self, buf: &mut [u8], value: i16) {
        match self {
            Endian::Little => LittleEndian::write_i16(buf, value),
            Endian::Big => BigEndian::write_i16(buf, value),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], value: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(buf, value),
            Endian::Big => BigEndian::write_u16(buf, value),
        }
    }

    pub fn write_i32(self, buf: &mut [u8], value: i32) {
        match self {
            Endian::Little => LittleEndian::write_i32(buf, value),
            Endian::Big => BigEndian::write_i32(buf, value),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, value),
            Endian::Big => BigEndian::write_u32(buf, value),
        }
    }

    pub fn write_f32(self, buf: &mut [u8], value: f32) {
        match self {
            Endian::Little => LittleEndian::write_f32(buf, value),
            Endian::Big => BigEndian::write_f32(buf, value),
        }
    }

    pub fn write_f64(self, buf: &mut [u8], value: f64) {
        match self {
            Endian::Little => LittleEndian::write_f64(buf, value),
            Endian::Big => BigEndian::write_f64(buf, value),
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::native()
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name())
    }
}

/// Reverse the bytes of `count` primitives of `width` bytes each.
///
/// Widths other than 2, 4 and 8 leave the buffer untouched.
pub fn swap_in_place(buf: &mut [u8], width: usize, count: usize) {
    if !matches!(width, 2 | 4 | 8) {
        return;
    }
    for chunk in buf.chunks_exact_mut(width).take(count) {
        chunk.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_matches_target() {
        let expected = if cfg!(target_endian = "little") {
            Endian::Little
        } else {
            Endian::Big
        };
        assert_eq!(Endian::native(), expected);
        assert!(Endian::native().is_native());
        assert!(!Endian::native().flipped().is_native());
    }

    #[test]
    fn test_swap_widths() {
        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_in_place(&mut buf, 2, 4);
        assert_eq!(buf, vec![2, 1, 4, 3, 6, 5, 8, 7]);

        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_in_place(&mut buf, 4, 1);
        assert_eq!(buf, vec![4, 3, 2, 1, 5, 6, 7, 8]);

        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_in_place(&mut buf, 8, 1);
        assert_eq!(buf, vec![8, 7, 6, 5, 4, 3, 2, 1]);

        let mut buf = vec![1u8, 2, 3];
        swap_in_place(&mut buf, 1, 3);
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_field_access() {
        let mut buf = [0u8; 4];
        Endian::Big.write_i16(&mut buf, 348);
        assert_eq!(buf[..2], [0x01, 0x5c]);
        assert_eq!(Endian::Big.read_i16(&buf), 348);
        assert_ne!(Endian::Little.read_i16(&buf), 348);

        Endian::Little.write_f32(&mut buf, 1.5);
        assert_eq!(Endian::Little.read_f32(&buf), 1.5);
    }
}
