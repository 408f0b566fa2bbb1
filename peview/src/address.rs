use std::fmt;

use crate::from_byte_slice::FromByteSlice;


/// Relative virtual address: an offset from the image base once the image is mapped.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Rva(pub u32);

/// Byte offset within the buffer as given (on-disk layout for file images).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FileOffset(pub u32);

macro_rules! impl_address {
    ($name:ident) => {
        impl $name {
            pub const fn as_u32(self) -> u32 { self.0 }
            pub const fn as_usize(self) -> usize { self.0 as usize }
            pub const fn is_null(self) -> bool { self.0 == 0 }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010X}", self.0)
            }
        }
        impl From<u32> for $name {
            fn from(value: u32) -> Self { Self(value) }
        }
        impl From<$name> for u32 {
            fn from(value: $name) -> Self { value.0 }
        }
        impl FromByteSlice for $name {
            const SIZE: usize = 4;

            fn from_le_byte_slice(bytes: &[u8]) -> Self {
                Self(u32::from_le_byte_slice(bytes))
            }

            fn write_le_byte_slice(&self, bytes: &mut [u8]) {
                self.0.write_le_byte_slice(bytes)
            }
        }
    };
}
impl_address!(Rva);
impl_address!(FileOffset);


/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` is expected to be a power of two, as PE alignments are; an alignment of 0 leaves
/// the value unchanged. The result wraps on overflow just like the loader's arithmetic does.
pub const fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.wrapping_add(alignment - 1) & !(alignment - 1)
}

/// [`align_up`] computed in 64 bits, for range ends that must not wrap.
pub const fn align_up_u64(value: u64, alignment: u32) -> u64 {
    if alignment == 0 {
        return value;
    }
    let alignment = alignment as u64;
    (value + alignment - 1) & !(alignment - 1)
}


#[cfg(test)]
mod tests {
    use super::{align_up, align_up_u64, FileOffset, Rva};

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x1000), 0x1000);
        assert_eq!(align_up(0x1234, 0), 0x1234);
        assert_eq!(align_up_u64(0xFFFF_F001, 0x1000), 0x1_0000_0000);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rva(0x1000).to_string(), "0x00001000");
        assert_eq!(FileOffset(0x3C).to_string(), "0x0000003C");
    }
}
