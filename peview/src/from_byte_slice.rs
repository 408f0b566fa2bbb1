/// A fixed-size value stored little-endian and unaligned within a byte buffer.
///
/// `from_le_byte_slice` and `write_le_byte_slice` may assume that the slice is at least
/// [`SIZE`](FromByteSlice::SIZE) bytes long; callers are responsible for the bounds check.
pub trait FromByteSlice: Copy {
    const SIZE: usize;

    fn from_le_byte_slice(bytes: &[u8]) -> Self;
    fn write_le_byte_slice(&self, bytes: &mut [u8]);
}

macro_rules! impl_fbs {
    ($type:ty) => {
        impl FromByteSlice for $type {
            const SIZE: usize = core::mem::size_of::<$type>();

            fn from_le_byte_slice(bytes: &[u8]) -> Self {
                Self::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
            }

            fn write_le_byte_slice(&self, bytes: &mut [u8]) {
                bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}
impl_fbs!(u8);
impl_fbs!(u16);
impl_fbs!(u32);
impl_fbs!(u64);
impl_fbs!(i8);
impl_fbs!(i16);
impl_fbs!(i32);
impl_fbs!(i64);

impl<const N: usize> FromByteSlice for [u8; N] {
    const SIZE: usize = N;

    fn from_le_byte_slice(bytes: &[u8]) -> Self {
        bytes[..N].try_into().unwrap()
    }

    fn write_le_byte_slice(&self, bytes: &mut [u8]) {
        bytes[..N].copy_from_slice(self);
    }
}
