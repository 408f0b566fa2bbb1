//! Bounds-checked windows into image bytes.
//!
//! A [`Segment`] is an `(origin, index, length)` triple. The origin is either a shared, owned,
//! resizable buffer or a raw pointer whose validity the creator vouches for. Cloning a segment
//! never copies bytes; every slice of a segment shares its origin.


use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use display_bytes::DisplayBytesSlice;

use crate::error::Error;
use crate::from_byte_slice::FromByteSlice;


const DEBUG_PREFIX_LENGTH: usize = 0x40;


#[derive(Clone)]
enum Origin {
    Owned(Rc<RefCell<Vec<u8>>>),
    Raw { pointer: NonNull<u8>, writable: bool },
}


#[derive(Clone, Default)]
pub struct Segment {
    origin: Option<Origin>,
    index: usize,
    length: usize,
}
impl Segment {
    /// Wraps an owned buffer. The segment spans the whole buffer.
    pub fn new(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        Self {
            origin: Some(Origin::Owned(Rc::new(RefCell::new(buffer)))),
            index: 0,
            length,
        }
    }

    /// Wraps an owned buffer, spanning `length` bytes starting at `index`.
    pub fn with_range(buffer: Vec<u8>, index: usize, length: usize) -> Result<Self, Error> {
        let available = buffer.len();
        if index > available || length > available - index {
            return Err(Error::InvalidRange { index, length, available });
        }
        let mut segment = Self::new(buffer);
        segment.index = index;
        segment.length = length;
        Ok(segment)
    }

    /// Wraps read-only memory that the segment does not own.
    ///
    /// # Safety
    ///
    /// `pointer` must be valid for reads of `length` bytes for as long as this segment or any
    /// segment derived from it is alive, and the memory must not be written through other means
    /// in the meantime.
    pub unsafe fn from_raw_parts(pointer: *const u8, length: usize) -> Self {
        Self::from_raw(pointer.cast_mut(), length, false)
    }

    /// Wraps writable memory that the segment does not own.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_parts`](Segment::from_raw_parts); additionally, `pointer` must be valid
    /// for writes of `length` bytes.
    pub unsafe fn from_raw_parts_mut(pointer: *mut u8, length: usize) -> Self {
        Self::from_raw(pointer, length, true)
    }

    fn from_raw(pointer: *mut u8, length: usize, writable: bool) -> Self {
        assert!(length <= isize::MAX as usize, "raw segment length {:#X} too large", length);
        match NonNull::new(pointer) {
            Some(pointer) => Self {
                origin: Some(Origin::Raw { pointer, writable }),
                index: 0,
                length,
            },
            None => {
                assert!(length == 0, "null pointer with nonzero length {:#X}", length);
                Self::default()
            },
        }
    }

    /// Offset of this window from the start of its origin.
    pub fn index(&self) -> usize { self.index }
    pub fn len(&self) -> usize { self.length }
    pub fn is_empty(&self) -> bool { self.length == 0 }

    pub fn is_raw(&self) -> bool {
        matches!(self.origin, Some(Origin::Raw { .. }))
    }

    pub fn is_writable(&self) -> bool {
        match &self.origin {
            Some(Origin::Owned(_)) => true,
            Some(Origin::Raw { writable, .. }) => *writable,
            None => false,
        }
    }

    /// Whether both segments are windows into the same backing storage.
    pub fn shares_origin_with(&self, other: &Segment) -> bool {
        match (&self.origin, &other.origin) {
            (Some(Origin::Owned(a)), Some(Origin::Owned(b))) => Rc::ptr_eq(a, b),
            (Some(Origin::Raw { pointer: a, .. }), Some(Origin::Raw { pointer: b, .. })) => a == b,
            _ => false,
        }
    }

    fn sub(&self, start: usize, length: usize) -> Option<Self> {
        if start > self.length || length > self.length - start {
            return None;
        }
        Some(Self {
            origin: self.origin.clone(),
            index: self.index + start,
            length,
        })
    }

    /// The window from `start` to the end.
    ///
    /// # Panics
    ///
    /// Panics if `start` is past the end.
    pub fn slice(&self, start: usize) -> Self {
        let length = self.length.checked_sub(start)
            .unwrap_or_else(|| panic!("slice start {:#X} out of range for segment of length {:#X}", start, self.length));
        self.slice_len(start, length)
    }

    /// The window of `length` bytes starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if the window does not fit.
    pub fn slice_len(&self, start: usize, length: usize) -> Self {
        match self.sub(start, length) {
            Some(segment) => segment,
            None => panic!(
                "slice of {:#X} bytes at {:#X} out of range for segment of length {:#X}",
                length, start, self.length,
            ),
        }
    }

    /// Like [`slice`](Segment::slice) but returns an empty segment instead of panicking.
    pub fn try_slice(&self, start: usize) -> Self {
        match self.length.checked_sub(start) {
            Some(length) => self.try_slice_len(start, length),
            None => Self::default(),
        }
    }

    /// Like [`slice_len`](Segment::slice_len) but returns an empty segment instead of panicking.
    pub fn try_slice_len(&self, start: usize, length: usize) -> Self {
        self.sub(start, length)
            .unwrap_or_default()
    }

    /// Runs `f` over the bytes of this window.
    ///
    /// If an owned origin has been truncated since this segment was taken, `f` only sees the
    /// bytes that still exist.
    pub fn with_bytes<R, F: FnOnce(&[u8]) -> R>(&self, f: F) -> R {
        match &self.origin {
            None => f(&[]),
            Some(Origin::Owned(buffer)) => {
                let buffer = buffer.borrow();
                let end = (self.index + self.length).min(buffer.len());
                let start = self.index.min(end);
                f(&buffer[start..end])
            },
            Some(Origin::Raw { pointer, .. }) => {
                // SAFETY: the creator of the raw origin guarantees that the whole original range
                // is readable, and every derived window lies within it
                let bytes = unsafe {
                    std::slice::from_raw_parts(pointer.as_ptr().add(self.index), self.length)
                };
                f(bytes)
            },
        }
    }

    /// Runs `f` over the bytes of this window mutably; `None` if the origin is read-only.
    fn with_bytes_mut<R, F: FnOnce(&mut [u8]) -> R>(&mut self, f: F) -> Option<R> {
        match &self.origin {
            None => Some(f(&mut [])),
            Some(Origin::Owned(buffer)) => {
                let mut buffer = buffer.borrow_mut();
                let end = (self.index + self.length).min(buffer.len());
                let start = self.index.min(end);
                Some(f(&mut buffer[start..end]))
            },
            Some(Origin::Raw { writable: false, .. }) => None,
            Some(Origin::Raw { pointer, writable: true }) => {
                // SAFETY: the creator of a writable raw origin guarantees that the whole original
                // range is writable, and no other reference into it is alive while `f` runs
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(pointer.as_ptr().add(self.index), self.length)
                };
                Some(f(bytes))
            },
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(|bytes| bytes.to_vec())
    }

    /// Reads a `T` at `offset` if it fits entirely within the window.
    pub fn try_read<T: FromByteSlice>(&self, offset: usize) -> Option<T> {
        self.with_bytes(|bytes| {
            let end = offset.checked_add(T::SIZE)?;
            if end > bytes.len() {
                return None;
            }
            Some(T::from_le_byte_slice(&bytes[offset..end]))
        })
    }

    /// # Panics
    ///
    /// Panics if the value does not fit within the window.
    pub fn read<T: FromByteSlice>(&self, offset: usize) -> T {
        match self.try_read(offset) {
            Some(value) => value,
            None => panic!(
                "read of {:#X} bytes at {:#X} out of range for segment of length {:#X}",
                T::SIZE, offset, self.length,
            ),
        }
    }

    /// Writes `value` at `offset`. Returns `false` if it does not fit or the origin is read-only.
    pub fn try_write<T: FromByteSlice>(&mut self, offset: usize, value: T) -> bool {
        self.with_bytes_mut(|bytes| {
            let Some(end) = offset.checked_add(T::SIZE) else { return false };
            if end > bytes.len() {
                return false;
            }
            value.write_le_byte_slice(&mut bytes[offset..end]);
            true
        })
            .unwrap_or(false)
    }

    /// # Panics
    ///
    /// Panics if the value does not fit or the origin is read-only.
    pub fn write<T: FromByteSlice>(&mut self, offset: usize, value: T) {
        if !self.try_write(offset, value) {
            panic!(
                "write of {:#X} bytes at {:#X} failed for segment of length {:#X} (writable: {})",
                T::SIZE, offset, self.length, self.is_writable(),
            );
        }
    }

    /// # Panics
    ///
    /// Panics if the bytes do not fit or the origin is read-only.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        let length = self.length;
        let written = self.with_bytes_mut(|bytes| {
            let end = offset.checked_add(data.len())?;
            bytes.get_mut(offset..end)?.copy_from_slice(data);
            Some(())
        });
        if written.flatten().is_none() {
            panic!("write of {:#X} bytes at {:#X} failed for segment of length {:#X}", data.len(), offset, length);
        }
    }

    /// # Panics
    ///
    /// Panics if the origin is read-only.
    pub fn fill(&mut self, value: u8) {
        if self.with_bytes_mut(|bytes| bytes.fill(value)).is_none() {
            panic!("cannot fill read-only segment");
        }
    }

    /// Copies the bytes of this window to the start of `destination`.
    ///
    /// The source is snapshotted first, so overlapping windows of the same origin are fine.
    pub fn copy_to(&self, destination: &mut Segment) {
        let bytes = self.to_vec();
        destination.write_bytes(0, &bytes);
    }

    /// Moves `length` bytes from `source` to `destination` within this window.
    ///
    /// Without an explicit length, everything up to the end of the window is moved, as far as
    /// the later of the two positions allows. With `zero_fill`, the part of the source range
    /// that the destination range does not cover is cleared.
    ///
    /// # Panics
    ///
    /// Panics if either range does not fit or the origin is read-only.
    pub fn internal_move(&mut self, source: usize, destination: usize, length: Option<usize>, zero_fill: bool) {
        let length = length
            .unwrap_or_else(|| self.length.saturating_sub(source.max(destination)));
        let fits = |start: usize| start.checked_add(length).is_some_and(|end| end <= self.length);
        assert!(
            fits(source) && fits(destination),
            "move of {:#X} bytes from {:#X} to {:#X} out of range for segment of length {:#X}",
            length, source, destination, self.length,
        );

        let moved = self.with_bytes_mut(|bytes| {
            bytes.copy_within(source..source + length, destination);
            if !zero_fill {
                return;
            }
            if source < destination {
                let fill_length = (destination - source).min(length);
                bytes[source..source + fill_length].fill(0);
            } else {
                let fill_length = (source - destination).min(length);
                bytes[source + length - fill_length..source + length].fill(0);
            }
        });
        assert!(moved.is_some(), "cannot move within read-only segment");
    }

    /// Decodes bytes up to the first NUL, reading at most `max_length` bytes.
    ///
    /// Each byte becomes the character with the same code point, so bytes above 0x7F come out as
    /// Latin-1.
    pub fn read_ascii_string(&self, max_length: usize) -> String {
        self.with_bytes(|bytes| {
            let length = ascii_length(bytes, max_length);
            bytes[..length].iter()
                .map(|&b| char::from(b))
                .collect()
        })
    }

    /// Length of the string [`read_ascii_string`](Segment::read_ascii_string) would decode.
    pub fn ascii_string_len(&self, max_length: usize) -> usize {
        self.with_bytes(|bytes| ascii_length(bytes, max_length))
    }

    /// Changes the length of the window, growing or shrinking an owned origin along with it.
    ///
    /// Owned origins can only be resized through a window that reaches their end. Raw origins can
    /// only be narrowed.
    pub(crate) fn resize(&mut self, new_length: usize) -> Result<(), Error> {
        let current = self.length;
        let not_growable = Error::NotGrowable { requested: new_length, current };
        match &self.origin {
            Some(Origin::Owned(buffer)) => {
                let mut buffer = buffer.borrow_mut();
                if self.index + self.length != buffer.len() {
                    return Err(not_growable);
                }
                buffer.resize(self.index + new_length, 0x00);
            },
            Some(Origin::Raw { .. }) | None => {
                if new_length > current {
                    return Err(not_growable);
                }
            },
        }
        self.length = new_length;
        Ok(())
    }
}
impl From<Vec<u8>> for Segment {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}
impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            None => "none",
            Some(Origin::Owned(_)) => "owned",
            Some(Origin::Raw { .. }) => "raw",
        };
        self.with_bytes(|bytes| {
            f.debug_struct("Segment")
                .field("origin", &origin)
                .field("index", &format_args!("{:#X}", self.index))
                .field("length", &format_args!("{:#X}", self.length))
                .field("data", &DisplayBytesSlice::prefix(bytes, DEBUG_PREFIX_LENGTH))
                .finish()
        })
    }
}


fn ascii_length(bytes: &[u8], max_length: usize) -> usize {
    let limit = bytes.len().min(max_length);
    bytes[..limit].iter()
        .position(|&b| b == 0x00)
        .unwrap_or(limit)
}


#[cfg(test)]
mod tests {
    use super::Segment;
    use crate::error::Error;

    #[test]
    fn test_slicing() {
        let segment = Segment::new((0u8..16).collect());
        let tail = segment.slice(4);
        assert_eq!(tail.index(), 4);
        assert_eq!(tail.len(), 12);

        let window = tail.slice_len(2, 3);
        assert_eq!(window.index(), 6);
        assert_eq!(window.to_vec(), vec![6, 7, 8]);
        assert!(window.shares_origin_with(&segment));

        // the end itself is a valid (empty) slice that keeps its position
        let end = segment.slice(16);
        assert!(end.is_empty());
        assert_eq!(end.index(), 16);

        assert!(segment.try_slice(17).is_empty());
        assert!(segment.try_slice_len(10, 7).is_empty());
        assert_eq!(segment.try_slice_len(10, 6).len(), 6);
    }

    #[test]
    #[should_panic]
    fn test_slice_out_of_range() {
        let segment = Segment::new(vec![0u8; 4]);
        let _ = segment.slice_len(2, 3);
    }

    #[test]
    fn test_with_range() {
        let segment = Segment::with_range(vec![1, 2, 3, 4], 1, 2)
            .expect("failed to create segment");
        assert_eq!(segment.to_vec(), vec![2, 3]);

        let error = Segment::with_range(vec![1, 2, 3, 4], 3, 2)
            .expect_err("out-of-range window accepted");
        assert!(matches!(error, Error::InvalidRange { index: 3, length: 2, available: 4 }));
    }

    #[test]
    fn test_typed_reads() {
        let segment = Segment::new(vec![0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00]);
        assert_eq!(segment.try_read::<u16>(0), Some(0x5A4D));
        assert_eq!(segment.try_read::<u32>(1), Some(0x0300_905A));
        assert_eq!(segment.try_read::<u32>(3), None);
        assert_eq!(segment.try_read::<u8>(usize::MAX), None);
        assert_eq!(segment.slice(4).read::<u16>(0), 3);
        assert_eq!(Segment::default().try_read::<u8>(0), None);
    }

    #[test]
    #[should_panic]
    fn test_read_out_of_range() {
        let segment = Segment::new(vec![0u8; 3]);
        let _: u32 = segment.read(0);
    }

    #[test]
    fn test_writes_are_shared() {
        let segment = Segment::new(vec![0u8; 8]);
        let mut window = segment.slice(2);
        window.write::<u32>(1, 0xAABB_CCDD);
        assert!(!window.try_write::<u32>(5, 0));
        assert_eq!(segment.to_vec(), vec![0, 0, 0, 0xDD, 0xCC, 0xBB, 0xAA, 0]);
    }

    #[test]
    fn test_raw_segment() {
        let buffer = *b"KERNEL32.dll\0xyz";
        let segment = unsafe { Segment::from_raw_parts(buffer.as_ptr(), buffer.len()) };
        assert!(segment.is_raw());
        assert!(!segment.is_writable());
        assert_eq!(segment.read_ascii_string(0x100), "KERNEL32.dll");
        assert_eq!(segment.slice(6).try_read::<u16>(0), Some(u16::from_le_bytes(*b"32")));

        let mut copy = segment.clone();
        assert!(!copy.try_write::<u8>(0, 0));

        let empty = unsafe { Segment::from_raw_parts(std::ptr::null(), 0) };
        assert!(empty.is_empty());
    }

    #[test]
    fn test_ascii_strings() {
        let segment = Segment::new(b"GetProcAddress\0LoadLibraryA".to_vec());
        assert_eq!(segment.read_ascii_string(0x400), "GetProcAddress");
        assert_eq!(segment.ascii_string_len(0x400), 14);
        assert_eq!(segment.read_ascii_string(7), "GetProc");
        assert_eq!(segment.slice(15).read_ascii_string(0x400), "LoadLibraryA");
        assert_eq!(segment.slice(15).ascii_string_len(0x400), 12);
    }

    #[test]
    fn test_high_bytes_in_strings() {
        let segment = Segment::new(vec![b'a', 0xE9, b'b', 0x00, 0xFF]);
        assert_eq!(segment.read_ascii_string(0x400), "a\u{E9}b");
        assert_eq!(segment.ascii_string_len(0x400), 3);
        assert_eq!(segment.slice(4).read_ascii_string(0x400), "\u{FF}");
    }

    #[test]
    fn test_internal_move_forward() {
        let mut segment = Segment::new((1u8..=8).collect());
        segment.internal_move(1, 3, Some(3), true);
        assert_eq!(segment.to_vec(), vec![1, 0, 0, 2, 3, 4, 7, 8]);
    }

    #[test]
    fn test_internal_move_backward() {
        let mut segment = Segment::new((1u8..=8).collect());
        segment.internal_move(4, 1, None, true);
        // default length: everything from the later position to the end
        assert_eq!(segment.to_vec(), vec![1, 5, 6, 7, 8, 0, 0, 0]);

        let mut segment = Segment::new((1u8..=8).collect());
        segment.internal_move(4, 1, None, false);
        assert_eq!(segment.to_vec(), vec![1, 5, 6, 7, 8, 6, 7, 8]);
    }

    #[test]
    fn test_copy_and_fill() {
        let segment = Segment::new((1u8..=6).collect());
        let mut destination = segment.slice(2);
        segment.slice_len(0, 2).copy_to(&mut destination);
        assert_eq!(segment.to_vec(), vec![1, 2, 1, 2, 5, 6]);

        let mut window = segment.slice_len(4, 2);
        window.fill(0xCC);
        assert_eq!(segment.to_vec(), vec![1, 2, 1, 2, 0xCC, 0xCC]);
    }

    #[test]
    fn test_resize() {
        let segment = Segment::new(vec![1u8; 4]);
        let mut whole = segment.clone();
        whole.resize(6).expect("failed to grow");
        assert_eq!(whole.to_vec(), vec![1, 1, 1, 1, 0, 0]);

        // stale windows only see what is left
        whole.resize(2).expect("failed to shrink");
        assert_eq!(segment.to_vec(), vec![1, 1]);
        assert_eq!(segment.try_read::<u32>(0), None);

        let mut middle = whole.slice_len(0, 1);
        assert!(matches!(middle.resize(3), Err(Error::NotGrowable { .. })));
    }
}
