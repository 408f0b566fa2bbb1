use std::array::TryFromSliceError;
use std::fmt;
use std::ops::Index;


/// Writes `bytes` as an escaped byte-string literal (`b"..."`).
///
/// If `elided` is set, `...` is appended after the closing quote to mark a shortened rendering.
pub fn write_escaped(f: &mut fmt::Formatter<'_>, bytes: &[u8], elided: bool) -> fmt::Result {
    write!(f, "b\"")?;
    for &b in bytes {
        match b {
            0x00 => write!(f, "\\0")?,
            0x09 => write!(f, "\\t")?,
            0x0A => write!(f, "\\n")?,
            0x0D => write!(f, "\\r")?,
            0x22 => write!(f, "\\\"")?,
            // no need to escape 0x27
            0x5C => write!(f, "\\\\")?,
            0x20..=0x7E => write!(f, "{}", char::from(b))?,
            other => write!(f, "\\x{:02X}", other)?,
        }
    }
    write!(f, "\"")?;
    if elided {
        write!(f, "...")?;
    }
    Ok(())
}


/// A fixed-size byte array (such as a section name) that displays as a byte-string literal.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DisplayBytes<const SIZE: usize>([u8; SIZE]);
impl<const SIZE: usize> DisplayBytes<SIZE> {
    /// The bytes up to (not including) the first NUL.
    pub fn trim_nul(&self) -> &[u8] {
        let end = self.0.iter()
            .position(|&b| b == 0x00)
            .unwrap_or(SIZE);
        &self.0[..end]
    }
}
impl<const SIZE: usize> Default for DisplayBytes<SIZE> {
    fn default() -> Self {
        Self([0u8; SIZE])
    }
}
impl<const SIZE: usize> fmt::Debug for DisplayBytes<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayBytes({})", self)
    }
}
impl<const SIZE: usize> fmt::Display for DisplayBytes<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.0, false)
    }
}
impl<const SIZE: usize> From<[u8; SIZE]> for DisplayBytes<SIZE> {
    fn from(value: [u8; SIZE]) -> Self {
        Self(value)
    }
}
impl<const SIZE: usize> From<DisplayBytes<SIZE>> for [u8; SIZE] {
    fn from(value: DisplayBytes<SIZE>) -> Self {
        value.0
    }
}
impl<const SIZE: usize> TryFrom<&[u8]> for DisplayBytes<SIZE> {
    type Error = TryFromSliceError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let buf: [u8; SIZE] = value.try_into()?;
        Ok(Self(buf))
    }
}
impl<const SIZE: usize> AsRef<[u8]> for DisplayBytes<SIZE> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl<const SIZE: usize> Index<usize> for DisplayBytes<SIZE> {
    type Output = u8;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
#[cfg(feature = "serde")]
impl<const SIZE: usize> serde::Serialize for DisplayBytes<SIZE> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}


/// A borrowed byte slice that displays as a byte-string literal, optionally shortened to a
/// prefix.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DisplayBytesSlice<'a> {
    bytes: &'a [u8],
    elided: bool,
}
impl<'a> DisplayBytesSlice<'a> {
    /// Displays at most `limit` bytes, marking the rendering as shortened if `bytes` is longer.
    pub fn prefix(bytes: &'a [u8], limit: usize) -> Self {
        if bytes.len() > limit {
            Self { bytes: &bytes[..limit], elided: true }
        } else {
            Self { bytes, elided: false }
        }
    }
}
impl<'a> fmt::Debug for DisplayBytesSlice<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayBytesSlice({})", self)
    }
}
impl<'a> fmt::Display for DisplayBytesSlice<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, self.bytes, self.elided)
    }
}
impl<'a> From<&'a [u8]> for DisplayBytesSlice<'a> {
    fn from(value: &'a [u8]) -> Self {
        Self { bytes: value, elided: false }
    }
}
impl<'a> AsRef<[u8]> for DisplayBytesSlice<'a> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}
