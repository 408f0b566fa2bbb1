//! Lazy, zero-copy reading and editing of PE images and COFF object files.
//!
//! An [`Image`] wraps a byte buffer (owned, or borrowed from a mapping) and exposes its headers
//! as a tree of structures that reference the buffer instead of copying out of it. Every
//! structure records how its last load went in a [`LoadResult`]; loading never fails as a whole.


#[macro_use] mod macros;

pub mod address;
pub mod error;
pub mod export;
pub mod from_byte_slice;
pub mod image;
pub mod import;
pub mod list;
pub mod load;
pub mod mz;
pub mod options;
pub mod pe;
pub mod raw;
pub mod section;
pub mod segment;

#[cfg(test)]
mod test_images;


pub use crate::address::{FileOffset, Rva};
pub use crate::error::Error;
pub use crate::export::{ExportDirectory, ExportEntry, ExportView};
pub use crate::image::{Image, ImageFormat, ImageLayout};
pub use crate::import::{ImportDescriptor, ImportDirectory, ImportEntry, ImportModuleView, ImportView, ThunkData};
pub use crate::list::{SpanList, TypedList};
pub use crate::load::{LoadDiff, LoadResult, LoadState, Structure};
pub use crate::options::LoadOptions;
pub use crate::segment::Segment;
