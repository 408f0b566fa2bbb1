//! The top-level view of a PE image or COFF object.
//!
//! Headers and the section table are loaded when the [`Image`] is created; the export and import
//! directories are loaded the first time they are asked for.


use std::cell::{Cell, OnceCell};
use std::fmt;

use tracing::{debug, trace};

use crate::address::{align_up, align_up_u64, FileOffset, Rva};
use crate::error::Error;
use crate::export::{ExportDirectory, ExportView};
use crate::import::{ImportDirectory, ImportView};
use crate::list::SpanList;
use crate::load::{LoadContext, LoadState, Structure};
use crate::mz::DosHeader;
use crate::options::LoadOptions;
use crate::pe::{FileHeader, KnownDataDirectoryEntry, MachineType, NtHeaders, OptionalHeader};
use crate::raw::IMAGE_DOS_SIGNATURE;
use crate::section::SectionHeader;
use crate::segment::Segment;


/// How the bytes of an image are arranged.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ImageLayout {
    /// As stored on disk; sections sit at their raw data pointers.
    #[default]
    File,

    /// As mapped by the loader; sections sit at their virtual addresses.
    Memory,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ImageFormat {
    /// An executable or DLL, starting with a DOS header.
    Executable,

    /// A COFF object file, starting with the file header.
    Object,
}
impl ImageFormat {
    /// Guesses the format from the first bytes of an on-disk file.
    ///
    /// A DOS signature marks an executable; a machine type common for object files marks an
    /// object file. Anything else is treated as a (possibly broken) executable.
    pub fn detect(data: &[u8]) -> Self {
        let Some(magic) = data.first_chunk::<2>().map(|bytes| u16::from_le_bytes(*bytes)) else {
            return Self::Executable;
        };
        if magic == IMAGE_DOS_SIGNATURE {
            Self::Executable
        } else if MachineType::from_base_type(magic).marks_object_file() {
            Self::Object
        } else {
            Self::Executable
        }
    }
}


pub struct Image {
    data: Segment,
    layout: ImageLayout,
    format: ImageFormat,
    options: LoadOptions,
    is_loaded_no_error: bool,
    dos_header: DosHeader,
    nt_headers: NtHeaders,
    section_headers: SpanList<SectionHeader>,
    export_directory: OnceCell<ExportDirectory>,
    import_directory: OnceCell<ImportDirectory>,
    stale_export_directory: Cell<Option<ExportDirectory>>,
    stale_import_directory: Cell<Option<ImportDirectory>>,
}
impl Image {
    /// Loads an on-disk image, detecting whether it is an executable or an object file.
    pub fn new(data: Vec<u8>) -> Self {
        let data = Segment::new(data);
        let format = sniff_format(&data);
        Self::load_new(data, ImageLayout::File, format, None)
    }

    /// Loads an image from any segment.
    ///
    /// Without a declared format, the format is detected from the data. Without options, the
    /// defaults for the format are used.
    pub fn with_options(data: Segment, layout: ImageLayout, format: Option<ImageFormat>, options: Option<LoadOptions>) -> Result<Self, Error> {
        let format = resolve_format(&data, layout, format)?;
        Ok(Self::load_new(data, layout, format, options))
    }

    /// Loads an image from memory the image does not own, such as a file mapping.
    ///
    /// Once loaded, the image's data is narrowed to the computed image size.
    ///
    /// # Safety
    ///
    /// `pointer` must be valid for reads of `length` bytes for as long as the image, or any
    /// segment obtained from it, is alive.
    pub unsafe fn from_raw_parts(pointer: *const u8, length: usize, layout: ImageLayout, format: Option<ImageFormat>, options: Option<LoadOptions>) -> Result<Self, Error> {
        // SAFETY: forwarded to the caller
        let data = unsafe { Segment::from_raw_parts(pointer, length) };
        Self::with_options(data, layout, format, options)
    }

    /// Like [`from_raw_parts`](Image::from_raw_parts), but the setters of the image's structures
    /// write through to the memory.
    ///
    /// # Safety
    ///
    /// `pointer` must be valid for reads and writes of `length` bytes for as long as the image, or
    /// any segment obtained from it, is alive, and nothing else may access the memory meanwhile.
    pub unsafe fn from_raw_parts_mut(pointer: *mut u8, length: usize, layout: ImageLayout, format: Option<ImageFormat>, options: Option<LoadOptions>) -> Result<Self, Error> {
        // SAFETY: forwarded to the caller
        let data = unsafe { Segment::from_raw_parts_mut(pointer, length) };
        Self::with_options(data, layout, format, options)
    }

    fn load_new(data: Segment, layout: ImageLayout, format: ImageFormat, options: Option<LoadOptions>) -> Self {
        let options = options.unwrap_or(LoadOptions::default_for(format));
        let mut image = Self {
            data,
            layout,
            format,
            options,
            is_loaded_no_error: false,
            dos_header: DosHeader::default(),
            nt_headers: NtHeaders::new(&options),
            section_headers: SpanList::new(options.maximum_number_of_sections, options.truncate_if_exceeded),
            export_directory: OnceCell::new(),
            import_directory: OnceCell::new(),
            stale_export_directory: Cell::new(None),
            stale_import_directory: Cell::new(None),
        };
        image.reload();

        if image.data.is_raw() && image.is_loaded_no_error {
            if let Some(size) = image.image_size() {
                if size < image.data.len() as u64 {
                    image.data = image.data.slice_len(0, size as usize);
                }
            }
        }
        image
    }

    /// Runs the load pipeline again over the current data.
    ///
    /// Every structure's [`LoadResult`](crate::LoadResult) then describes how it changed since
    /// the previous load. Directories that had been loaded are loaded again on their next access
    /// and compared against their previous state then. Returns whether everything loaded without
    /// error.
    pub fn reload(&mut self) -> bool {
        let mut context = LoadContext::new(self.data.clone());
        self.load(&mut context);
        self.is_loaded_no_error = context.next;

        if let Some(directory) = self.export_directory.take() {
            self.stale_export_directory.set(Some(directory));
        }
        if let Some(directory) = self.import_directory.take() {
            self.stale_import_directory.set(Some(directory));
        }

        trace!("image loaded (no error: {})", self.is_loaded_no_error);
        self.is_loaded_no_error
    }

    fn load(&mut self, context: &mut LoadContext) {
        let data = context.data.clone();
        match self.format {
            ImageFormat::Executable => {
                self.dos_header.load(context, &self.options);
                if context.next {
                    let lfanew = self.dos_header.lfanew();
                    if lfanew > self.options.maximum_lfanew || (lfanew as usize) > data.len() {
                        debug!("e_lfanew {:#010X} beyond limit {:#X} or data length {:#X}", lfanew, self.options.maximum_lfanew, data.len());
                        context.set_state_once = Some(LoadState::Error);
                    } else {
                        context.data = data.slice(lfanew as usize);
                    }
                }
                self.nt_headers.load(context, &self.options);
            },
            ImageFormat::Object => {
                context.next = false;
                self.dos_header.load(context, &self.options);
                self.nt_headers.load(context, &self.options);
                context.next = true;
                self.nt_headers.file_header.load(context);
            },
        }

        let file_header = &self.nt_headers.file_header;
        self.section_headers.load_with(
            context,
            || file_header.try_number_of_sections().map_or(0, usize::from),
            |section, context| section.load(context),
        );
    }

    pub fn raw_data(&self) -> &Segment { &self.data }
    pub fn layout(&self) -> ImageLayout { self.layout }
    pub fn format(&self) -> ImageFormat { self.format }
    pub fn options(&self) -> &LoadOptions { &self.options }

    /// Whether every structure loaded so far loaded without error.
    pub fn is_loaded_no_error(&self) -> bool { self.is_loaded_no_error }

    /// Whether [`resize`](Image::resize) may grow the data.
    pub fn is_growable(&self) -> bool {
        !self.data.is_raw() && self.format == ImageFormat::Executable
    }

    /// Grows (zero-filled) or truncates the image's data, then [reloads](Image::reload) it so
    /// that no structure refers to bytes that are gone. Returns the result of the reload.
    ///
    /// Raw-pointer images can only be narrowed; object files cannot be resized.
    pub fn resize(&mut self, new_length: usize) -> Result<bool, Error> {
        if !self.data.is_raw() && !self.is_growable() {
            return Err(Error::NotGrowable { requested: new_length, current: self.data.len() });
        }
        self.data.resize(new_length)?;
        Ok(self.reload())
    }

    pub fn dos_header(&self) -> &DosHeader { &self.dos_header }
    pub fn dos_header_mut(&mut self) -> &mut DosHeader { &mut self.dos_header }
    pub fn nt_headers(&self) -> &NtHeaders { &self.nt_headers }
    pub fn nt_headers_mut(&mut self) -> &mut NtHeaders { &mut self.nt_headers }
    pub fn file_header(&self) -> &FileHeader { self.nt_headers.file_header() }
    pub fn optional_header(&self) -> &OptionalHeader { self.nt_headers.optional_header() }
    pub fn file_header_mut(&mut self) -> &mut FileHeader { self.nt_headers.file_header_mut() }
    pub fn optional_header_mut(&mut self) -> &mut OptionalHeader { self.nt_headers.optional_header_mut() }
    pub fn section_headers(&self) -> &SpanList<SectionHeader> { &self.section_headers }
    pub fn section_headers_mut(&mut self) -> &mut SpanList<SectionHeader> { &mut self.section_headers }

    pub fn export_directory(&self) -> &ExportDirectory {
        self.export_directory.get_or_init(|| {
            let mut directory = self.stale_export_directory.take()
                .unwrap_or_default();
            let mut context = self.directory_context(KnownDataDirectoryEntry::ExportTable);
            directory.load(&mut context);
            directory
        })
    }

    pub fn import_directory(&self) -> &ImportDirectory {
        self.import_directory.get_or_init(|| {
            let mut directory = self.stale_import_directory.take()
                .unwrap_or_else(|| ImportDirectory::new(&self.options));
            let mut context = self.directory_context(KnownDataDirectoryEntry::ImportTable);
            directory.load(&mut context, self);
            directory
        })
    }

    pub fn export_view(&self) -> ExportView<'_> {
        ExportView::new(self)
    }

    pub fn import_view(&self) -> ImportView<'_> {
        ImportView::new(self)
    }

    /// The context a directory is loaded from: its mapped bytes, or a context that makes it
    /// `NotExist` (no entry or a null address) or `Error` (unmappable address).
    fn directory_context(&self, entry: KnownDataDirectoryEntry) -> LoadContext {
        let Some(address) = self.optional_header().data_directory(entry).present_address() else {
            trace!("{:?} directory not present", entry);
            return LoadContext::not_exist();
        };
        match self.rva_to_file_offset(address) {
            Some(offset) => {
                trace!("{:?} directory at {} (file offset {})", entry, address, offset);
                LoadContext::new(self.data.try_slice(offset.as_usize()))
            },
            None => {
                debug!("{:?} directory at {} is not backed by file data", entry, address);
                LoadContext::forced_error()
            },
        }
    }

    /// The first section whose raw data contains `offset`.
    pub fn section_by_file_offset(&self, offset: FileOffset) -> Option<&SectionHeader> {
        self.section_headers.iter()
            .find(|section| section.contains_file_offset(offset))
    }

    /// The first section whose mapped range contains `rva`.
    pub fn section_by_rva(&self, rva: Rva) -> Option<&SectionHeader> {
        let section_alignment = self.optional_header().try_section_alignment().unwrap_or(0);
        self.section_headers.iter()
            .find(|section| section.contains_rva(rva, section_alignment))
    }

    /// Translates a file offset into an RVA.
    ///
    /// Offsets before the first section belong to the headers and map to themselves. `None` for
    /// offsets past the end of the last section with raw data, such as an appended signature.
    pub fn file_offset_to_rva(&self, offset: FileOffset) -> Option<Rva> {
        if self.layout == ImageLayout::Memory || self.section_headers.len() == 0 {
            return Some(Rva(offset.0));
        }
        if let Some(last) = self.section_headers.last_with_raw_data() {
            let end = u64::from(last.pointer_to_raw_data().0) + u64::from(last.size_of_raw_data());
            if u64::from(offset.0) >= end {
                return None;
            }
        }
        match self.section_by_file_offset(offset) {
            Some(section) => {
                let delta = offset.0 - section.pointer_to_raw_data().0;
                Some(Rva(section.virtual_address().0.wrapping_add(delta)))
            },
            None => Some(Rva(offset.0)),
        }
    }

    /// Translates an RVA into a file offset.
    ///
    /// RVAs outside every section belong to the headers and map to themselves. `None` for RVAs
    /// at or beyond `SizeOfImage` and for the part of a section beyond its raw data.
    pub fn rva_to_file_offset(&self, rva: Rva) -> Option<FileOffset> {
        if self.layout == ImageLayout::Memory {
            return Some(FileOffset(rva.0));
        }
        if let Some(size_of_image) = self.optional_header().try_size_of_image() {
            if rva.0 >= size_of_image {
                return None;
            }
        }
        match self.section_by_rva(rva) {
            Some(section) => {
                let delta = rva.0 - section.virtual_address().0;
                if delta < section.size_of_raw_data() {
                    Some(FileOffset(section.pointer_to_raw_data().0.wrapping_add(delta)))
                } else {
                    None
                }
            },
            None => Some(FileOffset(rva.0)),
        }
    }

    /// The data from `offset` to the end; empty if `offset` is out of range.
    pub fn create_segment(&self, offset: FileOffset) -> Segment {
        self.data.try_slice(offset.as_usize())
    }

    /// `length` bytes at `offset`; empty if they are not all there.
    pub fn create_segment_len(&self, offset: FileOffset, length: usize) -> Segment {
        self.data.try_slice_len(offset.as_usize(), length)
    }

    /// The data from `rva` to the end. A null RVA designates the whole data; unmappable RVAs
    /// yield an empty segment.
    pub fn create_segment_at(&self, rva: Rva) -> Segment {
        if rva.is_null() {
            return self.data.clone();
        }
        match self.rva_to_file_offset(rva) {
            Some(offset) => self.create_segment(offset),
            None => Segment::default(),
        }
    }

    /// `length` bytes at `rva`, with the same rules as [`create_segment_at`](Image::create_segment_at).
    pub fn create_segment_at_len(&self, rva: Rva, length: usize) -> Segment {
        if rva.is_null() {
            return self.data.try_slice_len(0, length);
        }
        match self.rva_to_file_offset(rva) {
            Some(offset) => self.create_segment_len(offset, length),
            None => Segment::default(),
        }
    }

    /// The bytes of the NUL-terminated string at `rva`, without the NUL and bounded by the
    /// maximum string length. Empty for a null RVA.
    pub fn create_ascii_string_data(&self, rva: Rva) -> Segment {
        if rva.is_null() {
            return Segment::default();
        }
        let data = self.create_segment_at(rva);
        let length = data.ascii_string_len(self.options.maximum_string_length);
        data.slice_len(0, length)
    }

    pub fn read_ascii_string(&self, rva: Rva) -> String {
        self.create_ascii_string_data(rva)
            .read_ascii_string(usize::MAX)
    }

    /// The section's contents as laid out in this image.
    ///
    /// In memory layout this covers `VirtualSize` bytes, not the padding up to the section
    /// alignment that [`section_by_rva`](Image::section_by_rva) also counts as the section's.
    pub fn section_data(&self, section: &SectionHeader) -> Segment {
        match self.layout {
            ImageLayout::File => self.data.try_slice_len(
                section.pointer_to_raw_data().as_usize(),
                section.size_of_raw_data() as usize,
            ),
            ImageLayout::Memory => self.data.try_slice_len(
                section.virtual_address().as_usize(),
                section.virtual_size() as usize,
            ),
        }
    }

    /// The size the image occupies in its layout: up to the end of the last section's data,
    /// aligned up, or the aligned size of the headers if there are no sections.
    ///
    /// `None` for object files, whose size is not tracked.
    pub fn image_size(&self) -> Option<u64> {
        if self.format == ImageFormat::Object {
            return None;
        }
        let end = match self.layout {
            ImageLayout::Memory => self.section_headers.last()
                .map(|section| u64::from(section.virtual_address().0) + u64::from(section.virtual_size())),
            ImageLayout::File => self.section_headers.last_with_raw_data()
                .map(|section| u64::from(section.pointer_to_raw_data().0) + u64::from(section.size_of_raw_data())),
        };
        let end = end.unwrap_or_else(|| self.optional_header().try_size_of_headers().unwrap_or(0).into());
        Some(align_up_u64(end, self.alignment(self.layout)))
    }

    fn alignment(&self, layout: ImageLayout) -> u32 {
        let optional_header = self.optional_header();
        let alignment = match layout {
            ImageLayout::File => optional_header.try_file_alignment(),
            ImageLayout::Memory => optional_header.try_section_alignment(),
        };
        alignment.unwrap_or(0)
    }

    /// Rounds `value` up to the file alignment (file layout) or the section alignment (memory
    /// layout).
    pub fn align_up(&self, value: u32, layout: ImageLayout) -> u32 {
        align_up(value, self.alignment(layout))
    }

    /// The end of the section table, or of the optional header if there are no sections.
    pub fn end_of_headers(&self) -> FileOffset {
        match self.section_headers.last() {
            Some(section) => section.end_offset(),
            None => self.optional_header().end_offset(),
        }
    }

    /// The value `SizeOfHeaders` should have for the current headers.
    pub fn calculate_size_of_headers(&self, layout: ImageLayout) -> u32 {
        self.align_up(self.end_of_headers().0, layout)
    }

    /// The value `SizeOfImage` should have for the current sections.
    pub fn calculate_size_of_image(&self, layout: ImageLayout) -> u32 {
        let headers_end = self.optional_header().end_offset().0;
        let end = match (self.section_headers.last(), layout) {
            (None, _) => headers_end,
            (Some(last), ImageLayout::Memory) => last.virtual_address().0.wrapping_add(last.virtual_size()),
            (Some(_), ImageLayout::File) => match self.section_headers.last_with_raw_data() {
                Some(section) => section.pointer_to_raw_data().0.wrapping_add(section.size_of_raw_data()),
                None => headers_end,
            },
        };
        self.align_up(end, layout)
    }
}
impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("layout", &self.layout)
            .field("format", &self.format)
            .field("options", &self.options)
            .field("is_loaded_no_error", &self.is_loaded_no_error)
            .field("dos_header", &self.dos_header)
            .field("nt_headers", &self.nt_headers)
            .field("section_headers", &self.section_headers)
            .field("export_directory", &self.export_directory.get())
            .field("import_directory", &self.import_directory.get())
            .finish_non_exhaustive()
    }
}


fn resolve_format(data: &Segment, layout: ImageLayout, declared: Option<ImageFormat>) -> Result<ImageFormat, Error> {
    match (layout, declared) {
        (ImageLayout::Memory, Some(ImageFormat::Object)) => Err(Error::ObjectInMemoryLayout),
        (ImageLayout::Memory, _) => Ok(ImageFormat::Executable),
        (ImageLayout::File, Some(format)) => Ok(format),
        (ImageLayout::File, None) => Ok(sniff_format(data)),
    }
}

fn sniff_format(data: &Segment) -> ImageFormat {
    data.with_bytes(ImageFormat::detect)
}
