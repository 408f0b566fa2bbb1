//! The import directory.
//!
//! The directory is an array of import descriptors, one per imported module, terminated by an
//! all-zero descriptor. Each descriptor points to two parallel thunk arrays: the import lookup
//! table (`OriginalFirstThunk`), which names the imported functions, and the import address
//! table (`FirstThunk`), which the loader overwrites with the resolved addresses.


use tracing::debug;

use crate::address::Rva;
use crate::from_byte_slice::FromByteSlice;
use crate::image::Image;
use crate::list::{SpanList, TypedList};
use crate::load::{LoadContext, Span, Structure};
use crate::options::LoadOptions;
use crate::raw::{ImageImportDescriptor, IMAGE_ORDINAL_FLAG32, IMAGE_ORDINAL_FLAG64};
use crate::segment::Segment;


const NAME_OFFSET: usize = 0x0C;
const FIRST_THUNK_OFFSET: usize = 0x10;


/// The number of descriptors before the terminator, which is any descriptor without a name or
/// without an import address table. Stops one past `maximum` so the caller can tell the ceiling
/// was exceeded.
fn descriptor_count(data: &Segment, maximum: usize) -> usize {
    let limit = maximum.saturating_add(1);
    for index in 0..limit {
        let entry = index * ImageImportDescriptor::SIZE;
        let name: Option<u32> = data.try_read(entry + NAME_OFFSET);
        let first_thunk: Option<u32> = data.try_read(entry + FIRST_THUNK_OFFSET);
        match (name, first_thunk) {
            (Some(name), Some(first_thunk)) if name != 0 && first_thunk != 0 => {},
            _ => return index,
        }
    }
    limit
}


#[derive(Clone, Debug)]
pub struct ImportDirectory {
    span: Span,
    import_descriptors: SpanList<ImportDescriptor>,
}
impl ImportDirectory {
    pub(crate) fn new(options: &LoadOptions) -> Self {
        Self {
            span: Span::default(),
            import_descriptors: SpanList::new(options.maximum_import_module_count, options.truncate_if_exceeded),
        }
    }

    pub(crate) fn load(&mut self, context: &mut LoadContext, image: &Image) {
        let start = context.data.clone();
        let old = self.span.raw_data().clone();

        if !self.span.pre_load(context) {
            self.import_descriptors.load_with(context, || 0, |_, _| {});
            return;
        }

        let maximum = image.options().maximum_import_module_count;
        self.import_descriptors.load_with(
            context,
            || descriptor_count(&start, maximum),
            |descriptor, context| descriptor.load(context, image),
        );

        let length = context.consumed_since(&start);
        self.span.commit(context, &start, &old, length, !context.next);
    }

    pub fn import_descriptors(&self) -> &SpanList<ImportDescriptor> { &self.import_descriptors }
    pub fn import_descriptors_mut(&mut self) -> &mut SpanList<ImportDescriptor> { &mut self.import_descriptors }
}
impl Structure for ImportDirectory {
    fn span(&self) -> &Span { &self.span }
}


#[derive(Clone, Debug, Default)]
pub struct ImportDescriptor {
    span: Span,
    is_64_bit: bool,
    count: usize,
}
impl ImportDescriptor {
    pub(crate) fn load(&mut self, context: &mut LoadContext, image: &Image) {
        self.count = 0;
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < ImageImportDescriptor::SIZE {
            debug!("import descriptor needs {:#X} bytes, only {:#X} available", ImageImportDescriptor::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        self.span.set_loaded(context, ImageImportDescriptor::SIZE, false);
        self.is_64_bit = image.optional_header().is_pe64();
        self.count = self.thunk_count(image);
    }

    pub fn raw(&self) -> ImageImportDescriptor { self.span.read(0) }
    pub fn set_raw(&mut self, value: ImageImportDescriptor) { self.span.write(0, value) }

    /// Address of the import lookup table.
    pub fn original_first_thunk(&self) -> Rva { self.span.read(0x00) }
    pub fn set_original_first_thunk(&mut self, value: Rva) { self.span.write(0x00, value) }

    pub fn time_date_stamp(&self) -> u32 { self.span.read(0x04) }
    pub fn set_time_date_stamp(&mut self, value: u32) { self.span.write(0x04, value) }

    pub fn forwarder_chain(&self) -> u32 { self.span.read(0x08) }
    pub fn set_forwarder_chain(&mut self, value: u32) { self.span.write(0x08, value) }

    /// Address of the imported module's name.
    pub fn name(&self) -> Rva { self.span.read(NAME_OFFSET) }
    pub fn set_name(&mut self, value: Rva) { self.span.write(NAME_OFFSET, value) }

    /// Address of the import address table.
    pub fn first_thunk(&self) -> Rva { self.span.read(FIRST_THUNK_OFFSET) }
    pub fn set_first_thunk(&mut self, value: Rva) { self.span.write(FIRST_THUNK_OFFSET, value) }

    /// Whether the thunks are 64 bits wide.
    pub fn is_64_bit(&self) -> bool { self.is_64_bit }

    /// Number of thunks before the terminating zero, as counted at load time. One more than the
    /// image's function ceiling if the table is longer than that.
    pub fn count(&self) -> usize { self.count }

    /// The lookup table, or the address table if the linker left the lookup table out.
    fn lookup_table_address(&self) -> Rva {
        let original_first_thunk = self.original_first_thunk();
        if original_first_thunk.is_null() {
            self.first_thunk()
        } else {
            original_first_thunk
        }
    }

    fn thunk_count(&self, image: &Image) -> usize {
        let address = self.lookup_table_address();
        if address.is_null() {
            return 0;
        }
        let data = image.create_segment_at(address);
        let limit = image.options().maximum_import_function_count.saturating_add(1);
        for index in 0..limit {
            let value = if self.is_64_bit {
                data.try_read::<u64>(index * 8)
            } else {
                data.try_read::<u32>(index * 4).map(u64::from)
            };
            match value {
                None | Some(0) => return index,
                Some(_) => {},
            }
        }
        limit
    }

    fn thunk_list(&self, image: &Image, address: Rva) -> ThunkList {
        let maximum = image.options().maximum_import_function_count;
        if self.is_64_bit {
            ThunkList::Thunk64(TypedList::create(image, address, self.count, maximum))
        } else {
            ThunkList::Thunk32(TypedList::create(image, address, self.count, maximum))
        }
    }

    /// The import lookup table, which names the imported functions.
    pub fn original_thunks(&self, image: &Image) -> ThunkList {
        if self.is_empty() {
            return ThunkList::default();
        }
        self.thunk_list(image, self.lookup_table_address())
    }

    /// The import address table.
    pub fn thunks(&self, image: &Image) -> ThunkList {
        if self.is_empty() {
            return ThunkList::default();
        }
        self.thunk_list(image, self.first_thunk())
    }
}
impl Structure for ImportDescriptor {
    fn span(&self) -> &Span { &self.span }
}


/// A thunk of either width, widened to 64 bits with the ordinal flag moved to bit 63.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ThunkData(pub u64);
impl ThunkData {
    pub fn from_u32(value: u32) -> Self {
        if value & IMAGE_ORDINAL_FLAG32 != 0 {
            Self(IMAGE_ORDINAL_FLAG64 | u64::from(value & !IMAGE_ORDINAL_FLAG32))
        } else {
            Self(value.into())
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn is_null(self) -> bool { self.0 == 0 }

    /// Whether the function is imported by ordinal rather than by name.
    pub fn is_ordinal(self) -> bool {
        self.0 & IMAGE_ORDINAL_FLAG64 != 0
    }

    pub fn ordinal(self) -> Option<u32> {
        self.is_ordinal().then_some((self.0 & 0x7FFF_FFFF) as u32)
    }

    /// Address of the hint/name entry; null for imports by ordinal.
    pub fn address_of_data(self) -> Rva {
        if self.is_ordinal() {
            Rva(0)
        } else {
            Rva(self.0 as u32)
        }
    }
}


#[derive(Clone, Debug)]
pub enum ThunkList {
    Thunk32(TypedList<u32>),
    Thunk64(TypedList<u64>),
}
impl ThunkList {
    pub fn len(&self) -> usize {
        match self {
            Self::Thunk32(list) => list.len(),
            Self::Thunk64(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn try_get(&self, index: usize) -> Option<ThunkData> {
        match self {
            Self::Thunk32(list) => list.try_get(index).map(ThunkData::from_u32),
            Self::Thunk64(list) => list.try_get(index).map(ThunkData::from_u64),
        }
    }

    /// # Panics
    ///
    /// Panics if `index` is not less than [`len`](ThunkList::len).
    pub fn get(&self, index: usize) -> ThunkData {
        match self {
            Self::Thunk32(list) => ThunkData::from_u32(list.get(index)),
            Self::Thunk64(list) => ThunkData::from_u64(list.get(index)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ThunkData> + '_ {
        (0..self.len()).map_while(|index| self.try_get(index))
    }
}
impl Default for ThunkList {
    fn default() -> Self {
        Self::Thunk32(TypedList::default())
    }
}


/// One imported function.
#[derive(Clone, Debug)]
pub struct ImportEntry {
    pub index: usize,

    /// The import lookup table entry.
    pub original_thunk: ThunkData,

    /// The import address table entry; a resolved address in a loaded image.
    pub thunk: ThunkData,

    /// Index into the exporting module's name table where the name probably is; `None` for
    /// imports by ordinal.
    pub hint: Option<u16>,

    /// The name's bytes; empty for imports by ordinal.
    pub name: Segment,
}
impl ImportEntry {
    pub fn is_ordinal(&self) -> bool { self.original_thunk.is_ordinal() }
    pub fn ordinal(&self) -> Option<u32> { self.original_thunk.ordinal() }

    /// The name, or `#` followed by the ordinal.
    pub fn display_name(&self) -> String {
        match self.ordinal() {
            Some(ordinal) => format!("#{}", ordinal),
            None => self.name.read_ascii_string(usize::MAX),
        }
    }
}


/// The imported modules of an image.
#[derive(Clone, Copy)]
pub struct ImportView<'a> {
    image: &'a Image,
    directory: &'a ImportDirectory,
}
impl<'a> ImportView<'a> {
    pub(crate) fn new(image: &'a Image) -> Self {
        Self {
            image,
            directory: image.import_directory(),
        }
    }

    pub fn directory(&self) -> &'a ImportDirectory { self.directory }
    pub fn len(&self) -> usize { self.directory.import_descriptors.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// # Panics
    ///
    /// Panics if `index` is not less than [`len`](ImportView::len).
    pub fn get(&self, index: usize) -> ImportModuleView<'a> {
        ImportModuleView::new(self.image, &self.directory.import_descriptors[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = ImportModuleView<'a>> + use<'a> {
        let image = self.image;
        let directory = self.directory;
        directory.import_descriptors.iter()
            .map(move |descriptor| ImportModuleView::new(image, descriptor))
    }
}


/// The functions imported from one module.
#[derive(Clone)]
pub struct ImportModuleView<'a> {
    image: &'a Image,
    descriptor: &'a ImportDescriptor,
    original_thunks: ThunkList,
    thunks: ThunkList,
}
impl<'a> ImportModuleView<'a> {
    fn new(image: &'a Image, descriptor: &'a ImportDescriptor) -> Self {
        Self {
            image,
            descriptor,
            original_thunks: descriptor.original_thunks(image),
            thunks: descriptor.thunks(image),
        }
    }

    pub fn descriptor(&self) -> &'a ImportDescriptor { self.descriptor }

    /// The module name's bytes.
    pub fn name(&self) -> Segment {
        self.image.create_ascii_string_data(self.descriptor.name())
    }

    pub fn name_string(&self) -> String {
        self.image.read_ascii_string(self.descriptor.name())
    }

    /// Number of imported functions, following the import lookup table.
    pub fn len(&self) -> usize { self.original_thunks.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// # Panics
    ///
    /// Panics if `index` is not less than [`len`](ImportModuleView::len).
    pub fn get(&self, index: usize) -> ImportEntry {
        let original_thunk = self.original_thunks.get(index);
        let thunk = self.thunks.try_get(index).unwrap_or_default();

        let (hint, name) = if original_thunk.is_ordinal() {
            (None, Segment::default())
        } else {
            let data = self.image.create_segment_at(original_thunk.address_of_data());
            let hint: Option<u16> = data.try_read(0);
            let name_data = data.try_slice(2);
            let length = name_data.ascii_string_len(self.image.options().maximum_string_length);
            (hint, name_data.slice_len(0, length))
        };

        ImportEntry {
            index,
            original_thunk,
            thunk,
            hint,
            name,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ImportEntry> + '_ {
        (0..self.len()).map(|index| self.get(index))
    }

    /// The display names of all imported functions.
    pub fn function_names(&self) -> Vec<String> {
        self.iter()
            .map(|entry| entry.display_name())
            .collect()
    }
}
