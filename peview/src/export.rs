//! The export directory and a view of the functions it exports.
//!
//! The directory points to three tables: the export address table, indexed by ordinal minus
//! base; the name pointer table; and the name ordinal table, which holds for each name the index
//! into the export address table. Functions exported by ordinal only have no name entry.


use tracing::debug;

use crate::address::Rva;
use crate::from_byte_slice::FromByteSlice;
use crate::image::Image;
use crate::list::TypedList;
use crate::load::{LoadContext, Span, Structure};
use crate::raw::ImageExportDirectory;
use crate::segment::Segment;


#[derive(Clone, Debug, Default)]
pub struct ExportDirectory {
    span: Span,
}
impl ExportDirectory {
    pub(crate) fn load(&mut self, context: &mut LoadContext) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < ImageExportDirectory::SIZE {
            debug!("export directory needs {:#X} bytes, only {:#X} available", ImageExportDirectory::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        self.span.set_loaded(context, ImageExportDirectory::SIZE, false);
    }

    pub fn raw(&self) -> ImageExportDirectory { self.span.read(0) }
    pub fn set_raw(&mut self, value: ImageExportDirectory) { self.span.write(0, value) }

    pub fn characteristics(&self) -> u32 { self.span.read(0x00) }
    pub fn set_characteristics(&mut self, value: u32) { self.span.write(0x00, value) }

    pub fn time_date_stamp(&self) -> u32 { self.span.read(0x04) }
    pub fn set_time_date_stamp(&mut self, value: u32) { self.span.write(0x04, value) }

    pub fn major_version(&self) -> u16 { self.span.read(0x08) }
    pub fn set_major_version(&mut self, value: u16) { self.span.write(0x08, value) }

    pub fn minor_version(&self) -> u16 { self.span.read(0x0A) }
    pub fn set_minor_version(&mut self, value: u16) { self.span.write(0x0A, value) }

    /// Address of the module's own name.
    pub fn name(&self) -> Rva { self.span.read(0x0C) }
    pub fn set_name(&mut self, value: Rva) { self.span.write(0x0C, value) }

    /// Ordinal of the first entry in the export address table.
    pub fn base(&self) -> u32 { self.span.read(0x10) }
    pub fn set_base(&mut self, value: u32) { self.span.write(0x10, value) }

    pub fn number_of_functions(&self) -> u32 { self.span.read(0x14) }
    pub fn set_number_of_functions(&mut self, value: u32) { self.span.write(0x14, value) }

    pub fn number_of_names(&self) -> u32 { self.span.read(0x18) }
    pub fn set_number_of_names(&mut self, value: u32) { self.span.write(0x18, value) }

    pub fn address_of_functions(&self) -> Rva { self.span.read(0x1C) }
    pub fn set_address_of_functions(&mut self, value: Rva) { self.span.write(0x1C, value) }

    pub fn address_of_names(&self) -> Rva { self.span.read(0x20) }
    pub fn set_address_of_names(&mut self, value: Rva) { self.span.write(0x20, value) }

    pub fn address_of_name_ordinals(&self) -> Rva { self.span.read(0x24) }
    pub fn set_address_of_name_ordinals(&mut self, value: Rva) { self.span.write(0x24, value) }

    /// The export address table.
    pub fn functions(&self, image: &Image) -> TypedList<Rva> {
        if self.is_empty() {
            return TypedList::default();
        }
        TypedList::create(image, self.address_of_functions(), self.number_of_functions() as usize, image.options().maximum_number_of_functions)
    }

    /// The name pointer table.
    pub fn names(&self, image: &Image) -> TypedList<Rva> {
        if self.is_empty() {
            return TypedList::default();
        }
        TypedList::create(image, self.address_of_names(), self.number_of_names() as usize, image.options().maximum_number_of_functions)
    }

    pub fn name_ordinals(&self, image: &Image) -> TypedList<u16> {
        if self.is_empty() {
            return TypedList::default();
        }
        TypedList::create(image, self.address_of_name_ordinals(), self.number_of_names() as usize, image.options().maximum_number_of_functions)
    }
}
impl Structure for ExportDirectory {
    fn span(&self) -> &Span { &self.span }
}


/// One entry of the export address table.
#[derive(Clone, Debug)]
pub struct ExportEntry {
    /// Index into the export address table.
    pub index: usize,

    /// Index into the name tables, if the function is exported by name.
    pub name_index: Option<usize>,

    pub ordinal: u32,

    /// Address of the function or, for forwarders, of the forwarder string.
    pub function: Rva,

    /// The name's bytes; empty if exported by ordinal only.
    pub name: Segment,
}
impl ExportEntry {
    pub fn has_name(&self) -> bool {
        self.name_index.is_some()
    }

    /// The name, or `#` followed by the ordinal.
    pub fn display_name(&self) -> String {
        if self.has_name() {
            self.name.read_ascii_string(usize::MAX)
        } else {
            format!("#{}", self.ordinal)
        }
    }
}


/// Finds the name slot pointing at the export address table entry `index`.
///
/// The name ordinal table is usually sorted by name, not by index, but two layouts are common
/// enough to check first: every function named, where slot `index` is the one; and the
/// ordinal-only functions at the front, where slot `index - ordinal_only_count` is.
fn lookup_name_index(name_ordinals: &TypedList<u16>, index: usize, ordinal_only_count: usize) -> Option<usize> {
    let points_at_index = |slot: usize| {
        name_ordinals.try_get(slot)
            .is_some_and(|ordinal| usize::from(ordinal) == index)
    };

    if points_at_index(index) {
        return Some(index);
    }
    if ordinal_only_count > 0 && index >= ordinal_only_count && points_at_index(index - ordinal_only_count) {
        return Some(index - ordinal_only_count);
    }
    name_ordinals.iter()
        .position(|ordinal| usize::from(ordinal) == index)
}


/// The tables behind an [`ExportView`], read once per traversal.
#[derive(Clone)]
struct ExportTables<'a> {
    image: &'a Image,
    base: u32,
    ordinal_only_count: usize,
    functions: TypedList<Rva>,
    names: TypedList<Rva>,
    name_ordinals: TypedList<u16>,
}
impl<'a> ExportTables<'a> {
    fn new(view: &ExportView<'a>) -> Self {
        let directory = view.directory;
        let image = view.image;
        Self {
            image,
            base: if directory.is_empty() { 0 } else { directory.base() },
            ordinal_only_count: view.ordinal_only_count,
            functions: directory.functions(image),
            names: directory.names(image),
            name_ordinals: directory.name_ordinals(image),
        }
    }

    fn entry(&self, index: usize) -> ExportEntry {
        let name_index = lookup_name_index(&self.name_ordinals, index, self.ordinal_only_count);
        let name = name_index
            .and_then(|slot| self.names.try_get(slot))
            .map(|rva| self.image.create_ascii_string_data(rva))
            .unwrap_or_default();
        ExportEntry {
            index,
            name_index,
            ordinal: self.base.wrapping_add(index as u32),
            function: self.functions.try_get(index).unwrap_or_default(),
            name,
        }
    }
}


/// The exported functions of an image, one per export address table entry.
#[derive(Clone, Copy)]
pub struct ExportView<'a> {
    image: &'a Image,
    directory: &'a ExportDirectory,
    ordinal_only_count: usize,
    count: usize,
}
impl<'a> ExportView<'a> {
    pub(crate) fn new(image: &'a Image) -> Self {
        let directory = image.export_directory();
        let (ordinal_only_count, count) = if directory.is_empty() {
            (0, 0)
        } else {
            let functions = directory.number_of_functions() as usize;
            let names = directory.number_of_names() as usize;
            (functions.saturating_sub(names), functions.min(image.options().maximum_number_of_functions))
        };
        Self {
            image,
            directory,
            ordinal_only_count,
            count,
        }
    }

    pub fn directory(&self) -> &'a ExportDirectory { self.directory }
    pub fn len(&self) -> usize { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// How many more functions there are than names.
    pub fn ordinal_only_count(&self) -> usize { self.ordinal_only_count }

    /// The name the module gives itself.
    pub fn module_name(&self) -> String {
        if self.directory.is_empty() {
            return String::new();
        }
        self.image.read_ascii_string(self.directory.name())
    }

    /// # Panics
    ///
    /// Panics if `index` is not less than [`len`](ExportView::len).
    pub fn get(&self, index: usize) -> ExportEntry {
        assert!(index < self.count, "export index {} out of range for {} exports", index, self.count);
        ExportTables::new(self).entry(index)
    }

    pub fn iter(&self) -> ExportIter<'a> {
        ExportIter {
            tables: ExportTables::new(self),
            index: 0,
            count: self.count,
        }
    }
}
impl<'a> IntoIterator for &ExportView<'a> {
    type Item = ExportEntry;
    type IntoIter = ExportIter<'a>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ExportIter<'a> {
    tables: ExportTables<'a>,
    index: usize,
    count: usize,
}
impl<'a> Iterator for ExportIter<'a> {
    type Item = ExportEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let entry = self.tables.entry(self.index);
        self.index += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}
impl<'a> ExactSizeIterator for ExportIter<'a> {}


#[cfg(test)]
mod tests {
    use super::lookup_name_index;
    use crate::address::Rva;
    use crate::image::Image;
    use crate::list::TypedList;
    use crate::load::{LoadState, Structure};
    use crate::options::LoadOptions;
    use crate::segment::Segment;
    use crate::test_images::ImageBuilder;
    use tracing_test::traced_test;

    /// Export directory at 0x2000 (file 0x600) of `sample.dll` with five functions, three of
    /// them named, at ordinals 7 through 11.
    fn exporting_image() -> ImageBuilder {
        let mut builder = ImageBuilder::pe32_with_sections();
        builder.directories.push((0, 0x2000, 0x100));
        builder
            .patch_u32(0x600 + 0x0C, 0x2100)
            .patch_u32(0x600 + 0x10, 7)
            .patch_u32(0x600 + 0x14, 5)
            .patch_u32(0x600 + 0x18, 3)
            .patch_u32(0x600 + 0x1C, 0x2040)
            .patch_u32(0x600 + 0x20, 0x2060)
            .patch_u32(0x600 + 0x24, 0x2070)
            .patch(0x700, b"sample.dll\0");
        for (i, function) in [0x1000u32, 0x1010, 0x1020, 0x1030, 0x1040].iter().enumerate() {
            builder.patch_u32(0x640 + 4 * i, *function);
        }
        // names sorted alphabetically: Alpha -> 3, Beta -> 2, Gamma -> 4
        builder
            .patch_u32(0x660, 0x2110)
            .patch_u32(0x664, 0x2120)
            .patch_u32(0x668, 0x2130)
            .patch_u16(0x670, 3)
            .patch_u16(0x672, 2)
            .patch_u16(0x674, 4)
            .patch(0x710, b"Alpha\0")
            .patch(0x720, b"Beta\0")
            .patch(0x730, b"Gamma\0");
        builder
    }

    #[test]
    fn test_lookup_name_index() {
        let bytes: Vec<u8> = [2u16, 3, 4].iter().flat_map(|o| o.to_le_bytes()).collect();
        let name_ordinals = TypedList::<u16>::new(Segment::new(bytes), 3);
        let ordinal_only_count = 5 - 3;

        assert_eq!(lookup_name_index(&name_ordinals, 0, ordinal_only_count), None);
        assert_eq!(lookup_name_index(&name_ordinals, 1, ordinal_only_count), None);
        assert_eq!(lookup_name_index(&name_ordinals, 2, ordinal_only_count), Some(0));
        assert_eq!(lookup_name_index(&name_ordinals, 3, ordinal_only_count), Some(1));
        assert_eq!(lookup_name_index(&name_ordinals, 4, ordinal_only_count), Some(2));
    }

    #[test]
    fn test_lookup_unsorted() {
        let bytes: Vec<u8> = [1u16, 0, 2].iter().flat_map(|o| o.to_le_bytes()).collect();
        let name_ordinals = TypedList::<u16>::new(Segment::new(bytes), 3);
        assert_eq!(lookup_name_index(&name_ordinals, 0, 0), Some(1));
        assert_eq!(lookup_name_index(&name_ordinals, 1, 0), Some(0));
        assert_eq!(lookup_name_index(&name_ordinals, 2, 0), Some(2));
        assert_eq!(lookup_name_index(&name_ordinals, 3, 0), None);
    }

    #[test]
    #[traced_test]
    fn test_export_view() {
        let image = Image::new(exporting_image().build());
        let directory = image.export_directory();
        assert_eq!(directory.state(), LoadState::Loaded);
        assert_eq!(directory.number_of_functions(), 5);

        let exports = image.export_view();
        assert_eq!(exports.len(), 5);
        assert_eq!(exports.ordinal_only_count(), 2);
        assert_eq!(exports.module_name(), "sample.dll");

        let entries: Vec<_> = exports.iter().collect();
        assert_eq!(entries.len(), 5);
        let names: Vec<String> = entries.iter().map(|entry| entry.display_name()).collect();
        assert_eq!(names, vec!["#7", "#8", "Beta", "Alpha", "Gamma"]);
        assert_eq!(entries[3].name_index, Some(0));
        assert_eq!(entries[3].ordinal, 10);
        assert_eq!(entries[3].function, Rva(0x1030));
        assert!(!entries[0].has_name());
        assert!(entries[0].name.is_empty());

        let single = exports.get(4);
        assert_eq!(single.display_name(), "Gamma");
    }

    #[test]
    #[traced_test]
    fn test_no_exports() {
        let image = Image::new(ImageBuilder::pe32_with_sections().build());
        assert_eq!(image.export_directory().state(), LoadState::NotExist);
        let exports = image.export_view();
        assert!(exports.is_empty());
        assert_eq!(exports.iter().count(), 0);
        assert_eq!(exports.module_name(), "");
    }

    #[test]
    #[traced_test]
    fn test_function_ceiling() {
        let mut builder = exporting_image();
        builder.patch_u32(0x600 + 0x14, 0x10_0000);

        let image = Image::new(builder.build());
        assert_eq!(image.export_view().len(), LoadOptions::EXECUTABLE_DEFAULT.maximum_number_of_functions);
        // the address table cannot be that long without truncation
        assert!(image.export_directory().functions(&image).is_empty());
        assert!(logs_contain("more than the maximum"));
        assert_eq!(image.export_view().get(0).function, Rva(0));
    }

    #[test]
    #[traced_test]
    #[should_panic]
    fn test_get_out_of_range() {
        let image = Image::new(exporting_image().build());
        let _ = image.export_view().get(5);
    }
}
