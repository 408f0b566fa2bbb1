use std::fmt;

use bitflags::bitflags;
use display_bytes::DisplayBytes;
use tracing::debug;

use crate::address::{align_up_u64, FileOffset, Rva};
use crate::from_byte_slice::FromByteSlice;
use crate::list::SpanList;
use crate::load::{LoadContext, Span, Structure};
use crate::raw::{ImageSectionHeader, IMAGE_SIZEOF_SHORT_NAME};
use crate::segment::Segment;


bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct SectionCharacteristics : u32 {
        const NO_PAD = 0x0000_0008;
        const CONTAINS_CODE = 0x0000_0020;
        const CONTAINS_INITIALIZED_DATA = 0x0000_0040;
        const CONTAINS_UNINITIALIZED_DATA = 0x0000_0080;
        const LINK_OTHER = 0x0000_0100;
        const LINK_INFO = 0x0000_0200;
        const LINK_REMOVE = 0x0000_0800;
        const LINK_COMMON_DATA = 0x0000_1000;
        const GLOBAL_POINTER_RELATIVE = 0x0000_8000;
        const MEM_LOCKED = 0x0004_0000;
        const MEM_PRELOAD = 0x0008_0000;
        const ALIGN_MASK = 0x00F0_0000;
        const LINK_NRELOC_OVFL = 0x0100_0000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}


#[derive(Clone, Default)]
pub struct SectionHeader {
    span: Span,
}
impl SectionHeader {
    pub(crate) fn load(&mut self, context: &mut LoadContext) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < ImageSectionHeader::SIZE {
            debug!("section header needs {:#X} bytes, only {:#X} available", ImageSectionHeader::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        self.span.set_loaded(context, ImageSectionHeader::SIZE, false);
    }

    pub fn raw(&self) -> ImageSectionHeader { self.span.read(0) }
    pub fn set_raw(&mut self, value: ImageSectionHeader) { self.span.write(0, value) }

    /// The 8 bytes of the name field, including any NUL padding.
    pub fn name(&self) -> Segment {
        assert!(!self.span.is_empty(), "section header not loaded");
        self.span.raw_data().slice_len(0, IMAGE_SIZEOF_SHORT_NAME)
    }

    /// The name up to the first NUL.
    pub fn display_name(&self) -> String {
        self.name().read_ascii_string(IMAGE_SIZEOF_SHORT_NAME)
    }

    pub fn set_name(&mut self, value: [u8; IMAGE_SIZEOF_SHORT_NAME]) { self.span.write(0x00, value) }

    pub fn virtual_size(&self) -> u32 { self.span.read(0x08) }
    pub fn set_virtual_size(&mut self, value: u32) { self.span.write(0x08, value) }

    pub fn virtual_address(&self) -> Rva { self.span.read(0x0C) }
    pub fn set_virtual_address(&mut self, value: Rva) { self.span.write(0x0C, value) }

    pub fn size_of_raw_data(&self) -> u32 { self.span.read(0x10) }
    pub fn set_size_of_raw_data(&mut self, value: u32) { self.span.write(0x10, value) }

    pub fn pointer_to_raw_data(&self) -> FileOffset { self.span.read(0x14) }
    pub fn set_pointer_to_raw_data(&mut self, value: FileOffset) { self.span.write(0x14, value) }

    pub fn pointer_to_relocations(&self) -> FileOffset { self.span.read(0x18) }
    pub fn set_pointer_to_relocations(&mut self, value: FileOffset) { self.span.write(0x18, value) }

    pub fn pointer_to_linenumbers(&self) -> FileOffset { self.span.read(0x1C) }
    pub fn set_pointer_to_linenumbers(&mut self, value: FileOffset) { self.span.write(0x1C, value) }

    pub fn number_of_relocations(&self) -> u16 { self.span.read(0x20) }
    pub fn set_number_of_relocations(&mut self, value: u16) { self.span.write(0x20, value) }

    pub fn number_of_linenumbers(&self) -> u16 { self.span.read(0x22) }
    pub fn set_number_of_linenumbers(&mut self, value: u16) { self.span.write(0x22, value) }

    pub fn characteristics(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_retain(self.span.read(0x24))
    }
    pub fn set_characteristics(&mut self, value: SectionCharacteristics) { self.span.write(0x24, value.bits()) }

    /// Whether `offset` lies within the section's raw data.
    pub fn contains_file_offset(&self, offset: FileOffset) -> bool {
        let start = u64::from(self.pointer_to_raw_data().0);
        let end = start + u64::from(self.size_of_raw_data());
        (start..end).contains(&u64::from(offset.0))
    }

    /// Whether `rva` lies within the section once mapped, with the virtual size rounded up to
    /// `section_alignment`.
    pub fn contains_rva(&self, rva: Rva, section_alignment: u32) -> bool {
        let start = u64::from(self.virtual_address().0);
        let end = start + align_up_u64(self.virtual_size().into(), section_alignment);
        (start..end).contains(&u64::from(rva.0))
    }
}
impl Structure for SectionHeader {
    fn span(&self) -> &Span { &self.span }
}
impl fmt::Debug for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(raw) = self.span.try_read::<ImageSectionHeader>(0) else {
            return f.debug_struct("SectionHeader")
                .field("load_result", &self.span.load_result())
                .finish();
        };
        f.debug_struct("SectionHeader")
            .field("name", &DisplayBytes::from(raw.name))
            .field("virtual_address", &Rva(raw.virtual_address))
            .field("virtual_size", &format_args!("{:#X}", raw.virtual_size))
            .field("pointer_to_raw_data", &FileOffset(raw.pointer_to_raw_data))
            .field("size_of_raw_data", &format_args!("{:#X}", raw.size_of_raw_data))
            .field("characteristics", &SectionCharacteristics::from_bits_retain(raw.characteristics))
            .field("load_result", &self.span.load_result())
            .finish()
    }
}


impl SpanList<SectionHeader> {
    /// The last section that has any raw data.
    pub fn last_with_raw_data(&self) -> Option<&SectionHeader> {
        self.iter()
            .rev()
            .find(|section| section.size_of_raw_data() != 0)
    }
}


#[cfg(test)]
mod tests {
    use super::{SectionCharacteristics, SectionHeader};
    use crate::address::{FileOffset, Rva};
    use crate::list::SpanList;
    use crate::load::{LoadContext, LoadState, Structure};
    use crate::segment::Segment;
    use crate::test_images::{ImageBuilder, SectionLayout};
    use tracing_test::traced_test;

    fn load_sections(builder: &ImageBuilder) -> SpanList<SectionHeader> {
        let data = Segment::new(builder.build());
        let mut sections = SpanList::new(0x100, false);
        let mut context = LoadContext::new(data.slice(builder.section_table_offset()));
        sections.load_with(&mut context, || builder.sections.len(), |section: &mut SectionHeader, context| section.load(context));
        sections
    }

    #[test]
    #[traced_test]
    fn test_fields() {
        let sections = load_sections(&ImageBuilder::pe32_with_sections());
        assert_eq!(sections.state(), LoadState::Loaded);
        assert_eq!(sections.len(), 2);

        let rdata = &sections[1];
        assert_eq!(rdata.display_name(), ".rdata");
        assert_eq!(rdata.name().len(), 8);
        assert_eq!(rdata.virtual_address(), Rva(0x2000));
        assert_eq!(rdata.virtual_size(), 0x800);
        assert_eq!(rdata.pointer_to_raw_data(), FileOffset(0x600));
        assert_eq!(rdata.size_of_raw_data(), 0x400);
        assert!(rdata.characteristics().contains(SectionCharacteristics::MEM_READ));
        assert!(format!("{:?}", rdata).contains("b\".rdata\\0\\0\""));
    }

    #[test]
    #[traced_test]
    fn test_containment() {
        let sections = load_sections(&ImageBuilder::pe32_with_sections());
        let text = &sections[0];
        assert!(text.contains_file_offset(FileOffset(0x400)));
        assert!(text.contains_file_offset(FileOffset(0x5FF)));
        assert!(!text.contains_file_offset(FileOffset(0x600)));

        // virtual size 0x180 rounds up to a whole page
        assert!(text.contains_rva(Rva(0x1FFF), 0x1000));
        assert!(!text.contains_rva(Rva(0x1180), 0));
    }

    #[test]
    #[traced_test]
    fn test_last_with_raw_data() {
        let mut builder = ImageBuilder::pe32_with_sections();
        builder.sections.push(SectionLayout::new(".bss", 0x3000, 0x100, 0, 0));
        let sections = load_sections(&builder);
        assert_eq!(sections.len(), 3);
        let last = sections.last_with_raw_data().expect("no section with raw data");
        assert_eq!(last.display_name(), ".rdata");
    }

    #[test]
    #[traced_test]
    fn test_truncated_table() {
        let builder = ImageBuilder::pe32_with_sections();
        let mut buf = builder.build();
        buf.truncate(builder.section_table_offset() + 0x28 + 0x10);
        let data = Segment::new(buf);

        let mut sections = SpanList::<SectionHeader>::new(0x100, false);
        let mut context = LoadContext::new(data.slice(builder.section_table_offset()));
        sections.load_with(&mut context, || 2, |section, context| section.load(context));
        assert_eq!(sections.state(), LoadState::PartlyLoaded);
        assert_eq!(sections.len(), 1);
        assert!(!context.next);
    }
}
