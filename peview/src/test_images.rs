//! Synthetic PE and COFF buffers for tests.


pub(crate) const NT_OFFSET: usize = 0x80;
pub(crate) const FILE_HEADER_OFFSET: usize = NT_OFFSET + 4;
pub(crate) const OPTIONAL_HEADER_OFFSET: usize = FILE_HEADER_OFFSET + 0x14;


#[derive(Clone, Debug)]
pub(crate) struct SectionLayout {
    pub name: [u8; 8],
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
}
impl SectionLayout {
    pub fn new(name: &str, virtual_address: u32, virtual_size: u32, pointer_to_raw_data: u32, size_of_raw_data: u32) -> Self {
        let mut name_bytes = [0u8; 8];
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: name_bytes,
            virtual_address,
            virtual_size,
            pointer_to_raw_data,
            size_of_raw_data,
        }
    }
}


#[derive(Clone, Debug)]
pub(crate) struct ImageBuilder {
    pub pe64: bool,
    pub machine: u16,
    pub optional_magic: u16,
    pub size_of_optional_header: Option<u16>,
    pub number_of_rva_and_sizes: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_headers: u32,
    pub size_of_image: Option<u32>,
    pub sections: Vec<SectionLayout>,
    pub directories: Vec<(usize, u32, u32)>,
    pub patches: Vec<(usize, Vec<u8>)>,
    pub file_size: Option<usize>,
}
impl ImageBuilder {
    pub fn pe32() -> Self {
        Self {
            pe64: false,
            machine: 0x014C,
            optional_magic: 0x010B,
            size_of_optional_header: None,
            number_of_rva_and_sizes: 16,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            size_of_headers: 0x400,
            size_of_image: None,
            sections: Vec::new(),
            directories: Vec::new(),
            patches: Vec::new(),
            file_size: None,
        }
    }

    pub fn pe64() -> Self {
        Self {
            pe64: true,
            machine: 0x8664,
            optional_magic: 0x020B,
            ..Self::pe32()
        }
    }

    /// A PE32 image with `.text` at 0x1000 (file 0x400) and `.rdata` at 0x2000 (file 0x600).
    pub fn pe32_with_sections() -> Self {
        let mut builder = Self::pe32();
        builder.sections.push(SectionLayout::new(".text", 0x1000, 0x180, 0x400, 0x200));
        builder.sections.push(SectionLayout::new(".rdata", 0x2000, 0x800, 0x600, 0x400));
        builder
    }

    pub fn optional_header_size(&self) -> usize {
        match self.size_of_optional_header {
            Some(size) => size.into(),
            None => self.minimum_optional_header_size() + 8 * self.number_of_rva_and_sizes as usize,
        }
    }

    fn minimum_optional_header_size(&self) -> usize {
        if self.pe64 { 0x70 } else { 0x60 }
    }

    pub fn section_table_offset(&self) -> usize {
        OPTIONAL_HEADER_OFFSET + self.optional_header_size()
    }

    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> &mut Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    pub fn patch_u16(&mut self, offset: usize, value: u16) -> &mut Self {
        self.patch(offset, &value.to_le_bytes())
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) -> &mut Self {
        self.patch(offset, &value.to_le_bytes())
    }

    pub fn patch_u64(&mut self, offset: usize, value: u64) -> &mut Self {
        self.patch(offset, &value.to_le_bytes())
    }

    /// File offset of `rva` according to the configured sections.
    pub fn offset_of(&self, rva: u32) -> usize {
        for section in &self.sections {
            if rva >= section.virtual_address && rva < section.virtual_address + section.size_of_raw_data {
                return (rva - section.virtual_address + section.pointer_to_raw_data) as usize;
            }
        }
        rva as usize
    }

    fn computed_size_of_image(&self) -> u32 {
        let align = |value: u32| (value + self.section_alignment - 1) & !(self.section_alignment - 1);
        match self.sections.last() {
            Some(section) => align(section.virtual_address + section.virtual_size),
            None => align(self.size_of_headers),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let optional_end = self.section_table_offset();
        let headers_end = optional_end + 0x28 * self.sections.len();
        let mut size = headers_end.max(self.size_of_headers as usize);
        for section in &self.sections {
            size = size.max((section.pointer_to_raw_data + section.size_of_raw_data) as usize);
        }
        for (offset, bytes) in &self.patches {
            size = size.max(offset + bytes.len());
        }
        let mut buf = vec![0u8; self.file_size.unwrap_or(size).max(headers_end)];

        let put_u16 = |buf: &mut Vec<u8>, offset: usize, value: u16| buf[offset..offset+2].copy_from_slice(&value.to_le_bytes());
        let put_u32 = |buf: &mut Vec<u8>, offset: usize, value: u32| buf[offset..offset+4].copy_from_slice(&value.to_le_bytes());
        let put_u64 = |buf: &mut Vec<u8>, offset: usize, value: u64| buf[offset..offset+8].copy_from_slice(&value.to_le_bytes());

        // DOS header
        buf[0..2].copy_from_slice(b"MZ");
        put_u32(&mut buf, 0x3C, NT_OFFSET as u32);

        // NT signature and file header
        buf[NT_OFFSET..NT_OFFSET+4].copy_from_slice(b"PE\0\0");
        put_u16(&mut buf, FILE_HEADER_OFFSET, self.machine);
        put_u16(&mut buf, FILE_HEADER_OFFSET + 0x02, self.sections.len() as u16);
        put_u16(&mut buf, FILE_HEADER_OFFSET + 0x10, self.optional_header_size() as u16);
        put_u16(&mut buf, FILE_HEADER_OFFSET + 0x12, 0x0102);

        // optional header
        let opt = OPTIONAL_HEADER_OFFSET;
        let minimum = self.minimum_optional_header_size();
        if opt + minimum <= buf.len() {
            put_u16(&mut buf, opt, self.optional_magic);
            put_u32(&mut buf, opt + 0x10, 0x1000);
            put_u32(&mut buf, opt + 0x14, 0x1000);
            put_u32(&mut buf, opt + 0x20, self.section_alignment);
            put_u32(&mut buf, opt + 0x24, self.file_alignment);
            put_u32(&mut buf, opt + 0x38, self.size_of_image.unwrap_or_else(|| self.computed_size_of_image()));
            put_u32(&mut buf, opt + 0x3C, self.size_of_headers);
            put_u16(&mut buf, opt + 0x44, 3);
            if self.pe64 {
                put_u64(&mut buf, opt + 0x18, 0x1_4000_0000);
                put_u64(&mut buf, opt + 0x48, 0x10_0000);
                put_u32(&mut buf, opt + 0x6C, self.number_of_rva_and_sizes);
            } else {
                put_u32(&mut buf, opt + 0x18, 0x2000);
                put_u32(&mut buf, opt + 0x1C, 0x0040_0000);
                put_u32(&mut buf, opt + 0x48, 0x10_0000);
                put_u32(&mut buf, opt + 0x5C, self.number_of_rva_and_sizes);
            }
            for &(index, rva, size) in &self.directories {
                let entry = opt + minimum + 8 * index;
                put_u32(&mut buf, entry, rva);
                put_u32(&mut buf, entry + 4, size);
            }
        }

        // section table
        for (i, section) in self.sections.iter().enumerate() {
            let entry = optional_end + 0x28 * i;
            buf[entry..entry+8].copy_from_slice(&section.name);
            put_u32(&mut buf, entry + 0x08, section.virtual_size);
            put_u32(&mut buf, entry + 0x0C, section.virtual_address);
            put_u32(&mut buf, entry + 0x10, section.size_of_raw_data);
            put_u32(&mut buf, entry + 0x14, section.pointer_to_raw_data);
            put_u32(&mut buf, entry + 0x24, 0x4000_0040);
        }

        for (offset, bytes) in &self.patches {
            buf[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        buf
    }
}


/// A COFF object file with the given machine and section names (each with 0x10 bytes of data).
pub(crate) fn coff_object(machine: u16, section_names: &[&str]) -> Vec<u8> {
    let table_end = 0x14 + 0x28 * section_names.len();
    let mut buf = vec![0u8; table_end + 0x10 * section_names.len()];
    buf[0..2].copy_from_slice(&machine.to_le_bytes());
    buf[2..4].copy_from_slice(&(section_names.len() as u16).to_le_bytes());
    for (i, name) in section_names.iter().enumerate() {
        let entry = 0x14 + 0x28 * i;
        buf[entry..entry + name.len()].copy_from_slice(name.as_bytes());
        let data_offset = (table_end + 0x10 * i) as u32;
        buf[entry+0x10..entry+0x14].copy_from_slice(&0x10u32.to_le_bytes());
        buf[entry+0x14..entry+0x18].copy_from_slice(&data_offset.to_le_bytes());
    }
    buf
}
