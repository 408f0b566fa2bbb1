//! On-disk records, exactly as laid out in the file (little-endian, 1-byte packed).
//!
//! These are plain copies; the structure nodes read them out of their segments on demand.


pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;
pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x010B;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x020B;
pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;
pub const IMAGE_SIZEOF_SHORT_NAME: usize = 8;
pub const IMAGE_ORDINAL_FLAG32: u32 = 0x8000_0000;
pub const IMAGE_ORDINAL_FLAG64: u64 = 0x8000_0000_0000_0000;


define_raw_struct!(
    /// `IMAGE_DOS_HEADER`
    ImageDosHeader, 0x40, {
        e_magic: u16 = 0x00,
        e_cblp: u16 = 0x02,
        e_cp: u16 = 0x04,
        e_crlc: u16 = 0x06,
        e_cparhdr: u16 = 0x08,
        e_minalloc: u16 = 0x0A,
        e_maxalloc: u16 = 0x0C,
        e_ss: u16 = 0x0E,
        e_sp: u16 = 0x10,
        e_csum: u16 = 0x12,
        e_ip: u16 = 0x14,
        e_cs: u16 = 0x16,
        e_lfarlc: u16 = 0x18,
        e_ovno: u16 = 0x1A,
        e_res: [u8; 8] = 0x1C,
        e_oemid: u16 = 0x24,
        e_oeminfo: u16 = 0x26,
        e_res2: [u8; 20] = 0x28,
        /// File offset of the NT headers.
        e_lfanew: u32 = 0x3C,
    }
);

define_raw_struct!(
    /// `IMAGE_FILE_HEADER` (the COFF header)
    ImageFileHeader, 0x14, {
        machine: u16 = 0x00,
        number_of_sections: u16 = 0x02,
        time_date_stamp: u32 = 0x04,
        pointer_to_symbol_table: u32 = 0x08,
        number_of_symbols: u32 = 0x0C,
        size_of_optional_header: u16 = 0x10,
        characteristics: u16 = 0x12,
    }
);

define_raw_struct!(
    /// `IMAGE_OPTIONAL_HEADER32` without the data directories
    ImageOptionalHeader32, 0x60, {
        magic: u16 = 0x00,
        major_linker_version: u8 = 0x02,
        minor_linker_version: u8 = 0x03,
        size_of_code: u32 = 0x04,
        size_of_initialized_data: u32 = 0x08,
        size_of_uninitialized_data: u32 = 0x0C,
        address_of_entry_point: u32 = 0x10,
        base_of_code: u32 = 0x14,
        base_of_data: u32 = 0x18,
        image_base: u32 = 0x1C,
        section_alignment: u32 = 0x20,
        file_alignment: u32 = 0x24,
        major_operating_system_version: u16 = 0x28,
        minor_operating_system_version: u16 = 0x2A,
        major_image_version: u16 = 0x2C,
        minor_image_version: u16 = 0x2E,
        major_subsystem_version: u16 = 0x30,
        minor_subsystem_version: u16 = 0x32,
        win32_version_value: u32 = 0x34,
        size_of_image: u32 = 0x38,
        size_of_headers: u32 = 0x3C,
        check_sum: u32 = 0x40,
        subsystem: u16 = 0x44,
        dll_characteristics: u16 = 0x46,
        size_of_stack_reserve: u32 = 0x48,
        size_of_stack_commit: u32 = 0x4C,
        size_of_heap_reserve: u32 = 0x50,
        size_of_heap_commit: u32 = 0x54,
        loader_flags: u32 = 0x58,
        number_of_rva_and_sizes: u32 = 0x5C,
    }
);

define_raw_struct!(
    /// `IMAGE_OPTIONAL_HEADER64` without the data directories
    ImageOptionalHeader64, 0x70, {
        magic: u16 = 0x00,
        major_linker_version: u8 = 0x02,
        minor_linker_version: u8 = 0x03,
        size_of_code: u32 = 0x04,
        size_of_initialized_data: u32 = 0x08,
        size_of_uninitialized_data: u32 = 0x0C,
        address_of_entry_point: u32 = 0x10,
        base_of_code: u32 = 0x14,
        image_base: u64 = 0x18,
        section_alignment: u32 = 0x20,
        file_alignment: u32 = 0x24,
        major_operating_system_version: u16 = 0x28,
        minor_operating_system_version: u16 = 0x2A,
        major_image_version: u16 = 0x2C,
        minor_image_version: u16 = 0x2E,
        major_subsystem_version: u16 = 0x30,
        minor_subsystem_version: u16 = 0x32,
        win32_version_value: u32 = 0x34,
        size_of_image: u32 = 0x38,
        size_of_headers: u32 = 0x3C,
        check_sum: u32 = 0x40,
        subsystem: u16 = 0x44,
        dll_characteristics: u16 = 0x46,
        size_of_stack_reserve: u64 = 0x48,
        size_of_stack_commit: u64 = 0x50,
        size_of_heap_reserve: u64 = 0x58,
        size_of_heap_commit: u64 = 0x60,
        loader_flags: u32 = 0x68,
        number_of_rva_and_sizes: u32 = 0x6C,
    }
);

define_raw_struct!(
    /// `IMAGE_DATA_DIRECTORY`
    ImageDataDirectory, 0x08, {
        virtual_address: u32 = 0x00,
        size: u32 = 0x04,
    }
);

define_raw_struct!(
    /// `IMAGE_SECTION_HEADER`
    ImageSectionHeader, 0x28, {
        name: [u8; IMAGE_SIZEOF_SHORT_NAME] = 0x00,
        virtual_size: u32 = 0x08,
        virtual_address: u32 = 0x0C,
        size_of_raw_data: u32 = 0x10,
        pointer_to_raw_data: u32 = 0x14,
        pointer_to_relocations: u32 = 0x18,
        pointer_to_linenumbers: u32 = 0x1C,
        number_of_relocations: u16 = 0x20,
        number_of_linenumbers: u16 = 0x22,
        characteristics: u32 = 0x24,
    }
);

define_raw_struct!(
    /// `IMAGE_EXPORT_DIRECTORY`
    ImageExportDirectory, 0x28, {
        characteristics: u32 = 0x00,
        time_date_stamp: u32 = 0x04,
        major_version: u16 = 0x08,
        minor_version: u16 = 0x0A,
        name: u32 = 0x0C,
        base: u32 = 0x10,
        number_of_functions: u32 = 0x14,
        number_of_names: u32 = 0x18,
        address_of_functions: u32 = 0x1C,
        address_of_names: u32 = 0x20,
        address_of_name_ordinals: u32 = 0x24,
    }
);

define_raw_struct!(
    /// `IMAGE_IMPORT_DESCRIPTOR`
    ImageImportDescriptor, 0x14, {
        original_first_thunk: u32 = 0x00,
        time_date_stamp: u32 = 0x04,
        forwarder_chain: u32 = 0x08,
        name: u32 = 0x0C,
        first_thunk: u32 = 0x10,
    }
);
