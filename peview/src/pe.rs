//! Portable Executable headers.
//!
//! The NT headers consist of the `PE\0\0` signature, the COFF file header and the optional
//! header, which ends in the data directories. Object files consist of the COFF file header
//! alone.


use bitflags::bitflags;
use from_to_repr::from_to_other;
use tracing::debug;

use crate::address::{FileOffset, Rva};
use crate::from_byte_slice::FromByteSlice;
use crate::list::SpanList;
use crate::load::{LoadContext, LoadState, Span, Structure};
use crate::options::LoadOptions;
use crate::raw::{
    ImageDataDirectory, ImageFileHeader, ImageOptionalHeader32, ImageOptionalHeader64,
    IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE,
};


#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u16, derive_compare = "as_int")]
pub enum MachineType {
    Unknown = 0x0000,
    AlphaAxp = 0x0184,
    Alpha64 = 0x0284,
    Amd64 = 0x8664,
    Arm = 0x01C0,
    Arm64 = 0xAA64,
    ArmThumb2 = 0x01C4,
    EfiByteCode = 0x0EBC,
    I386 = 0x014C,
    Itanium = 0x0200,
    LoongArch32 = 0x6232,
    LoongArch64 = 0x6264,
    MipsWithFpu = 0x0366,
    PowerPc = 0x01F0,
    MipsR4k = 0x0166,
    RiscV32 = 0x5032,
    RiscV64 = 0x5064,
    RiscV128 = 0x5128,
    HitachiSh3 = 0x01A2,
    HitachiSh4 = 0x01A6,
    ArmThumb = 0x01C2,
    Other(u16),
}
impl MachineType {
    /// Whether the architecture uses 64-bit (PE32+) images.
    pub fn is_64_bit(self) -> bool {
        matches!(
            self,
            Self::Alpha64 | Self::Amd64 | Self::Arm64 | Self::Itanium | Self::LoongArch64 | Self::RiscV64,
        )
    }

    /// Whether a COFF file header starting with this machine marks an object file.
    ///
    /// Only the architectures common for Windows objects are considered, since a DOS header
    /// could start with any of the others by chance.
    pub fn marks_object_file(self) -> bool {
        matches!(self, Self::I386 | Self::Arm | Self::Itanium | Self::Amd64 | Self::Arm64)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct Characteristics : u16 {
        /// Relocation data has been stripped; image must be loaded at its preferred address.
        const RELOCS_STRIPPED = 0x0001;

        /// Image is valid and can be run.
        const EXECUTABLE_IMAGE = 0x0002;

        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;

        /// Application can handle addresses beyond 2GB.
        const LARGE_ADDRESS_AWARE = 0x0020;

        const BYTES_REVERSED_LO = 0x0080;
        const IS_32BIT_MACHINE = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;

        /// Image is a dynamic-link library.
        const DLL = 0x2000;

        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u16, derive_compare = "as_int")]
pub enum Subsystem {
    Unknown = 0,
    Native = 1,
    WindowsGui = 2,
    WindowsCui = 3,
    Os2Cui = 5,
    PosixCui = 7,
    NativeWindows = 8,
    WindowsCeGui = 9,
    EfiApplication = 10,
    EfiBootServiceDriver = 11,
    EfiRuntimeDriver = 12,
    EfiRom = 13,
    Xbox = 14,
    WindowsBootApplication = 16,
    Other(u16),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct DllCharacteristics : u16 {
        const HIGH_ENTROPY_VIRTUAL_ADDRESSES = 0x0020;

        /// DLL can be relocated at load time.
        const DYNAMIC_BASE = 0x0040;

        const FORCE_INTEGRITY = 0x0080;
        const NX_COMPATIBILITY = 0x0100;
        const NO_ISOLATION = 0x0200;
        const NO_SEH = 0x0400;
        const NO_BIND = 0x0800;
        const APPCONTAINER = 0x1000;
        const WDM_DRIVER = 0x2000;

        /// Image supports Control Flow Guard.
        const GUARD_CF = 0x4000;

        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KnownDataDirectoryEntry {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TlsTable,
    LoadConfigTable,
    BoundImport,
    ImportAddressTable,
    DelayImportDescriptor,
    ClrRuntimeHeader,
    Reserved15,
}
impl KnownDataDirectoryEntry {
    pub const ALL: [Self; 16] = [
        Self::ExportTable, Self::ImportTable, Self::ResourceTable, Self::ExceptionTable,
        Self::CertificateTable, Self::BaseRelocationTable, Self::Debug, Self::Architecture,
        Self::GlobalPtr, Self::TlsTable, Self::LoadConfigTable, Self::BoundImport,
        Self::ImportAddressTable, Self::DelayImportDescriptor, Self::ClrRuntimeHeader,
        Self::Reserved15,
    ];
}
impl From<KnownDataDirectoryEntry> for usize {
    fn from(value: KnownDataDirectoryEntry) -> Self {
        value as usize
    }
}


#[derive(Clone, Debug, Default)]
pub struct FileHeader {
    span: Span,
}
impl FileHeader {
    pub(crate) fn load(&mut self, context: &mut LoadContext) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < ImageFileHeader::SIZE {
            debug!("file header needs {:#X} bytes, only {:#X} available", ImageFileHeader::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        self.span.set_loaded(context, ImageFileHeader::SIZE, false);
    }

    pub fn raw(&self) -> ImageFileHeader { self.span.read(0) }
    pub fn try_raw(&self) -> Option<ImageFileHeader> { self.span.try_read(0) }
    pub fn set_raw(&mut self, value: ImageFileHeader) { self.span.write(0, value) }

    pub fn machine(&self) -> MachineType { MachineType::from_base_type(self.span.read(0x00)) }
    pub fn set_machine(&mut self, value: MachineType) { self.span.write(0x00, value.to_base_type()) }

    pub fn number_of_sections(&self) -> u16 { self.span.read(0x02) }
    pub fn set_number_of_sections(&mut self, value: u16) { self.span.write(0x02, value) }

    pub fn time_date_stamp(&self) -> u32 { self.span.read(0x04) }
    pub fn set_time_date_stamp(&mut self, value: u32) { self.span.write(0x04, value) }

    pub fn pointer_to_symbol_table(&self) -> FileOffset { self.span.read(0x08) }
    pub fn set_pointer_to_symbol_table(&mut self, value: FileOffset) { self.span.write(0x08, value) }

    pub fn number_of_symbols(&self) -> u32 { self.span.read(0x0C) }
    pub fn set_number_of_symbols(&mut self, value: u32) { self.span.write(0x0C, value) }

    pub fn size_of_optional_header(&self) -> u16 { self.span.read(0x10) }
    pub fn set_size_of_optional_header(&mut self, value: u16) { self.span.write(0x10, value) }

    pub fn characteristics(&self) -> Characteristics {
        Characteristics::from_bits_retain(self.span.read(0x12))
    }
    pub fn set_characteristics(&mut self, value: Characteristics) { self.span.write(0x12, value.bits()) }

    pub(crate) fn try_number_of_sections(&self) -> Option<u16> { self.span.try_read(0x02) }
}
impl Structure for FileHeader {
    fn span(&self) -> &Span { &self.span }
}


#[derive(Clone, Debug, Default)]
pub struct DataDirectory {
    span: Span,
}
impl DataDirectory {
    fn not_exist() -> Self {
        let mut directory = Self::default();
        directory.load(&mut LoadContext::not_exist());
        directory
    }

    pub(crate) fn load(&mut self, context: &mut LoadContext) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < ImageDataDirectory::SIZE {
            debug!("data directory needs {:#X} bytes, only {:#X} available", ImageDataDirectory::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        self.span.set_loaded(context, ImageDataDirectory::SIZE, false);
    }

    pub fn raw(&self) -> ImageDataDirectory { self.span.read(0) }

    pub fn virtual_address(&self) -> Rva { self.span.read(0) }
    pub fn set_virtual_address(&mut self, value: Rva) { self.span.write(0, value) }

    pub fn size(&self) -> u32 { self.span.read(4) }
    pub fn set_size(&mut self, value: u32) { self.span.write(4, value) }

    /// The address of the directory's data, if the entry exists and is not null.
    pub fn present_address(&self) -> Option<Rva> {
        if self.span.state() != LoadState::Loaded {
            return None;
        }
        let address: Rva = self.span.read(0);
        (!address.is_null()).then_some(address)
    }
}
impl Structure for DataDirectory {
    fn span(&self) -> &Span { &self.span }
}


/// The two optional header variants, copied out of the image.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RawOptionalHeader {
    Pe32(ImageOptionalHeader32),
    Pe64(ImageOptionalHeader64),
}


/// Accessors for pointer-sized fields, which are 64 bits wide in PE32+ images.
macro_rules! pointer_fields {
    ($($getter:ident, $setter:ident = $offset32:expr, $offset64:expr;)*) => {
        $(
            pub fn $getter(&self) -> u64 {
                if self.is_pe32 {
                    self.span.read::<u32>($offset32).into()
                } else {
                    self.span.read::<u64>($offset64)
                }
            }

            /// In PE32 images, only the lower 32 bits are stored.
            pub fn $setter(&mut self, value: u64) {
                if self.is_pe32 {
                    self.span.write::<u32>($offset32, value as u32)
                } else {
                    self.span.write::<u64>($offset64, value)
                }
            }
        )*
    };
}


#[derive(Clone, Debug)]
pub struct OptionalHeader {
    span: Span,
    is_pe32: bool,
    data_directories: SpanList<DataDirectory>,
    absent_directory: DataDirectory,
}
impl OptionalHeader {
    pub(crate) fn new(options: &LoadOptions) -> Self {
        Self {
            span: Span::default(),
            is_pe32: true,
            data_directories: SpanList::new(options.maximum_number_of_rva_and_sizes, options.truncate_if_exceeded),
            absent_directory: DataDirectory::not_exist(),
        }
    }

    pub(crate) fn load(&mut self, context: &mut LoadContext, options: &LoadOptions, file_header: &FileHeader) {
        let start = context.data.clone();
        let old = self.span.raw_data().clone();

        self.load_self(context, options, file_header);
        let self_loaded = context.next;

        let number_of_rva_and_sizes = if self_loaded { self.number_of_rva_and_sizes() as usize } else { 0 };
        self.data_directories.load_with(
            context,
            || number_of_rva_and_sizes,
            |directory, context| directory.load(context),
        );

        if self_loaded {
            // the directories may stop short of (or, in broken files, run past) the declared size
            let length = if context.next {
                usize::from(file_header.size_of_optional_header())
            } else {
                context.consumed_since(&start)
            };
            self.span.commit(context, &start, &old, length, !context.next);
        }
    }

    fn load_self(&mut self, context: &mut LoadContext, options: &LoadOptions, file_header: &FileHeader) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < 4 || file_header.is_empty() {
            debug!("optional header: only {:#X} bytes available", context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }

        let magic: u16 = context.data.read(0);
        let is_pe32 = match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => true,
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => false,
            other => {
                if options.check_signature {
                    debug!("optional header magic {:#06X} unknown", other);
                    self.span.set_error(&mut context.next);
                    return;
                }
                !file_header.machine().is_64_bit()
            },
        };

        let minimum_size = if is_pe32 { ImageOptionalHeader32::SIZE } else { ImageOptionalHeader64::SIZE };
        let size_of_optional_header = file_header.size_of_optional_header();
        if usize::from(size_of_optional_header) < minimum_size
                || size_of_optional_header > options.maximum_size_of_optional_header
                || context.data.len() < usize::from(size_of_optional_header) {
            debug!(
                "optional header size {:#X} invalid (minimum {:#X}, maximum {:#X}, available {:#X})",
                size_of_optional_header, minimum_size, options.maximum_size_of_optional_header, context.data.len(),
            );
            self.span.set_error(&mut context.next);
            return;
        }

        self.is_pe32 = is_pe32;
        self.span.set_loaded(context, minimum_size, true);
    }

    pub fn is_pe32(&self) -> bool { self.is_pe32 }
    pub fn is_pe64(&self) -> bool { !self.is_pe32 }

    pub fn raw(&self) -> RawOptionalHeader {
        if self.is_pe32 {
            RawOptionalHeader::Pe32(self.span.read(0))
        } else {
            RawOptionalHeader::Pe64(self.span.read(0))
        }
    }

    span_fields! {
        magic, set_magic: u16 = 0x00;
        major_linker_version, set_major_linker_version: u8 = 0x02;
        minor_linker_version, set_minor_linker_version: u8 = 0x03;
        size_of_code, set_size_of_code: u32 = 0x04;
        size_of_initialized_data, set_size_of_initialized_data: u32 = 0x08;
        size_of_uninitialized_data, set_size_of_uninitialized_data: u32 = 0x0C;
        address_of_entry_point, set_address_of_entry_point: Rva = 0x10;
        base_of_code, set_base_of_code: Rva = 0x14;
        section_alignment, set_section_alignment: u32 = 0x20;
        file_alignment, set_file_alignment: u32 = 0x24;
        major_operating_system_version, set_major_operating_system_version: u16 = 0x28;
        minor_operating_system_version, set_minor_operating_system_version: u16 = 0x2A;
        major_image_version, set_major_image_version: u16 = 0x2C;
        minor_image_version, set_minor_image_version: u16 = 0x2E;
        major_subsystem_version, set_major_subsystem_version: u16 = 0x30;
        minor_subsystem_version, set_minor_subsystem_version: u16 = 0x32;
        win32_version_value, set_win32_version_value: u32 = 0x34;
        size_of_image, set_size_of_image: u32 = 0x38;
        size_of_headers, set_size_of_headers: u32 = 0x3C;
        check_sum, set_check_sum: u32 = 0x40;
    }

    pointer_fields! {
        image_base, set_image_base = 0x1C, 0x18;
        size_of_stack_reserve, set_size_of_stack_reserve = 0x48, 0x48;
        size_of_stack_commit, set_size_of_stack_commit = 0x4C, 0x50;
        size_of_heap_reserve, set_size_of_heap_reserve = 0x50, 0x58;
        size_of_heap_commit, set_size_of_heap_commit = 0x54, 0x60;
    }

    /// `None` in PE32+ images, which have no such field.
    pub fn base_of_data(&self) -> Option<Rva> {
        self.is_pe32.then(|| self.span.read(0x18))
    }

    /// Ignored in PE32+ images.
    pub fn set_base_of_data(&mut self, value: Rva) {
        if self.is_pe32 {
            self.span.write(0x18, value)
        }
    }

    pub fn subsystem(&self) -> Subsystem { Subsystem::from_base_type(self.span.read(0x44)) }
    pub fn set_subsystem(&mut self, value: Subsystem) { self.span.write(0x44, value.to_base_type()) }

    pub fn dll_characteristics(&self) -> DllCharacteristics {
        DllCharacteristics::from_bits_retain(self.span.read(0x46))
    }
    pub fn set_dll_characteristics(&mut self, value: DllCharacteristics) { self.span.write(0x46, value.bits()) }

    fn tail_offset(&self) -> usize {
        if self.is_pe32 { 0x58 } else { 0x68 }
    }

    pub fn loader_flags(&self) -> u32 { self.span.read(self.tail_offset()) }
    pub fn set_loader_flags(&mut self, value: u32) { self.span.write(self.tail_offset(), value) }

    /// Number of data directories the file declares (not necessarily how many were loaded).
    pub fn number_of_rva_and_sizes(&self) -> u32 { self.span.read(self.tail_offset() + 4) }
    pub fn set_number_of_rva_and_sizes(&mut self, value: u32) { self.span.write(self.tail_offset() + 4, value) }

    pub(crate) fn try_section_alignment(&self) -> Option<u32> { self.span.try_read(0x20) }
    pub(crate) fn try_file_alignment(&self) -> Option<u32> { self.span.try_read(0x24) }
    pub(crate) fn try_size_of_image(&self) -> Option<u32> { self.span.try_read(0x38) }
    pub(crate) fn try_size_of_headers(&self) -> Option<u32> { self.span.try_read(0x3C) }

    pub fn data_directories(&self) -> &SpanList<DataDirectory> { &self.data_directories }

    /// The data directory in the given slot.
    ///
    /// Slots beyond the loaded directories yield a directory in the `NotExist` state.
    pub fn data_directory(&self, entry: KnownDataDirectoryEntry) -> &DataDirectory {
        self.data_directories.get(usize::from(entry))
            .unwrap_or(&self.absent_directory)
    }

    pub fn export_table(&self) -> &DataDirectory { self.data_directory(KnownDataDirectoryEntry::ExportTable) }
    pub fn import_table(&self) -> &DataDirectory { self.data_directory(KnownDataDirectoryEntry::ImportTable) }
}
impl Structure for OptionalHeader {
    fn span(&self) -> &Span { &self.span }
}


#[derive(Clone, Debug)]
pub struct NtHeaders {
    span: Span,
    pub(crate) file_header: FileHeader,
    optional_header: OptionalHeader,
}
impl NtHeaders {
    pub(crate) fn new(options: &LoadOptions) -> Self {
        Self {
            span: Span::default(),
            file_header: FileHeader::default(),
            optional_header: OptionalHeader::new(options),
        }
    }

    pub(crate) fn load(&mut self, context: &mut LoadContext, options: &LoadOptions) {
        let start = context.data.clone();
        let old = self.span.raw_data().clone();

        self.load_self(context, options);
        let self_loaded = context.next;

        self.file_header.load(context);
        self.optional_header.load(context, options, &self.file_header);

        if self_loaded {
            let length = context.consumed_since(&start);
            self.span.commit(context, &start, &old, length, !context.next);
        }
    }

    fn load_self(&mut self, context: &mut LoadContext, options: &LoadOptions) {
        if !self.span.pre_load(context) {
            return;
        }
        if context.data.len() < 4 {
            debug!("NT headers: only {:#X} bytes available for the signature", context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        if options.check_signature {
            let signature: u32 = context.data.read(0);
            if signature != IMAGE_NT_SIGNATURE {
                debug!("NT signature is {:#010X} instead of {:#010X}", signature, IMAGE_NT_SIGNATURE);
                self.span.set_error(&mut context.next);
                return;
            }
        }
        self.span.set_loaded(context, 4, true);
    }

    pub fn signature(&self) -> u32 { self.span.read(0) }
    pub fn set_signature(&mut self, value: u32) { self.span.write(0, value) }

    pub fn file_header(&self) -> &FileHeader { &self.file_header }
    pub fn file_header_mut(&mut self) -> &mut FileHeader { &mut self.file_header }
    pub fn optional_header(&self) -> &OptionalHeader { &self.optional_header }
    pub fn optional_header_mut(&mut self) -> &mut OptionalHeader { &mut self.optional_header }
}
impl Structure for NtHeaders {
    fn span(&self) -> &Span { &self.span }
}
