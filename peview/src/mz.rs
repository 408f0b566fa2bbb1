//! MZ (Mark Zbikowski) executable header.
//!
//! Every PE executable starts with a DOS executable, usually a stub that prints an error message
//! and terminates. For PE purposes, the only interesting parts of its header are the signature
//! and `e_lfanew`, the file offset of the NT headers.


use tracing::debug;

use crate::from_byte_slice::FromByteSlice;
use crate::load::{LoadContext, Span, Structure};
use crate::options::LoadOptions;
use crate::raw::{ImageDosHeader, IMAGE_DOS_SIGNATURE};


const LFANEW_OFFSET: usize = 0x3C;


#[derive(Clone, Debug, Default)]
pub struct DosHeader {
    span: Span,
}
impl DosHeader {
    pub(crate) fn load(&mut self, context: &mut LoadContext, options: &LoadOptions) {
        if !self.span.pre_load(context) {
            return;
        }

        if context.data.len() < ImageDosHeader::SIZE {
            debug!("DOS header needs {:#X} bytes, only {:#X} available", ImageDosHeader::SIZE, context.data.len());
            self.span.set_error(&mut context.next);
            return;
        }
        if options.check_signature {
            let magic: u16 = context.data.read(0);
            if magic != IMAGE_DOS_SIGNATURE {
                debug!("DOS header signature is {:#06X} instead of {:#06X}", magic, IMAGE_DOS_SIGNATURE);
                self.span.set_error(&mut context.next);
                return;
            }
        }

        self.span.set_loaded(context, ImageDosHeader::SIZE, false);
    }

    /// # Panics
    ///
    /// Panics if the header is not loaded.
    pub fn raw(&self) -> ImageDosHeader { self.span.read(0) }

    pub fn try_raw(&self) -> Option<ImageDosHeader> { self.span.try_read(0) }

    /// Overwrites the whole header in the underlying buffer.
    pub fn set_raw(&mut self, value: ImageDosHeader) { self.span.write(0, value) }

    span_fields! {
        magic, set_magic: u16 = 0x00;
        /// Bytes on the last 512-byte page.
        bytes_on_last_page, set_bytes_on_last_page: u16 = 0x02;
        pages, set_pages: u16 = 0x04;
        relocations, set_relocations: u16 = 0x06;
        /// Header size in 16-byte paragraphs.
        header_paragraphs, set_header_paragraphs: u16 = 0x08;
        min_alloc, set_min_alloc: u16 = 0x0A;
        max_alloc, set_max_alloc: u16 = 0x0C;
        initial_ss, set_initial_ss: u16 = 0x0E;
        initial_sp, set_initial_sp: u16 = 0x10;
        checksum, set_checksum: u16 = 0x12;
        initial_ip, set_initial_ip: u16 = 0x14;
        initial_cs, set_initial_cs: u16 = 0x16;
        relocation_table_offset, set_relocation_table_offset: u16 = 0x18;
        overlay_number, set_overlay_number: u16 = 0x1A;
        reserved, set_reserved: [u8; 8] = 0x1C;
        oem_id, set_oem_id: u16 = 0x24;
        oem_info, set_oem_info: u16 = 0x26;
        reserved2, set_reserved2: [u8; 20] = 0x28;
        /// File offset of the NT headers.
        lfanew, set_lfanew: u32 = LFANEW_OFFSET;
    }
}
impl Structure for DosHeader {
    fn span(&self) -> &Span { &self.span }
}
