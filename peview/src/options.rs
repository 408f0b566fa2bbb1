use crate::image::ImageFormat;


/// Validation switches and ceilings applied while loading an image.
///
/// Every loop over a count read from the file is bounded by one of these ceilings.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LoadOptions {
    /// Verify the DOS and NT signatures and the optional header magic.
    pub check_signature: bool,

    /// Cap counts that exceed their ceiling instead of failing the structure.
    pub truncate_if_exceeded: bool,

    pub maximum_string_length: usize,

    /// Largest accepted `e_lfanew`.
    pub maximum_lfanew: u32,

    pub maximum_number_of_sections: usize,
    pub maximum_size_of_optional_header: u16,
    pub maximum_number_of_rva_and_sizes: usize,
    pub maximum_number_of_functions: usize,
    pub maximum_import_module_count: usize,
    pub maximum_import_function_count: usize,
}
impl LoadOptions {
    pub const EXECUTABLE_DEFAULT: Self = Self {
        check_signature: true,
        truncate_if_exceeded: false,
        maximum_string_length: 0x400,
        maximum_lfanew: 0x200,
        maximum_number_of_sections: 0x100,
        maximum_size_of_optional_header: 0x200,
        maximum_number_of_rva_and_sizes: 0x20,
        maximum_number_of_functions: 0x4000,
        maximum_import_module_count: 0x100,
        maximum_import_function_count: 0x2000,
    };

    /// Object files have neither DOS nor optional headers, so only the section and string
    /// ceilings matter.
    pub const OBJECT_DEFAULT: Self = Self {
        check_signature: true,
        truncate_if_exceeded: false,
        maximum_string_length: 0x1000,
        maximum_lfanew: 0,
        maximum_number_of_sections: 0xFFFF,
        maximum_size_of_optional_header: 0,
        maximum_number_of_rva_and_sizes: 0,
        maximum_number_of_functions: 0,
        maximum_import_module_count: 0,
        maximum_import_function_count: 0,
    };

    pub const fn default_for(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Executable => Self::EXECUTABLE_DEFAULT,
            ImageFormat::Object => Self::OBJECT_DEFAULT,
        }
    }
}
impl Default for LoadOptions {
    fn default() -> Self {
        Self::EXECUTABLE_DEFAULT
    }
}
