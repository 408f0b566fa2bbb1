mod dependencies;


use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use display_bytes::DisplayBytes;
use memmap2::Mmap;
use peview::{Image, ImageFormat, ImageLayout, LoadOptions, Structure};
use tracing_subscriber::EnvFilter;


#[derive(Parser)]
enum ProgMode {
    /// Shows the load result of every structure and the main header fields.
    Headers(InputFileArgs),

    /// Lists the section table.
    Sections(InputFileArgs),

    /// Lists the exported functions.
    Exports(InputFileArgs),

    /// Lists the imported functions of each module.
    Imports(InputFileArgs),

    /// Lists the modules needed by the file and, transitively, by those found next to it.
    Dependencies(InputFileArgs),
}

#[derive(Clone, Parser)]
struct InputFileArgs {
    pub input_file: PathBuf,

    /// JSON file with load options replacing the defaults.
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Cap counts exceeding their maximum instead of failing.
    #[arg(long)]
    pub truncate: bool,

    /// The file is a memory dump of a loaded image.
    #[arg(long)]
    pub memory_layout: bool,
}


#[derive(Debug)]
pub(crate) enum OpenError {
    Io(io::Error),
    Options(serde_json::Error),
    Image(peview::Error),
}
impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)
                => write!(f, "I/O error: {}", e),
            Self::Options(e)
                => write!(f, "invalid load options: {}", e),
            Self::Image(e)
                => write!(f, "failed to load image: {}", e),
        }
    }
}
impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Options(e) => Some(e),
            Self::Image(e) => Some(e),
        }
    }
}
impl From<io::Error> for OpenError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}
impl From<serde_json::Error> for OpenError {
    fn from(value: serde_json::Error) -> Self { Self::Options(value) }
}
impl From<peview::Error> for OpenError {
    fn from(value: peview::Error) -> Self { Self::Image(value) }
}


/// An image parsed straight from a file mapping.
pub(crate) struct MappedImage {
    pub image: Image,

    // the image points into the mapping; declared last so it is dropped last
    _mapping: Mmap,
}

pub(crate) fn open_image(path: &Path, args: &InputFileArgs) -> Result<MappedImage, OpenError> {
    let file = File::open(path)?;
    // SAFETY: the file is not expected to change while it is inspected
    let mapping = unsafe { Mmap::map(&file) }?;

    let layout = if args.memory_layout { ImageLayout::Memory } else { ImageLayout::File };
    let format = match layout {
        ImageLayout::Memory => ImageFormat::Executable,
        ImageLayout::File => ImageFormat::detect(&mapping),
    };
    let mut options = match &args.options {
        Some(options_path) => {
            let options_file = File::open(options_path)?;
            serde_json::from_reader(options_file)?
        },
        None => LoadOptions::default_for(format),
    };
    if args.truncate {
        options.truncate_if_exceeded = true;
    }

    // SAFETY: the mapping is stored next to the image and outlives it
    let image = unsafe {
        Image::from_raw_parts(mapping.as_ptr(), mapping.len(), layout, Some(format), Some(options))
    }?;
    Ok(MappedImage {
        image,
        _mapping: mapping,
    })
}


fn print_headers(image: &Image) {
    let file_header = image.file_header();
    let optional_header = image.optional_header();
    let data_directories: Vec<_> = optional_header.data_directories().iter()
        .map(|directory| serde_json::json!({
            "virtual_address": directory.virtual_address(),
            "size": directory.size(),
            "load_result": directory.load_result(),
        }))
        .collect();

    let mut report = serde_json::json!({
        "format": image.format(),
        "layout": image.layout(),
        "loaded_without_error": image.is_loaded_no_error(),
        "image_size": image.image_size(),
        "load_results": {
            "dos_header": image.dos_header().load_result(),
            "nt_headers": image.nt_headers().load_result(),
            "file_header": file_header.load_result(),
            "optional_header": optional_header.load_result(),
            "data_directories": optional_header.data_directories().load_result(),
            "section_headers": image.section_headers().load_result(),
            "export_directory": image.export_directory().load_result(),
            "import_directory": image.import_directory().load_result(),
        },
        "data_directories": data_directories,
    });
    if image.dos_header().state().is_loaded() {
        report["e_lfanew"] = image.dos_header().lfanew().into();
    }
    if file_header.state().is_loaded() {
        report["file_header"] = serde_json::json!({
            "machine": format!("{:?}", file_header.machine()),
            "number_of_sections": file_header.number_of_sections(),
            "time_date_stamp": file_header.time_date_stamp(),
            "size_of_optional_header": file_header.size_of_optional_header(),
            "characteristics": file_header.characteristics(),
        });
    }
    if optional_header.state().is_loaded() {
        report["optional_header"] = serde_json::json!({
            "pe64": optional_header.is_pe64(),
            "address_of_entry_point": optional_header.address_of_entry_point(),
            "image_base": optional_header.image_base(),
            "section_alignment": optional_header.section_alignment(),
            "file_alignment": optional_header.file_alignment(),
            "size_of_image": optional_header.size_of_image(),
            "size_of_headers": optional_header.size_of_headers(),
            "subsystem": format!("{:?}", optional_header.subsystem()),
            "dll_characteristics": optional_header.dll_characteristics(),
            "number_of_rva_and_sizes": optional_header.number_of_rva_and_sizes(),
        });
    }

    let output = serde_json::to_string_pretty(&report)
        .expect("failed to serialize header report");
    println!("{}", output);
}

fn print_sections(image: &Image) {
    println!("{:<10} {:>10} {:>10} {:>10} {:>10}  characteristics", "name", "address", "size", "offset", "raw size");
    for section in image.section_headers() {
        let raw = section.raw();
        println!(
            "{:<10} {:>10} {:>#10X} {:>10} {:>#10X}  {:?}",
            DisplayBytes::from(raw.name).to_string(),
            section.virtual_address(),
            section.virtual_size(),
            section.pointer_to_raw_data(),
            section.size_of_raw_data(),
            section.characteristics(),
        );
    }
    println!("{:?}", image.section_headers().load_result());
}

fn print_exports(image: &Image) {
    let exports = image.export_view();
    println!("{} ({:?})", exports.module_name(), image.export_directory().load_result());
    for entry in exports.iter() {
        println!("{:>6} {} {}", entry.ordinal, entry.function, entry.display_name());
    }
}

fn print_imports(image: &Image) {
    println!("{:?}", image.import_directory().load_result());
    for module in image.import_view().iter() {
        println!("{}", module.name_string());
        for entry in module.iter() {
            match entry.hint {
                Some(hint) => println!("  {:>5} {}", hint, entry.display_name()),
                None => println!("  {:>5} {}", "", entry.display_name()),
            }
        }
    }
}


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mode = ProgMode::parse();
    match mode {
        ProgMode::Headers(args) => {
            let mapped = open_image(&args.input_file, &args)
                .expect("failed to open input file");
            print_headers(&mapped.image);
        },
        ProgMode::Sections(args) => {
            let mapped = open_image(&args.input_file, &args)
                .expect("failed to open input file");
            print_sections(&mapped.image);
        },
        ProgMode::Exports(args) => {
            let mapped = open_image(&args.input_file, &args)
                .expect("failed to open input file");
            print_exports(&mapped.image);
        },
        ProgMode::Imports(args) => {
            let mapped = open_image(&args.input_file, &args)
                .expect("failed to open input file");
            print_imports(&mapped.image);
        },
        ProgMode::Dependencies(args) => {
            let modules = dependencies::collect(&args.input_file, &args)
                .expect("failed to collect dependencies");
            for module in modules {
                println!("{}", module);
            }
        },
    }
}
