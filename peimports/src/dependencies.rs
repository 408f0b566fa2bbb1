//! Transitive module dependencies.


use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{open_image, InputFileArgs, OpenError};


/// Entries of `directory` other than subdirectories, keyed by their lowercased name.
fn files_by_lowercase_name(directory: &Path) -> Result<HashMap<String, PathBuf>, OpenError> {
    let mut files = HashMap::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(|name| name.to_ascii_lowercase()) else {
            continue;
        };
        files.insert(name, entry.path());
    }
    Ok(files)
}


/// Collects the names of all modules imported by `root` and, recursively, by every imported
/// module found in the same directory as `root`.
///
/// Names are deduplicated ignoring ASCII case, keeping the spelling seen first, and returned
/// sorted the same way.
pub(crate) fn collect(root: &Path, args: &InputFileArgs) -> Result<Vec<String>, OpenError> {
    let directory = match root.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let available = files_by_lowercase_name(&directory)?;

    let mut found: BTreeMap<String, String> = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    let mut first = true;
    while let Some(path) = pending.pop() {
        let mapped = match open_image(&path, args) {
            Ok(mapped) => mapped,
            Err(e) if !first => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            },
            Err(e) => return Err(e),
        };
        first = false;

        for module in mapped.image.import_view().iter() {
            let name = module.name_string();
            if name.is_empty() {
                continue;
            }
            let key = name.to_ascii_lowercase();
            if found.contains_key(&key) {
                continue;
            }
            if let Some(module_path) = available.get(&key) {
                debug!("{} imports {}, found at {}", path.display(), name, module_path.display());
                pending.push(module_path.clone());
            }
            found.insert(key, name);
        }
    }

    Ok(found.into_values().collect())
}


#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tracing_test::traced_test;

    use super::collect;
    use crate::{InputFileArgs, OpenError};

    const IMPORTS_RVA: u32 = 0x1000;
    const IMPORTS_OFFSET: usize = 0x200;

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset+2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset+4].copy_from_slice(&value.to_le_bytes());
    }

    /// A PE32 image with a single `.idata` section importing ordinal 1 from each of `modules`.
    fn importing_image(modules: &[&str]) -> Vec<u8> {
        assert!(modules.len() <= 4);
        let mut buf = vec![0u8; 0x400];
        buf[0..2].copy_from_slice(b"MZ");
        put_u32(&mut buf, 0x3C, 0x40);

        buf[0x40..0x44].copy_from_slice(b"PE\0\0");
        put_u16(&mut buf, 0x44, 0x014C);
        put_u16(&mut buf, 0x46, 1);
        put_u16(&mut buf, 0x54, 0xE0);
        put_u16(&mut buf, 0x56, 0x0102);

        let optional = 0x58;
        put_u16(&mut buf, optional, 0x010B);
        put_u32(&mut buf, optional + 0x20, 0x1000);
        put_u32(&mut buf, optional + 0x24, 0x200);
        put_u32(&mut buf, optional + 0x38, 0x2000);
        put_u32(&mut buf, optional + 0x3C, 0x200);
        put_u32(&mut buf, optional + 0x5C, 16);
        put_u32(&mut buf, optional + 0x68, IMPORTS_RVA);
        put_u32(&mut buf, optional + 0x6C, 0x14 * (modules.len() as u32 + 1));

        let section = optional + 0xE0;
        buf[section..section+6].copy_from_slice(b".idata");
        put_u32(&mut buf, section + 0x08, 0x200);
        put_u32(&mut buf, section + 0x0C, IMPORTS_RVA);
        put_u32(&mut buf, section + 0x10, 0x200);
        put_u32(&mut buf, section + 0x14, IMPORTS_OFFSET as u32);
        put_u32(&mut buf, section + 0x24, 0xC000_0040);

        for (i, module) in modules.iter().enumerate() {
            let descriptor = IMPORTS_OFFSET + 0x14 * i;
            let thunks = 0x80 + 8 * i;
            let name = 0x100 + 0x20 * i;
            put_u32(&mut buf, descriptor, IMPORTS_RVA + thunks as u32);
            put_u32(&mut buf, descriptor + 0x0C, IMPORTS_RVA + name as u32);
            put_u32(&mut buf, descriptor + 0x10, IMPORTS_RVA + thunks as u32);
            put_u32(&mut buf, IMPORTS_OFFSET + thunks, 0x8000_0001);
            let name_offset = IMPORTS_OFFSET + name;
            buf[name_offset..name_offset + module.len()].copy_from_slice(module.as_bytes());
        }
        buf
    }

    fn args(input_file: PathBuf) -> InputFileArgs {
        InputFileArgs {
            input_file,
            options: None,
            truncate: false,
            memory_layout: false,
        }
    }

    #[test]
    #[traced_test]
    fn test_transitive_closure() {
        let dir = tempfile::tempdir()
            .expect("failed to create temporary directory");
        let root = dir.path().join("app.exe");
        fs::write(&root, importing_image(&["KERNEL32.dll", "Helper.DLL", "missing.dll"]))
            .expect("failed to write app.exe");
        fs::write(dir.path().join("helper.dll"), importing_image(&["kernel32.DLL", "user32.dll"]))
            .expect("failed to write helper.dll");
        // found despite the different case; imports back into helper
        fs::write(dir.path().join("USER32.DLL"), importing_image(&["ntdll.dll", "HELPER.dll"]))
            .expect("failed to write USER32.DLL");

        let modules = collect(&root, &args(root.clone()))
            .expect("failed to collect dependencies");
        assert_eq!(modules, vec!["Helper.DLL", "KERNEL32.dll", "missing.dll", "ntdll.dll", "user32.dll"]);
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn test_unopenable_dependency_is_skipped() {
        let dir = tempfile::tempdir()
            .expect("failed to create temporary directory");
        let root = dir.path().join("app.exe");
        fs::write(&root, importing_image(&["broken.dll", "kernel32.dll"]))
            .expect("failed to write app.exe");
        std::os::unix::fs::symlink(dir.path().join("nowhere.dll"), dir.path().join("broken.dll"))
            .expect("failed to create symlink");

        let modules = collect(&root, &args(root.clone()))
            .expect("failed to collect dependencies");
        assert_eq!(modules, vec!["broken.dll", "kernel32.dll"]);
        assert!(logs_contain("skipping"));
    }

    #[test]
    #[traced_test]
    fn test_root_failures() {
        let dir = tempfile::tempdir()
            .expect("failed to create temporary directory");
        let root = dir.path().join("absent.exe");
        let result = collect(&root, &args(root.clone()));
        assert!(matches!(result, Err(OpenError::Io(_))));

        // not an image at all: nothing imported, but no failure either
        let garbage = dir.path().join("garbage.exe");
        fs::write(&garbage, b"this is not a PE file")
            .expect("failed to write garbage.exe");
        let modules = collect(&garbage, &args(garbage.clone()))
            .expect("failed to collect dependencies");
        assert!(modules.is_empty());
    }
}
