use std::ffi::OsString;
use std::path::{Component, Path, PathBuf, Prefix};

pub fn get_drive_letter(path: &Path) -> Option<OsString> {
    for component in path.components() {
        if let Component::Prefix(prefix_comp) = component {
            match prefix_comp.kind() {
                Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                    let drive_letter = (letter as char).to_ascii_uppercase().to_string();
                    return Some(OsString::from(drive_letter));
                }
                _ => (),
            }
        }
    }
    None
}

/// `\\?\C:\roms` -> `C:\roms`. Other verbatim forms (UNC, device) are kept.
pub fn strip_verbatim_prefix(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Prefix(prefix)) => match prefix.kind() {
            Prefix::VerbatimDisk(letter) => {
                let mut result = PathBuf::from(format!("{}:\\", letter as char));
                for component in components.skip_while(|c| matches!(c, Component::RootDir)) {
                    result.push(component.as_os_str());
                }
                result
            }
            _ => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}
