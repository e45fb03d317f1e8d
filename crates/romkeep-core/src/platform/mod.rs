#[cfg(target_os = "windows")]
pub mod windows;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(target_os = "windows")]
pub fn get_drive_letter(path: &Path) -> Option<OsString> {
    windows::get_drive_letter(path)
}

#[cfg(not(target_os = "windows"))]
pub fn get_drive_letter(_path: &Path) -> Option<OsString> {
    None
}

/// Absolute, symlink-free form of a drive root as it is stored.
pub fn normalize_root(path: &Path) -> io::Result<PathBuf> {
    let canonical = path.canonicalize()?;
    #[cfg(target_os = "windows")]
    let canonical = windows::strip_verbatim_prefix(&canonical);
    Ok(canonical)
}

/// Label for a drive registered without one: the drive letter on Windows,
/// otherwise the root's final component.
pub fn default_label(root: &Path) -> String {
    if let Some(letter) = get_drive_letter(root) {
        let rest = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        return if rest.is_empty() {
            format!("{}:", letter.to_string_lossy())
        } else {
            format!("{}: {}", letter.to_string_lossy(), rest)
        };
    }
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

/// `path` below `root`, with `/` separators.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label_uses_last_component() {
        #[cfg(not(target_os = "windows"))]
        assert_eq!(default_label(Path::new("/media/usb-roms")), "usb-roms");
    }

    #[test]
    fn test_relative_slash_path() {
        let root = Path::new("/mnt/roms");
        let path = root.join("nes").join("mario.nes");
        assert_eq!(relative_slash_path(root, &path).as_deref(), Some("nes/mario.nes"));
        assert_eq!(relative_slash_path(root, Path::new("/elsewhere/x")), None);
    }
}
