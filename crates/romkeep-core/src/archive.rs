//! Zip archive listing and member streaming.
//!
//! Members are addressed by a chain of names: `["inner.zip", "game.nes"]` is
//! `game.nes` inside `inner.zip` inside the archive on disk.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

/// A file stored in one archive, as listed by its central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub crc32: u32,
}

/// A leaf of an archive tree, possibly several archives deep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub chain: Vec<String>,
    pub size: u64,
    pub crc32: Option<u32>,
    /// Set when a nested archive could not be opened. The member is still
    /// reported so the failure is recorded.
    pub error: Option<String>,
}

impl ArchiveMember {
    pub fn inner_path(&self) -> String {
        self.chain.join("::")
    }

    pub fn file_name(&self) -> &str {
        let last = self.chain.last().map(String::as_str).unwrap_or_default();
        last.rsplit('/').next().unwrap_or(last)
    }
}

fn list_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        if file.is_dir() {
            continue;
        }
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            size: file.size(),
            crc32: file.crc32(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Entries of the archive at `path`, sorted by name, without extracting anything.
pub fn list(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    list_entries(&mut archive)
}

fn extension_of(name: &str) -> Option<&str> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Every leaf member under `path`, expanding nested archives up to `max_depth`
/// levels. Archives at the depth limit are reported as plain members.
pub fn list_tree(
    path: &Path,
    max_depth: usize,
    is_archive: &dyn Fn(&str) -> bool,
) -> Result<Vec<ArchiveMember>> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let mut members = Vec::new();
    walk_tree(&mut archive, &[], 1, max_depth, is_archive, &mut members)?;
    debug!("Listed {} members in {}", members.len(), path.display());
    Ok(members)
}

fn walk_tree<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    parent: &[String],
    depth: usize,
    max_depth: usize,
    is_archive: &dyn Fn(&str) -> bool,
    out: &mut Vec<ArchiveMember>,
) -> Result<()> {
    for entry in list_entries(archive)? {
        let mut chain = parent.to_vec();
        chain.push(entry.name.clone());

        let nested = depth < max_depth && extension_of(&entry.name).map_or(false, is_archive);
        if !nested {
            out.push(ArchiveMember {
                chain,
                size: entry.size,
                crc32: Some(entry.crc32),
                error: None,
            });
            continue;
        }

        let opened = read_member(archive, &entry.name)
            .and_then(|bytes| Ok(ZipArchive::new(Cursor::new(bytes))?));
        match opened {
            Ok(mut inner) => {
                if let Err(e) = walk_tree(&mut inner, &chain, depth + 1, max_depth, is_archive, out) {
                    warn!("Corrupt nested archive {}: {}", chain.join("::"), e);
                    out.push(ArchiveMember {
                        chain,
                        size: entry.size,
                        crc32: Some(entry.crc32),
                        error: Some(e.to_string()),
                    });
                }
            }
            Err(e) => {
                warn!("Cannot open nested archive {}: {}", chain.join("::"), e);
                out.push(ArchiveMember {
                    chain,
                    size: entry.size,
                    crc32: Some(entry.crc32),
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(())
}

/// Upper bound on the buffer reserved up front for a nested archive. The size
/// in the zip header is not trusted; larger members grow the buffer as read.
const MAX_MEMBER_PREALLOC: u64 = 1 << 20;

fn member_capacity(declared: u64) -> usize {
    declared.min(MAX_MEMBER_PREALLOC) as usize
}

fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(member_capacity(file.size()));
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Stream one member to `f` together with its uncompressed size. Nested
/// archives on the way are decompressed into memory, the leaf is streamed.
pub fn open_member<T>(
    path: &Path,
    chain: &[String],
    f: impl FnOnce(&mut dyn Read, u64) -> Result<T>,
) -> Result<T> {
    if chain.is_empty() {
        return Err(Error::validation("empty archive member chain"));
    }
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    descend(&mut archive, chain, f)
}

fn descend<R: Read + Seek, T>(
    archive: &mut ZipArchive<R>,
    chain: &[String],
    f: impl FnOnce(&mut dyn Read, u64) -> Result<T>,
) -> Result<T> {
    match chain {
        [leaf] => {
            let mut file = archive.by_name(leaf)?;
            let size = file.size();
            f(&mut file, size)
        }
        [outer, rest @ ..] => {
            let bytes = read_member(archive, outer)?;
            let mut inner = ZipArchive::new(Cursor::new(bytes))?;
            descend(&mut inner, rest, f)
        }
        [] => Err(Error::validation("empty archive member chain")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn is_zip(ext: &str) -> bool {
        ext.eq_ignore_ascii_case("zip")
    }

    #[test]
    fn test_list_sorted_with_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.zip");
        std::fs::write(&path, zip_bytes(&[("b.nes", b"bbb"), ("a.nes", b"abc")])).unwrap();

        let entries = list(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.nes");
        assert_eq!(entries[0].crc32, 0x352441c2);
        assert_eq!(entries[1].size, 3);
    }

    #[test]
    fn test_nested_archive_expanded_and_streamed() {
        let inner = zip_bytes(&[("game.nes", b"abc")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, zip_bytes(&[("inner.zip", &inner), ("readme.txt", b"hi")])).unwrap();

        let members = list_tree(&path, 2, &is_zip).unwrap();
        let chains: Vec<String> = members.iter().map(|m| m.inner_path()).collect();
        assert_eq!(chains, vec!["inner.zip::game.nes", "readme.txt"]);

        let data = open_member(&path, &members[0].chain, |r, size| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok((buf, size))
        })
        .unwrap();
        assert_eq!(data, (b"abc".to_vec(), 3));
    }

    #[test]
    fn test_depth_limit_keeps_nested_archive_opaque() {
        let inner = zip_bytes(&[("game.nes", b"abc")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, zip_bytes(&[("inner.zip", &inner)])).unwrap();

        let members = list_tree(&path, 1, &is_zip).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].chain, vec!["inner.zip".to_string()]);
    }

    #[test]
    fn test_member_capacity_ignores_huge_declared_sizes() {
        assert_eq!(member_capacity(3), 3);
        assert_eq!(member_capacity(u64::MAX), MAX_MEMBER_PREALLOC as usize);
    }

    #[test]
    fn test_nested_member_larger_than_prealloc_reads_fully() {
        let big = vec![0x5au8; MAX_MEMBER_PREALLOC as usize + 17];
        let inner = zip_bytes(&[("big.bin", &big)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, zip_bytes(&[("inner.zip", &inner)])).unwrap();

        let chain = vec!["inner.zip".to_string(), "big.bin".to_string()];
        let size = open_member(&path, &chain, |r, size| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            assert_eq!(buf.len() as u64, size);
            Ok(size)
        })
        .unwrap();
        assert_eq!(size, big.len() as u64);
    }

    #[test]
    fn test_corrupt_nested_archive_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, zip_bytes(&[("broken.zip", b"not a zip")])).unwrap();

        let members = list_tree(&path, 2, &is_zip).unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].error.is_some());
    }
}
