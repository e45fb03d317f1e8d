use crate::archive;
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::platform::relative_slash_path;
use glob::Pattern;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Position of an item in the scan order: a path below the drive root, then
/// the archive member chain (empty for plain files).
///
/// Ordering compares path components, which is exactly the order a
/// depth-first walk with name-sorted siblings produces. Resuming relies on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub relative_path: String,
    pub entry: Vec<String>,
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.relative_path
            .split('/')
            .cmp(other.relative_path.split('/'))
            .then_with(|| self.entry.cmp(&other.entry))
    }
}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ItemKey {
    pub fn file(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            entry: Vec::new(),
        }
    }

    /// Path stored on the scanned file record: `archive.zip::inner::leaf` for members.
    pub fn record_path(&self) -> String {
        if self.entry.is_empty() {
            self.relative_path.clone()
        } else {
            format!("{}::{}", self.relative_path, self.entry.join("::"))
        }
    }

    pub fn entry_json(&self) -> Result<Option<String>> {
        if self.entry.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(&self.entry)?))
    }

    /// Rebuild the key a job checkpointed, if it has one.
    pub fn from_checkpoint(path: Option<&str>, entry: Option<&str>) -> Result<Option<Self>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let entry = match entry {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        Ok(Some(Self {
            relative_path: path.to_string(),
            entry,
        }))
    }
}

/// One unit of scan work: a plain file, or one member of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredItem {
    pub key: ItemKey,
    /// The file on disk: the item itself or its outermost archive.
    pub disk_path: PathBuf,
    pub size: u64,
    pub modified_at: i64,
    /// CRC32 from the archive directory, for members.
    pub stored_crc: Option<u32>,
    /// Set when the item is already known to be unreadable.
    pub error: Option<String>,
}

impl DiscoveredItem {
    pub fn extension(&self) -> Option<&str> {
        let name = match self.key.entry.last() {
            Some(leaf) => leaf.as_str(),
            None => self.disk_path.file_name().and_then(|n| n.to_str())?,
        };
        let name = name.rsplit('/').next().unwrap_or(name);
        name.rsplit_once('.').map(|(_, ext)| ext)
    }

    pub fn file_name(&self) -> String {
        match self.key.entry.last() {
            Some(leaf) => leaf.rsplit('/').next().unwrap_or(leaf).to_string(),
            None => self
                .disk_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn is_ignored(patterns: &[Pattern], root: &Path, path: &Path) -> bool {
    let relative = relative_slash_path(root, path);
    patterns.iter().any(|pattern| {
        pattern.matches_path(path)
            || relative.as_deref().map_or(false, |rel| pattern.matches(rel))
    })
}

/// Enumerate everything below `root/target` in deterministic order.
///
/// Directories are walked depth-first with siblings sorted by name. Symlinks,
/// empty files and ignored paths are skipped. Archives are listed, not
/// extracted. Fails when the target disappears during the walk.
pub fn discover(
    root: &Path,
    target: &str,
    config: &ScanConfig,
    should_stop: &dyn Fn() -> bool,
) -> Result<Vec<DiscoveredItem>> {
    let start_dir = if target.is_empty() {
        root.to_path_buf()
    } else {
        root.join(target)
    };
    if !start_dir.exists() {
        return Err(Error::not_found(format!(
            "scan target {} does not exist",
            start_dir.display()
        )));
    }

    let patterns = compile_patterns(&config.ignore_patterns);
    let walker = WalkDir::new(&start_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(&patterns, root, entry.path()));

    let mut items = Vec::new();
    for entry in walker {
        if should_stop() {
            return Err(Error::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if !start_dir.exists() {
                    return Err(Error::not_found(format!(
                        "scan target {} disappeared during discovery",
                        start_dir.display()
                    )));
                }
                error!("Error walking {}: {}", start_dir.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(relative) = relative_slash_path(root, path) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                items.push(DiscoveredItem {
                    key: ItemKey::file(relative),
                    disk_path: path.to_path_buf(),
                    size: 0,
                    modified_at: 0,
                    stored_crc: None,
                    error: Some(err.to_string()),
                });
                continue;
            }
        };
        if metadata.len() == 0 {
            continue;
        }
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        let is_archive = config.archive_depth > 0
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |ext| config.is_archive_extension(ext));
        if !is_archive {
            items.push(DiscoveredItem {
                key: ItemKey::file(relative),
                disk_path: path.to_path_buf(),
                size: metadata.len(),
                modified_at,
                stored_crc: None,
                error: None,
            });
            continue;
        }

        match archive::list_tree(path, config.archive_depth, &|ext: &str| config.is_archive_extension(ext)) {
            Ok(members) => {
                for member in members.into_iter().filter(|m| m.size > 0 || m.error.is_some()) {
                    items.push(DiscoveredItem {
                        key: ItemKey {
                            relative_path: relative.clone(),
                            entry: member.chain,
                        },
                        disk_path: path.to_path_buf(),
                        size: member.size,
                        modified_at,
                        stored_crc: member.crc32,
                        error: member.error,
                    });
                }
            }
            Err(err) => {
                warn!("Cannot read archive {}: {}", path.display(), err);
                items.push(DiscoveredItem {
                    key: ItemKey::file(relative),
                    disk_path: path.to_path_buf(),
                    size: metadata.len(),
                    modified_at,
                    stored_crc: None,
                    error: Some(format!("corrupt archive: {}", err)),
                });
            }
        }
    }

    debug!("Discovered {} items under {}", items.len(), start_dir.display());
    Ok(items)
}
