use ahash::AHashSet;
use serde::Serialize;
use std::path::PathBuf;

/// One file (or archive) and where it should go.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanItem {
    /// Scanned file records stored at `source`: one for a plain file, every
    /// member for an archive.
    pub file_ids: Vec<i64>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub drive_id: Option<i64>,
    /// `source` below its drive root.
    pub relative_path: String,
    pub size: u64,
    pub hash: Option<String>,
    pub game_id: Option<i64>,
    pub game_name: Option<String>,
    /// Set when the item will not be touched.
    pub skip_reason: Option<String>,
}

impl PlanItem {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        if self.skip_reason.is_none() {
            self.skip_reason = Some(reason.into());
        }
    }
}

/// Everything an organize run would do, computed before touching disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizePlan {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub template_name: String,
    pub is_move: bool,
    pub items: Vec<PlanItem>,
}

impl OrganizePlan {
    pub fn planned_count(&self) -> usize {
        self.items.iter().filter(|i| !i.is_skipped()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_skipped()).count()
    }

    pub fn planned_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|i| !i.is_skipped())
            .map(|i| i.size)
            .sum()
    }
}

/// Skip items that would clash: already in place, two sources for one
/// destination, an existing destination, or a vanished source. Destinations
/// compare case-insensitively.
pub(crate) fn mark_conflicts(items: &mut [PlanItem]) {
    let mut claimed: AHashSet<String> = AHashSet::new();
    for item in items.iter_mut().filter(|i| !i.is_skipped()) {
        let key = item.destination.to_string_lossy().to_lowercase();
        if item.destination == item.source {
            item.skip("already in place");
        } else if claimed.contains(&key) {
            item.skip(format!(
                "another file is planned for {}",
                item.destination.display()
            ));
        } else if item.destination.exists() {
            item.skip(format!("{} already exists", item.destination.display()));
        } else if !item.source.is_file() {
            item.skip(format!("{} is missing", item.source.display()));
        }
        claimed.insert(key);
    }
}
