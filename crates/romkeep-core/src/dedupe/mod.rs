//! Duplicate detection over scanned files and 1G1R family resolution.

pub mod one_g1r;

use crate::catalog::CanonicalHash;
use crate::error::Result;
use crate::storage::models::ScannedFile;
use crate::storage::Database;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

pub use one_g1r::{resolve_families, select_one, FamilyResolution, Score, Selection};

/// Files sharing one canonical hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub hash: CanonicalHash,
    /// In id order.
    pub files: Vec<ScannedFile>,
    pub total_size: u64,
    /// `total_size` minus one kept copy.
    pub wasted_space: u64,
}

impl DuplicateGroup {
    fn new(hash: CanonicalHash, mut files: Vec<ScannedFile>) -> Self {
        files.sort_by_key(|f| f.id);
        let sizes = files.iter().map(|f| f.size.max(0) as u64);
        let total_size: u64 = sizes.clone().sum();
        let representative = sizes.max().unwrap_or(0);
        Self {
            hash,
            files,
            total_size,
            wasted_space: total_size - representative,
        }
    }

    pub fn count(&self) -> usize {
        self.files.len()
    }
}

/// Every hashed file under its canonical hash (SHA1, else MD5, else CRC32).
/// Files without any hash are left out.
pub fn group_by_hash(files: &[ScannedFile]) -> BTreeMap<CanonicalHash, Vec<ScannedFile>> {
    let groups: DashMap<CanonicalHash, Vec<ScannedFile>> = DashMap::new();
    files.par_iter().for_each(|file| {
        if let Some(hash) = file.hashes.canonical() {
            groups.entry(hash).or_default().push(file.clone());
        }
    });
    groups.into_iter().collect()
}

/// Groups with more than one file, most wasted space first.
pub fn find_duplicates(files: &[ScannedFile]) -> Vec<DuplicateGroup> {
    let start = Instant::now();
    let mut groups: Vec<DuplicateGroup> = group_by_hash(files)
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(hash, files)| DuplicateGroup::new(hash, files))
        .collect();
    groups.sort_by(|a, b| {
        b.wasted_space
            .cmp(&a.wasted_space)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    debug!(
        "Grouped {} files into {} duplicate groups in {:.2}s",
        files.len(),
        groups.len(),
        start.elapsed().as_secs_f64()
    );
    groups
}

/// The duplicate group for one hash, if more than one file carries it.
pub fn find_duplicates_of(hash: &CanonicalHash, files: &[ScannedFile]) -> Option<DuplicateGroup> {
    let matching: Vec<ScannedFile> = files
        .iter()
        .filter(|f| f.hashes.canonical().as_ref() == Some(hash))
        .cloned()
        .collect();
    (matching.len() > 1).then(|| DuplicateGroup::new(hash.clone(), matching))
}

/// Duplicate groups among the stored files of one drive, or of every drive.
pub fn duplicate_groups_for_drive(db: &Database, drive_id: Option<i64>) -> Result<Vec<DuplicateGroup>> {
    let files = db.list_scanned_files(drive_id)?;
    let groups = find_duplicates(&files);
    let wasted: u64 = groups.iter().map(|g| g.wasted_space).sum();
    info!(
        "{} duplicate groups, {} bytes reclaimable",
        groups.len(),
        wasted
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HashKind, RomHashes};
    use crate::storage::models::FileStatus;

    fn make_test_file(id: i64, size: i64, hashes: RomHashes) -> ScannedFile {
        ScannedFile {
            id,
            drive_id: Some(1),
            relative_path: format!("file{}.bin", id),
            file_name: format!("file{}.bin", id),
            archive_path: None,
            inner_path: None,
            size,
            modified_at: 0,
            hashes,
            header_size: None,
            headerless_hashes: None,
            is_online: true,
            status: FileStatus::Verified,
            error_message: None,
            scan_job_id: None,
            first_seen_at: String::new(),
            last_seen_at: String::new(),
            verified_at: None,
        }
    }

    fn crc(value: &str) -> RomHashes {
        RomHashes::new(Some(value), None, None).unwrap()
    }

    #[test]
    fn test_groups_sorted_by_wasted_space() {
        let files = vec![
            make_test_file(1, 10, crc("0000000a")),
            make_test_file(2, 10, crc("0000000a")),
            make_test_file(3, 100, crc("0000000b")),
            make_test_file(4, 100, crc("0000000b")),
            make_test_file(5, 100, crc("0000000b")),
            make_test_file(6, 7, crc("0000000c")),
        ];
        let groups = find_duplicates(&files);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].hash.value, "0000000b");
        assert_eq!(groups[0].total_size, 300);
        assert_eq!(groups[0].wasted_space, 200);
        assert_eq!(groups[1].wasted_space, 10);
        assert_eq!(groups[1].files.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_canonical_hash_prefers_sha1() {
        let sha = "a9993e364706816aba3e25717850c26c9cd0d89d";
        let a = RomHashes::new(Some("11111111"), None, Some(sha)).unwrap();
        let b = RomHashes::new(Some("22222222"), None, Some(sha)).unwrap();
        let files = vec![make_test_file(1, 3, a), make_test_file(2, 3, b)];
        let groups = find_duplicates(&files);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hash.kind, HashKind::Sha1);
    }

    #[test]
    fn test_unhashed_files_are_ignored() {
        let files = vec![
            make_test_file(1, 3, RomHashes::default()),
            make_test_file(2, 3, RomHashes::default()),
        ];
        assert!(group_by_hash(&files).is_empty());
        assert!(find_duplicates(&files).is_empty());
    }

    #[test]
    fn test_grouping_is_a_partition() {
        let crcs = ["0000000a", "0000000b", "0000000c", "0000000d"];
        let files: Vec<ScannedFile> = (0..40)
            .map(|i| make_test_file(i, (i * 7 % 13) as i64 + 1, crc(crcs[(i * i % 5) as usize % 4])))
            .collect();

        let all = group_by_hash(&files);
        let grouped: usize = all.values().map(Vec::len).sum();
        assert_eq!(grouped, files.len(), "every hashed file lands in one group");
        let mut ids: Vec<i64> = all.values().flatten().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), files.len(), "no file lands in two groups");

        let duplicates = find_duplicates(&files);
        let shared_size: u64 = all
            .values()
            .filter(|g| g.len() > 1)
            .flatten()
            .map(|f| f.size as u64)
            .sum();
        assert_eq!(duplicates.iter().map(|g| g.total_size).sum::<u64>(), shared_size);
        assert!(duplicates.iter().all(|g| g.count() > 1));
    }

    #[test]
    fn test_find_duplicates_of() {
        let files = vec![
            make_test_file(1, 4, crc("0000000a")),
            make_test_file(2, 4, crc("0000000a")),
            make_test_file(3, 4, crc("0000000b")),
        ];
        let hash = crc("0000000a").canonical().unwrap();
        let group = find_duplicates_of(&hash, &files).unwrap();
        assert_eq!(group.count(), 2);
        let single = crc("0000000b").canonical().unwrap();
        assert!(find_duplicates_of(&single, &files).is_none());
    }
}
