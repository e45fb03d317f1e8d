use super::hashes::{is_match, HashKind, RomHashes};
use super::RomStatus;
use ahash::AHashMap;
use std::sync::Arc;

/// One catalog ROM as seen by the verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRom {
    pub catalog_id: i64,
    pub catalog_name: Arc<str>,
    pub game_id: i64,
    pub game_name: String,
    pub rom_id: i64,
    pub rom_name: String,
    pub size: Option<u64>,
    pub hashes: RomHashes,
    pub status: RomStatus,
}

/// A candidate accepted by the hash-priority rule.
#[derive(Debug, Clone, Copy)]
pub struct IndexHit<'a> {
    pub rom: &'a IndexedRom,
    pub kind: HashKind,
}

/// Lookup table over every imported ROM, keyed by `(size, hash)`.
///
/// ROMs without a declared size are kept in a second table keyed by hash only,
/// so a missing size never hides an entry.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    roms: Vec<IndexedRom>,
    sized: AHashMap<(u64, HashKind, String), Vec<usize>>,
    by_hash_only: AHashMap<(HashKind, String), Vec<usize>>,
}

impl CatalogIndex {
    pub fn build(roms: Vec<IndexedRom>) -> Self {
        let mut sized: AHashMap<(u64, HashKind, String), Vec<usize>> = AHashMap::new();
        let mut by_hash_only: AHashMap<(HashKind, String), Vec<usize>> = AHashMap::new();

        for (i, rom) in roms.iter().enumerate() {
            for kind in HashKind::PRIORITY {
                let Some(value) = rom.hashes.get(kind) else {
                    continue;
                };
                match rom.size {
                    Some(size) => sized
                        .entry((size, kind, value.to_string()))
                        .or_default()
                        .push(i),
                    None => by_hash_only.entry((kind, value.to_string())).or_default().push(i),
                }
            }
        }

        Self {
            roms,
            sized,
            by_hash_only,
        }
    }

    pub fn len(&self) -> usize {
        self.roms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    pub fn roms(&self) -> &[IndexedRom] {
        &self.roms
    }

    /// Every ROM matching a file of `size` bytes with `hashes`, in catalog order.
    pub fn lookup(&self, size: u64, hashes: &RomHashes) -> Vec<IndexHit<'_>> {
        let mut candidates: Vec<usize> = Vec::new();
        for kind in HashKind::PRIORITY {
            let Some(value) = hashes.get(kind) else {
                continue;
            };
            if let Some(ids) = self.sized.get(&(size, kind, value.to_string())) {
                candidates.extend_from_slice(ids);
            }
            if let Some(ids) = self.by_hash_only.get(&(kind, value.to_string())) {
                candidates.extend_from_slice(ids);
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        candidates
            .into_iter()
            .filter_map(|i| {
                let rom = &self.roms[i];
                is_match(hashes, &rom.hashes).map(|kind| IndexHit { rom, kind })
            })
            .collect()
    }

    /// Same result as [`CatalogIndex::lookup`] without the hash tables.
    pub fn lookup_linear(&self, size: u64, hashes: &RomHashes) -> Vec<IndexHit<'_>> {
        self.roms
            .iter()
            .filter(|rom| rom.size.map_or(true, |s| s == size))
            .filter_map(|rom| is_match(hashes, &rom.hashes).map(|kind| IndexHit { rom, kind }))
            .collect()
    }
}
