use super::index::CatalogIndex;
use super::{CatalogFormat, InvalidEntryPolicy};
use crate::error::{Error, Result};
use crate::storage::models::{CatalogGameRecord, CatalogRecord};
use crate::storage::Database;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub invalid_entries: InvalidEntryPolicy,
    /// Store under this name instead of the header's.
    pub name_override: Option<String>,
    /// Skip sniffing and parse as this format.
    pub format: Option<CatalogFormat>,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub catalog: CatalogRecord,
    pub format: CatalogFormat,
    pub games: usize,
    pub roms: usize,
    pub skipped_roms: usize,
    pub skipped_elements: usize,
    pub warnings: Vec<String>,
}

/// Persisted catalogs plus the `(size, hash)` index the verifier reads.
///
/// Every change to the catalog tables rebuilds the index before returning.
/// The write lock is held for the whole change, so verification never sees
/// a stale index after an import or removal has returned.
pub struct CatalogStore {
    db: Arc<Database>,
    index: RwLock<Arc<CatalogIndex>>,
}

impl CatalogStore {
    pub fn open(db: Arc<Database>) -> Result<Self> {
        let store = Self {
            db,
            index: RwLock::new(Arc::new(CatalogIndex::default())),
        };
        store.reload_index()?;
        Ok(store)
    }

    /// Snapshot of the current index. Cheap to clone and safe to hold across
    /// a whole verification batch.
    pub fn index(&self) -> Arc<CatalogIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reload_index(&self) -> Result<usize> {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        let count = self.rebuild_locked(&mut guard)?;
        Ok(count)
    }

    fn rebuild_locked(&self, slot: &mut Arc<CatalogIndex>) -> Result<usize> {
        let start = Instant::now();
        let roms = self.db.load_index_roms()?;
        let index = CatalogIndex::build(roms);
        let count = index.len();
        *slot = Arc::new(index);
        debug!(
            "Catalog index rebuilt: {} roms in {:.2}s",
            count,
            start.elapsed().as_secs_f64()
        );
        Ok(count)
    }

    /// Parse and persist one catalog. A catalog with the same name is replaced.
    pub fn import<R: Read + Seek>(&self, mut reader: R, options: &ImportOptions) -> Result<ImportReport> {
        let format = match options.format {
            Some(format) => format,
            None => CatalogFormat::detect(&mut reader)?,
        };

        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        let policy = options.invalid_entries;
        let (catalog, _header, report) = self.db.import_catalog_with(
            format,
            options.name_override.as_deref(),
            |sink| format.parse_streaming(reader, policy, sink),
        )?;
        self.rebuild_locked(&mut guard)?;
        drop(guard);

        for warning in report.warnings.iter().take(10) {
            warn!("{}: {}", catalog.name, warning);
        }
        info!(
            "Imported catalog '{}' ({}, {}): {} games, {} roms, {} skipped",
            catalog.name, catalog.provider, format, report.games, report.roms, report.skipped_roms
        );

        Ok(ImportReport {
            format,
            games: report.games,
            roms: report.roms,
            skipped_roms: report.skipped_roms,
            skipped_elements: report.skipped_elements,
            warnings: report.warnings,
            catalog,
        })
    }

    /// Import a catalog file. Zipped catalogs use their first `.dat`/`.xml` member.
    pub fn import_path(&self, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let is_zip = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            let file = File::open(path)?;
            return self.import(BufReader::new(file), options);
        }

        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        let member = archive
            .file_names()
            .find(|name| {
                let lower = name.to_ascii_lowercase();
                lower.ends_with(".dat") || lower.ends_with(".xml")
            })
            .map(str::to_string)
            .ok_or_else(|| {
                Error::parse(format!("{} contains no .dat or .xml catalog", path.display()))
            })?;
        let mut bytes = Vec::new();
        archive.by_name(&member)?.read_to_end(&mut bytes)?;
        self.import(Cursor::new(bytes), options)
    }

    pub fn remove(&self, catalog_id: i64) -> Result<CatalogRecord> {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        let record = self
            .db
            .get_catalog(catalog_id)?
            .ok_or_else(|| Error::not_found(format!("catalog {}", catalog_id)))?;
        self.db.delete_catalog(catalog_id)?;
        self.rebuild_locked(&mut guard)?;
        info!("Removed catalog '{}'", record.name);
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<CatalogRecord>> {
        Ok(self.db.list_catalogs()?)
    }

    pub fn get(&self, catalog_id: i64) -> Result<CatalogRecord> {
        self.db
            .get_catalog(catalog_id)?
            .ok_or_else(|| Error::not_found(format!("catalog {}", catalog_id)))
    }

    pub fn find_by_name(&self, name: &str) -> Result<CatalogRecord> {
        self.db
            .get_catalog_by_name(name)?
            .ok_or_else(|| Error::not_found(format!("catalog '{}'", name)))
    }

    pub fn games(&self, catalog_id: i64) -> Result<Vec<CatalogGameRecord>> {
        Ok(self.db.list_catalog_games(catalog_id)?)
    }
}
