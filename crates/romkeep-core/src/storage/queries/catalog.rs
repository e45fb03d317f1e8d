use crate::catalog::index::IndexedRom;
use crate::catalog::{CatalogFormat, CatalogHeader, Game, ParseReport, RomEntry, RomHashes};
use crate::storage::models::{CatalogGameRecord, CatalogRecord};
use crate::storage::now_rfc3339;
use crate::storage::sqlite::Database;
use ahash::AHashMap;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::sync::Arc;
use tracing::{debug, info};

const CATALOG_COLUMNS: &str = "id, name, format, description, version, date, author, homepage, \
     url, category, provider, system, game_count, rom_count, imported_at";

const GAME_COLUMNS: &str = "id, catalog_id, ordinal, name, description, year, publisher, \
     category, clone_of, rom_of, region, languages";

fn catalog_from_row(row: &Row) -> Result<CatalogRecord> {
    Ok(CatalogRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        format: row.get(2)?,
        description: row.get(3)?,
        version: row.get(4)?,
        date: row.get(5)?,
        author: row.get(6)?,
        homepage: row.get(7)?,
        url: row.get(8)?,
        category: row.get(9)?,
        provider: row.get(10)?,
        system: row.get(11)?,
        game_count: row.get(12)?,
        rom_count: row.get(13)?,
        imported_at: row.get(14)?,
    })
}

fn game_from_row(row: &Row) -> Result<CatalogGameRecord> {
    Ok(CatalogGameRecord {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        ordinal: row.get(2)?,
        game: Game {
            name: row.get(3)?,
            description: row.get(4)?,
            year: row.get(5)?,
            publisher: row.get(6)?,
            category: row.get(7)?,
            clone_of: row.get(8)?,
            rom_of: row.get(9)?,
            region: row.get(10)?,
            languages: row.get(11)?,
            roms: Vec::new(),
        },
    })
}

/// Columns: name, size, crc32, md5, sha1, status. Values were validated on import.
fn rom_from_row(row: &Row, offset: usize) -> Result<RomEntry> {
    let size: Option<i64> = row.get(offset + 1)?;
    Ok(RomEntry {
        name: row.get(offset)?,
        size: size.map(|s| s as u64),
        hashes: RomHashes {
            crc32: row.get(offset + 2)?,
            md5: row.get(offset + 3)?,
            sha1: row.get(offset + 4)?,
        },
        status: row.get(offset + 5)?,
    })
}

fn attach_roms(conn: &Connection, games: &mut [CatalogGameRecord]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, size, crc32, md5, sha1, status FROM catalog_rom WHERE game_id = ?1 ORDER BY id",
    )?;
    for record in games.iter_mut() {
        record.game.roms = stmt
            .query_map(params![record.id], |row| rom_from_row(row, 0))?
            .collect::<Result<Vec<_>>>()?;
    }
    Ok(())
}

impl Database {
    // ── Catalogs ─────────────────────────────────────────────────

    /// Stream a catalog into the database inside one transaction.
    ///
    /// `parse` receives a sink for each parsed title. When it returns, any
    /// existing catalog with the same name is replaced wholesale; if it fails,
    /// nothing is written.
    pub fn import_catalog_with<F>(
        &self,
        format: CatalogFormat,
        name_override: Option<&str>,
        parse: F,
    ) -> crate::Result<(CatalogRecord, CatalogHeader, ParseReport)>
    where
        F: FnOnce(&mut dyn FnMut(Game) -> crate::Result<()>) -> crate::Result<(CatalogHeader, ParseReport)>,
    {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let now = now_rfc3339();

        tx.execute(
            "INSERT INTO catalog (name, format, provider, system, imported_at) \
             VALUES (?1, ?2, 'Unknown', '', ?3)",
            params![format!("~importing {}", now), format.as_str(), now],
        )?;
        let catalog_id = tx.last_insert_rowid();

        let mut game_count: i64 = 0;
        let mut rom_count: i64 = 0;
        let (header, report) = {
            let mut game_stmt = tx.prepare_cached(
                "INSERT INTO catalog_game (catalog_id, ordinal, name, description, year, \
                 publisher, category, clone_of, rom_of, region, languages) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            let mut rom_stmt = tx.prepare_cached(
                "INSERT INTO catalog_rom (game_id, catalog_id, name, size, crc32, md5, sha1, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            let mut sink = |game: Game| -> crate::Result<()> {
                game_stmt.execute(params![
                    catalog_id,
                    game_count,
                    game.name,
                    game.description,
                    game.year,
                    game.publisher,
                    game.category,
                    game.clone_of,
                    game.rom_of,
                    game.region,
                    game.languages,
                ])?;
                let game_id = tx.last_insert_rowid();
                for rom in &game.roms {
                    rom_stmt.execute(params![
                        game_id,
                        catalog_id,
                        rom.name,
                        rom.size.map(|s| s as i64),
                        rom.hashes.crc32,
                        rom.hashes.md5,
                        rom.hashes.sha1,
                        rom.status,
                    ])?;
                    rom_count += 1;
                }
                game_count += 1;
                Ok(())
            };
            parse(&mut sink)?
        };

        let name = name_override
            .map(str::to_string)
            .unwrap_or_else(|| header.name.clone());
        let replaced = tx.execute(
            "DELETE FROM catalog WHERE name = ?1 AND id != ?2",
            params![name, catalog_id],
        )?;
        tx.execute(
            "UPDATE catalog SET name = ?1, description = ?2, version = ?3, date = ?4, \
             author = ?5, homepage = ?6, url = ?7, category = ?8, provider = ?9, system = ?10, \
             game_count = ?11, rom_count = ?12 WHERE id = ?13",
            params![
                name,
                header.description,
                header.version,
                header.date,
                header.author,
                header.homepage,
                header.url,
                header.category,
                header.provider(),
                header.system(),
                game_count,
                rom_count,
                catalog_id,
            ],
        )?;
        let record = tx.query_row(
            &format!("SELECT {} FROM catalog WHERE id = ?1", CATALOG_COLUMNS),
            params![catalog_id],
            catalog_from_row,
        )?;
        tx.commit()?;

        if replaced > 0 {
            info!("Replaced previous import of catalog '{}'", name);
        }
        debug!(
            "Stored catalog {} '{}': {} games, {} roms",
            catalog_id, name, game_count, rom_count
        );
        Ok((record, header, report))
    }

    pub fn get_catalog(&self, catalog_id: i64) -> Result<Option<CatalogRecord>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM catalog WHERE id = ?1", CATALOG_COLUMNS),
                params![catalog_id],
                catalog_from_row,
            )
            .optional()
    }

    pub fn get_catalog_by_name(&self, name: &str) -> Result<Option<CatalogRecord>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM catalog WHERE name = ?1", CATALOG_COLUMNS),
                params![name],
                catalog_from_row,
            )
            .optional()
    }

    pub fn list_catalogs(&self) -> Result<Vec<CatalogRecord>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM catalog ORDER BY name", CATALOG_COLUMNS))?;
        let catalogs = stmt.query_map([], catalog_from_row)?.collect::<Result<Vec<_>>>()?;
        Ok(catalogs)
    }

    /// Delete a catalog with its games, ROMs and every match against them.
    pub fn delete_catalog(&self, catalog_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM catalog WHERE id = ?1", params![catalog_id])?;
        Ok(deleted > 0)
    }

    /// All titles of a catalog in document order, with their ROMs.
    pub fn list_catalog_games(&self, catalog_id: i64) -> Result<Vec<CatalogGameRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM catalog_game WHERE catalog_id = ?1 ORDER BY ordinal",
            GAME_COLUMNS
        ))?;
        let mut games = stmt
            .query_map(params![catalog_id], game_from_row)?
            .collect::<Result<Vec<_>>>()?;

        let mut rom_stmt = conn.prepare(
            "SELECT game_id, name, size, crc32, md5, sha1, status FROM catalog_rom \
             WHERE catalog_id = ?1 ORDER BY id",
        )?;
        let mut roms_by_game: AHashMap<i64, Vec<RomEntry>> = AHashMap::new();
        let rows = rom_stmt.query_map(params![catalog_id], |row| {
            Ok((row.get::<_, i64>(0)?, rom_from_row(row, 1)?))
        })?;
        for row in rows {
            let (game_id, rom) = row?;
            roms_by_game.entry(game_id).or_default().push(rom);
        }
        for record in games.iter_mut() {
            record.game.roms = roms_by_game.remove(&record.id).unwrap_or_default();
        }
        Ok(games)
    }

    pub fn get_catalog_game(&self, game_id: i64) -> Result<Option<CatalogGameRecord>> {
        let conn = self.connection();
        let game = conn
            .query_row(
                &format!("SELECT {} FROM catalog_game WHERE id = ?1", GAME_COLUMNS),
                params![game_id],
                game_from_row,
            )
            .optional()?;
        match game {
            Some(game) => {
                let mut games = [game];
                attach_roms(&conn, &mut games)?;
                let [game] = games;
                Ok(Some(game))
            }
            None => Ok(None),
        }
    }

    /// Every ROM of every catalog, ready for the verification index.
    pub fn load_index_roms(&self) -> Result<Vec<IndexedRom>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT r.catalog_id, c.name, r.game_id, g.name, r.id, \
                    r.name, r.size, r.crc32, r.md5, r.sha1, r.status \
             FROM catalog_rom r \
             JOIN catalog_game g ON g.id = r.game_id \
             JOIN catalog c ON c.id = r.catalog_id \
             ORDER BY r.catalog_id, g.ordinal, r.id",
        )?;

        let mut names: AHashMap<i64, Arc<str>> = AHashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                rom_from_row(row, 5)?,
            ))
        })?;

        let mut roms = Vec::new();
        for row in rows {
            let (catalog_id, catalog_name, game_id, game_name, rom_id, rom) = row?;
            let catalog_name = names
                .entry(catalog_id)
                .or_insert_with(|| Arc::from(catalog_name.as_str()))
                .clone();
            roms.push(IndexedRom {
                catalog_id,
                catalog_name,
                game_id,
                game_name,
                rom_id,
                rom_name: rom.name,
                size: rom.size,
                hashes: rom.hashes,
                status: rom.status,
            });
        }
        Ok(roms)
    }
}
