//! Reference catalogs ("DAT" files): titles, their ROM entries and expected hashes.

pub mod clrmamepro;
pub mod hashes;
pub mod index;
pub mod logiqx;
pub mod parser;
pub mod store;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use hashes::{is_match, CanonicalHash, HashKind, RomHashes};
pub use index::CatalogIndex;
pub use parser::{CatalogFormat, CatalogParser};
pub use store::CatalogStore;

/// Dump status declared by the catalog for a single ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RomStatus {
    #[default]
    Good,
    BadDump,
    NoDump,
    Verified,
}

impl RomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RomStatus::Good => "good",
            RomStatus::BadDump => "baddump",
            RomStatus::NoDump => "nodump",
            RomStatus::Verified => "verified",
        }
    }
}

impl fmt::Display for RomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RomStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "good" => Ok(RomStatus::Good),
            "baddump" => Ok(RomStatus::BadDump),
            "nodump" => Ok(RomStatus::NoDump),
            "verified" => Ok(RomStatus::Verified),
            other => Err(Error::validation(format!("unknown rom status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogHeader {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub homepage: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
}

impl CatalogHeader {
    /// Best guess at who publishes this catalog.
    pub fn provider(&self) -> &'static str {
        let haystack = format!(
            "{} {} {} {}",
            self.name,
            self.homepage.as_deref().unwrap_or_default(),
            self.url.as_deref().unwrap_or_default(),
            self.author.as_deref().unwrap_or_default()
        )
        .to_ascii_lowercase();
        if haystack.contains("no-intro") {
            "No-Intro"
        } else if haystack.contains("redump") {
            "Redump"
        } else if haystack.contains("tosec") {
            "TOSEC"
        } else if haystack.contains("mame") {
            "MAME"
        } else {
            "Unknown"
        }
    }

    /// Header name with trailing parenthesised tags removed,
    /// e.g. `Nintendo - Game Boy (20240101-000000)` -> `Nintendo - Game Boy`.
    pub fn system(&self) -> String {
        let mut name = self.name.trim();
        while name.ends_with(')') {
            match name.rfind(" (") {
                Some(pos) => name = name[..pos].trim_end(),
                None => break,
            }
        }
        name.to_string()
    }
}

/// One file belonging to a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomEntry {
    pub name: String,
    pub size: Option<u64>,
    pub hashes: RomHashes,
    pub status: RomStatus,
}

impl RomEntry {
    /// Validates and normalizes the hash strings. A malformed hash fails with
    /// `Error::Validation`.
    pub fn new(
        name: impl Into<String>,
        size: Option<u64>,
        crc32: Option<&str>,
        md5: Option<&str>,
        sha1: Option<&str>,
        status: RomStatus,
    ) -> Result<Self> {
        let name = name.into();
        let hashes = RomHashes::new(crc32, md5, sha1)
            .map_err(|e| Error::validation(format!("rom '{}': {}", name, e)))?;
        Ok(Self {
            name,
            size,
            hashes,
            status,
        })
    }
}

/// A title (game, machine, software) and its constituent files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub name: String,
    pub description: Option<String>,
    pub year: Option<String>,
    pub publisher: Option<String>,
    pub category: Option<String>,
    pub clone_of: Option<String>,
    pub rom_of: Option<String>,
    pub region: Option<String>,
    pub languages: Option<String>,
    pub roms: Vec<RomEntry>,
}

impl Game {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_clone(&self) -> bool {
        self.clone_of.as_deref().map_or(false, |p| !p.is_empty())
    }

    /// Name of the parent/clone family this title belongs to.
    pub fn family(&self) -> &str {
        match self.clone_of.as_deref() {
            Some(parent) if !parent.is_empty() => parent,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub format: CatalogFormat,
    pub header: CatalogHeader,
    pub games: Vec<Game>,
}

impl Catalog {
    pub fn rom_count(&self) -> usize {
        self.games.iter().map(|g| g.roms.len()).sum()
    }
}

/// What a parser does with a ROM entry that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidEntryPolicy {
    /// Drop the entry, note it in the report, keep parsing.
    #[default]
    Skip,
    /// Abort the whole import.
    Fail,
}

/// Counters and warnings collected while parsing one catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub games: usize,
    pub roms: usize,
    pub skipped_roms: usize,
    pub skipped_elements: usize,
    pub warnings: Vec<String>,
}

impl ParseReport {
    /// Apply `policy` to a failed entry.
    pub(crate) fn reject(&mut self, policy: InvalidEntryPolicy, err: Error) -> Result<()> {
        match policy {
            InvalidEntryPolicy::Fail => Err(err),
            InvalidEntryPolicy::Skip => {
                tracing::warn!("Skipping catalog entry: {}", err);
                self.skipped_roms += 1;
                self.warnings.push(err.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_entry_rejects_invalid_hash() {
        let err = RomEntry::new("a.nes", Some(1), Some("xyz"), None, None, RomStatus::Good)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_header_system_and_provider() {
        let header = CatalogHeader {
            name: "Nintendo - Nintendo Entertainment System (Headered) (20240101-000000)".into(),
            homepage: Some("No-Intro".into()),
            ..Default::default()
        };
        assert_eq!(header.system(), "Nintendo - Nintendo Entertainment System");
        assert_eq!(header.provider(), "No-Intro");
    }

    #[test]
    fn test_family_uses_parent() {
        let mut game = Game::new("Game (Europe)");
        assert_eq!(game.family(), "Game (Europe)");
        game.clone_of = Some("Game (USA)".into());
        assert_eq!(game.family(), "Game (USA)");
        assert!(game.is_clone());
    }
}
