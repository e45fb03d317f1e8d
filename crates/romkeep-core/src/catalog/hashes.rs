use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms in matching priority order (strongest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HashKind {
    Sha1,
    Md5,
    Crc32,
}

impl HashKind {
    pub const PRIORITY: [HashKind; 3] = [HashKind::Sha1, HashKind::Md5, HashKind::Crc32];

    pub fn hex_len(self) -> usize {
        match self {
            HashKind::Crc32 => 8,
            HashKind::Md5 => 32,
            HashKind::Sha1 => 40,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Md5 => "md5",
            HashKind::Crc32 => "crc32",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha1" => Ok(HashKind::Sha1),
            "md5" => Ok(HashKind::Md5),
            "crc32" => Ok(HashKind::Crc32),
            other => Err(Error::validation(format!("unknown hash kind '{}'", other))),
        }
    }
}

/// Normalize a hash string to lowercase hex and check its length.
pub fn normalize_hash(kind: HashKind, value: &str) -> Result<String> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if trimmed.len() != kind.hex_len() {
        return Err(Error::validation(format!(
            "{} must be {} hex characters, got '{}'",
            kind,
            kind.hex_len(),
            value
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation(format!(
            "{} contains non-hex characters: '{}'",
            kind, value
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

/// The zero-to-three hashes known for a ROM entry or a scanned file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RomHashes {
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

impl RomHashes {
    /// Build a validated hash set. Empty strings count as absent.
    pub fn new(crc32: Option<&str>, md5: Option<&str>, sha1: Option<&str>) -> Result<Self> {
        let norm = |kind: HashKind, v: Option<&str>| -> Result<Option<String>> {
            match v.map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => normalize_hash(kind, s).map(Some),
                None => Ok(None),
            }
        };
        Ok(Self {
            crc32: norm(HashKind::Crc32, crc32)?,
            md5: norm(HashKind::Md5, md5)?,
            sha1: norm(HashKind::Sha1, sha1)?,
        })
    }

    pub fn from_crc(crc: u32) -> Self {
        Self {
            crc32: Some(format!("{:08x}", crc)),
            md5: None,
            sha1: None,
        }
    }

    pub fn get(&self, kind: HashKind) -> Option<&str> {
        match kind {
            HashKind::Sha1 => self.sha1.as_deref(),
            HashKind::Md5 => self.md5.as_deref(),
            HashKind::Crc32 => self.crc32.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.crc32.is_none() && self.md5.is_none() && self.sha1.is_none()
    }

    /// Highest-priority hash present: SHA1, then MD5, then CRC32.
    pub fn canonical(&self) -> Option<CanonicalHash> {
        HashKind::PRIORITY.iter().find_map(|kind| {
            self.get(*kind).map(|value| CanonicalHash {
                kind: *kind,
                value: value.to_string(),
            })
        })
    }
}

/// The single hash chosen to represent a file for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalHash {
    pub kind: HashKind,
    pub value: String,
}

impl fmt::Display for CanonicalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Compare two hash sets using the strongest algorithm both sides carry.
///
/// Only that algorithm decides: a SHA1 mismatch is a mismatch even when the
/// CRC32 values agree. Returns the deciding algorithm on a match.
pub fn is_match(a: &RomHashes, b: &RomHashes) -> Option<HashKind> {
    for kind in HashKind::PRIORITY {
        if let (Some(x), Some(y)) = (a.get(kind), b.get(kind)) {
            return if x == y { Some(kind) } else { None };
        }
    }
    None
}
