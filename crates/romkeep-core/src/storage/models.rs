use crate::catalog::{Game, HashKind, RomHashes, RomStatus};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a unit-variant enum persisted as a lowercase text column.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        pub enum $name { $($variant),+ }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self { $($name::$variant => $text),+ }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        sql_text_enum!($name);
    };
}

sql_text_enum!(HashKind);
sql_text_enum!(RomStatus);

text_enum! {
    /// Verification state of a scanned file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum FileStatus {
        Pending => "pending",
        Verified => "verified",
        BadDump => "baddump",
        Unknown => "unknown",
        Error => "error",
    }
}

text_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum JobStatus {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Paused and failed jobs continue from their checkpoint.
    pub fn is_resumable(self) -> bool {
        matches!(self, JobStatus::Paused | JobStatus::Failed)
    }
}

text_enum! {
    /// Queue priority. Ordering follows urgency: `Low < Normal < High`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum JobPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

text_enum! {
    /// Human readable step a scan job is in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum ScanPhase {
        Queued => "queued",
        Discovering => "discovering",
        Hashing => "hashing",
        Verifying => "verifying",
        Persisting => "persisting",
        Finished => "finished",
    }
}

text_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum OperationKind {
        Move => "move",
        Copy => "copy",
        Skip => "skip",
    }
}

/// A registered storage root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drive {
    pub id: i64,
    pub label: String,
    pub root_path: String,
    /// Stable identifier of the physical volume, used to spot reconnection.
    pub volume_id: Option<String>,
    pub is_online: bool,
    pub is_enabled: bool,
    pub is_ssd: bool,
    pub total_bytes: Option<i64>,
    pub free_bytes: Option<i64>,
    pub last_seen_at: Option<String>,
    pub last_scanned_at: Option<String>,
    pub created_at: String,
}

/// An imported catalog, without its games.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    pub id: i64,
    pub name: String,
    pub format: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub homepage: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub provider: String,
    pub system: String,
    pub game_count: i64,
    pub rom_count: i64,
    pub imported_at: String,
}

/// A persisted title with its ROM entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogGameRecord {
    pub id: i64,
    pub catalog_id: i64,
    /// Position in the source document. 1G1R ties fall back to it.
    pub ordinal: i64,
    pub game: Game,
}

/// A file observed on a drive, or a member of an archive on a drive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannedFile {
    pub id: i64,
    pub drive_id: Option<i64>,
    /// Path below the drive root. Archive members use `archive::inner`.
    pub relative_path: String,
    pub file_name: String,
    pub archive_path: Option<String>,
    pub inner_path: Option<String>,
    pub size: i64,
    pub modified_at: i64,
    pub hashes: RomHashes,
    pub header_size: Option<i64>,
    pub headerless_hashes: Option<RomHashes>,
    pub is_online: bool,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub scan_job_id: Option<i64>,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub verified_at: Option<String>,
}

impl ScannedFile {
    pub fn is_archive_member(&self) -> bool {
        self.inner_path.is_some()
    }

    /// Path of the thing on disk: the file itself, or its outermost archive.
    pub fn disk_relative_path(&self) -> &str {
        self.archive_path.as_deref().unwrap_or(&self.relative_path)
    }
}

/// One catalog ROM a scanned file was matched to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMatch {
    pub id: i64,
    pub file_id: i64,
    pub catalog_id: i64,
    pub game_id: i64,
    pub rom_id: i64,
    pub match_type: HashKind,
    pub headerless: bool,
    pub rom_status: RomStatus,
    /// Filled in when read back; ignored on insert.
    pub catalog_name: String,
    pub game_name: String,
    pub rom_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJob {
    pub id: i64,
    pub drive_id: i64,
    pub target_path: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub phase: ScanPhase,
    pub rehash: bool,
    pub total_files: i64,
    pub processed_files: i64,
    pub verified_files: i64,
    pub unknown_files: i64,
    pub error_files: i64,
    pub total_bytes: i64,
    pub processed_bytes: i64,
    /// Relative path of the last fully processed item.
    pub last_processed_path: Option<String>,
    /// Archive entry chain of that item, JSON encoded, when it was an archive member.
    pub last_processed_entry: Option<String>,
    pub resume_count: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

/// Counters and resume point written together with each persisted batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanCheckpoint {
    pub last_processed_path: Option<String>,
    pub last_processed_entry: Option<String>,
    pub processed_files: i64,
    pub verified_files: i64,
    pub unknown_files: i64,
    pub error_files: i64,
    pub processed_bytes: i64,
}

impl ScanCheckpoint {
    pub fn of(job: &ScanJob) -> Self {
        Self {
            last_processed_path: job.last_processed_path.clone(),
            last_processed_entry: job.last_processed_entry.clone(),
            processed_files: job.processed_files,
            verified_files: job.verified_files,
            unknown_files: job.unknown_files,
            error_files: job.error_files,
            processed_bytes: job.processed_bytes,
        }
    }
}

/// Folder and file patterns plus 1G1R preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationTemplate {
    pub id: i64,
    pub name: String,
    pub folder_pattern: String,
    pub file_pattern: String,
    pub use_1g1r: bool,
    pub region_priority: Vec<String>,
    pub language_priority: Vec<String>,
    pub exclude_categories: Vec<String>,
    #[serde(default)]
    pub is_builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationLog {
    pub id: i64,
    pub source_root: String,
    pub destination_root: String,
    pub template_name: String,
    pub is_move: bool,
    pub total_files: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
    pub total_bytes: i64,
    pub success: bool,
    pub message: Option<String>,
    pub rollback_data: Option<String>,
    pub is_rolled_back: bool,
    pub rolled_back_at: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationEntry {
    pub id: i64,
    pub log_id: i64,
    pub ordinal: i64,
    pub operation: OperationKind,
    pub source_path: String,
    pub destination_path: String,
    pub size: i64,
    pub hash: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub file_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!("BadDump".parse::<FileStatus>().unwrap(), FileStatus::BadDump);
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
        assert!("sideways".parse::<JobPriority>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_job_status_classes() {
        assert!(JobStatus::Failed.is_resumable());
        assert!(!JobStatus::Cancelled.is_resumable());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }
}
