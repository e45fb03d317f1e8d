use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "romkeep")]
#[command(about = "Catalog, verify and organize ROM collections", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage registered drives
    #[command(subcommand)]
    Drive(DriveCommand),
    /// Import, list and remove DAT catalogs
    #[command(subcommand)]
    Catalog(CatalogCommand),
    /// Scan a drive and verify what it holds
    Scan(ScanArgs),
    /// List scan jobs
    Jobs,
    /// Pause, resume or cancel a scan job
    #[command(subcommand)]
    Job(JobCommand),
    /// Re-verify stored files against the current catalogs
    Verify,
    /// List scanned files, a page at a time
    Files(FilesArgs),
    /// Show one scanned file and its catalog matches
    File {
        id: i64,
    },
    /// Show files sharing the same content
    Duplicates {
        /// Only files on this drive
        #[arg(long)]
        drive: Option<i64>,
        /// Also write every duplicate file to a CSV file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
    /// Move or copy verified files into a templated layout
    Organize(OrganizeArgs),
    /// Undo an organize run
    Rollback {
        log_id: i64,
    },
    /// List organize runs
    Logs {
        /// Show the entries of one run
        #[arg(long)]
        id: Option<i64>,
    },
    /// Manage organization templates
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Subcommand)]
pub enum DriveCommand {
    /// Register a directory as a drive root
    Add {
        path: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
    /// List registered drives
    List,
    /// Re-probe one drive, or all of them
    Refresh {
        id: Option<i64>,
    },
    /// Allow scans on a drive again
    Enable {
        id: i64,
    },
    /// Stop scheduling scans on a drive
    Disable {
        id: i64,
    },
    /// Rename a drive
    Label {
        id: i64,
        label: String,
    },
    /// Forget a drive and everything scanned on it
    Remove {
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    /// Import a Logiqx XML or ClrMamePro DAT file
    Import {
        path: PathBuf,
        /// Store under this name instead of the header's
        #[arg(long)]
        name: Option<String>,
        /// Fail on the first invalid ROM entry instead of skipping it
        #[arg(long)]
        strict: bool,
        /// logiqx or clrmamepro; detected from the content when omitted
        #[arg(long)]
        format: Option<String>,
    },
    /// List imported catalogs
    List,
    /// Remove a catalog and its games
    Remove {
        id: i64,
    },
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Drive id
    pub drive: i64,
    /// Directory below the drive root
    #[arg(long)]
    pub path: Option<String>,
    /// low, normal or high
    #[arg(long, default_value = "normal")]
    pub priority: String,
    /// Hash every file again
    #[arg(long)]
    pub rehash: bool,
}

#[derive(Debug, Args)]
pub struct FilesArgs {
    #[arg(long)]
    pub drive: Option<i64>,
    /// pending, verified, unknown, baddump or error
    #[arg(long)]
    pub status: Option<String>,
    /// Files carrying this hash, as kind:value (e.g. crc32:d445f698)
    #[arg(long)]
    pub hash: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
    /// Cursor printed at the end of the previous page
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Mark a queued or interrupted job as paused
    Pause { id: i64 },
    /// Continue a paused or failed job from its checkpoint
    Resume { id: i64 },
    /// Cancel a job that has not finished
    Cancel { id: i64 },
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    #[arg(long)]
    pub source: PathBuf,
    #[arg(long)]
    pub dest: PathBuf,
    #[arg(long, default_value = "Default")]
    pub template: String,
    /// Copy instead of move. Copies cannot be rolled back.
    #[arg(long)]
    pub copy: bool,
    /// Only print the plan
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// List built-in and user templates
    List,
    /// Add a user template
    Add {
        name: String,
        #[arg(long)]
        folder: String,
        #[arg(long)]
        file: String,
        /// Keep one preferred title per game family
        #[arg(long)]
        one_g1r: bool,
        /// Comma separated, most preferred first
        #[arg(long, value_delimiter = ',')]
        regions: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        languages: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },
    /// Remove a user template
    Remove { name: String },
    /// Check a pattern for unknown placeholders and unbalanced braces
    Validate { pattern: String },
}
