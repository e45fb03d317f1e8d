pub mod archive;
pub mod catalog;
pub mod config;
pub mod dedupe;
pub mod drives;
pub mod error;
pub mod hasher;
pub mod naming;
pub mod organize;
pub mod platform;
pub mod progress;
pub mod scanner;
pub mod storage;
pub mod verify;

pub use catalog::CatalogStore;
pub use config::AppConfig;
pub use drives::DriveRegistry;
pub use error::{Error, Result};
pub use organize::{OrganizeEngine, OrganizeRequest, TemplateStore};
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::{ScanOrchestrator, ScanRequest};
pub use storage::Database;
pub use verify::Verifier;
