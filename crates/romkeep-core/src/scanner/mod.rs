//! Resumable scans of registered drives.

pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod walk;

pub use job::{JobControl, ScanRunner};
pub use orchestrator::{ScanOrchestrator, ScanRequest};
pub use queue::ScanQueue;
pub use walk::{discover, DiscoveredItem, ItemKey};
