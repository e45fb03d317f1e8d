use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

/// Archives nested deeper than this are recorded as opaque files.
pub const MAX_ARCHIVE_DEPTH: usize = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub scan: ScanConfig,
    pub organize: OrganizeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "romkeep.db".to_string(),
            scan: ScanConfig::default(),
            organize: OrganizeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How many drives are scanned at the same time.
    pub max_concurrent_drives: usize,
    /// Hashing threads per drive worker.
    pub hash_workers: usize,
    /// Order ready drives by their SSD flag before FIFO within a priority level.
    pub prioritize_ssd: bool,
    pub archive_depth: usize,
    /// Files hashed per checkpoint.
    pub batch_size: usize,
    pub hash_chunk_size: usize,
    /// Trust the CRC32 stored in archives instead of extracting members.
    pub quick_archive_scan: bool,
    pub ignore_patterns: Vec<String>,
    pub archive_extensions: Vec<String>,
    pub health_check_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_drives: 2,
            hash_workers: num_cpus::get().max(1),
            prioritize_ssd: false,
            archive_depth: MAX_ARCHIVE_DEPTH,
            batch_size: 64,
            hash_chunk_size: 1024 * 1024,
            quick_archive_scan: false,
            ignore_patterns: Vec::new(),
            archive_extensions: vec!["zip".to_string()],
            health_check_interval_secs: 30,
        }
    }
}

impl ScanConfig {
    /// Clamp user supplied values into workable bounds.
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_drives = self.max_concurrent_drives.max(1);
        self.hash_workers = self.hash_workers.max(1);
        self.archive_depth = self.archive_depth.min(MAX_ARCHIVE_DEPTH);
        self.batch_size = self.batch_size.max(1);
        self.hash_chunk_size = self.hash_chunk_size.max(4096);
        self
    }

    pub fn is_archive_extension(&self, ext: &str) -> bool {
        self.archive_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganizeConfig {
    pub region_priority: Vec<String>,
    pub language_priority: Vec<String>,
    pub exclude_categories: Vec<String>,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            region_priority: ["USA", "World", "Europe", "Japan"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            language_priority: vec!["En".to_string()],
            exclude_categories: ["Beta", "Proto", "Demo", "Sample", "Pirate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Load `Config.toml` (optional) and `ROMKEEP_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("ROMKEEP").separator("__"))
        .build()?;
    let mut config = builder.try_deserialize::<AppConfig>()?;
    config.scan = config.scan.normalized();
    Ok(config)
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
                break;
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}

/// Returns the existing root that `candidate` equals, contains, or is contained by.
pub fn find_overlapping_root<'a>(existing: &'a [String], candidate: &str) -> Option<&'a str> {
    let mut all = existing.to_vec();
    all.push(candidate.to_string());
    let kept = non_overlapping_directories(all);
    if kept.len() == existing.len() + 1 {
        return None;
    }
    let candidate_path = Path::new(candidate);
    existing
        .iter()
        .find(|root| {
            let root_path = Path::new(root.as_str());
            root_path.starts_with(candidate_path) || candidate_path.starts_with(root_path)
        })
        .map(|s| s.as_str())
}
