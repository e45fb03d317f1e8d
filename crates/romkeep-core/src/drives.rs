//! Registered storage roots and their health checks.

use crate::config::find_overlapping_root;
use crate::error::{Error, Result};
use crate::platform;
use crate::storage::models::{Drive, JobStatus};
use crate::storage::now_rfc3339;
use crate::storage::queries::DriveObservation;
use crate::storage::Database;
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A mounted volume as reported by the operating system.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    /// Fingerprint that survives remounting at another path.
    pub volume_id: String,
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub is_ssd: bool,
}

pub trait VolumeProbe: Send + Sync {
    fn mounted_volumes(&self) -> Vec<VolumeInfo>;

    /// The volume `path` lives on: the mounted volume with the longest
    /// mount point that prefixes it.
    fn volume_for(&self, path: &Path) -> Option<VolumeInfo> {
        self.mounted_volumes()
            .into_iter()
            .filter(|v| path.starts_with(&v.mount_point))
            .max_by_key(|v| v.mount_point.components().count())
    }
}

/// `sysinfo` backed probe.
pub struct SystemProbe;

pub fn volume_fingerprint(name: &str, file_system: &str, total_bytes: u64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(file_system.as_bytes());
    hasher.update(b"|");
    hasher.update(total_bytes.to_le_bytes());
    let digest = format!("{:040x}", hasher.finalize());
    digest[..16].to_string()
}

impl VolumeProbe for SystemProbe {
    fn mounted_volumes(&self) -> Vec<VolumeInfo> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .map(|disk| {
                let name = disk.name().to_string_lossy();
                let file_system = disk.file_system().to_string_lossy();
                VolumeInfo {
                    volume_id: volume_fingerprint(&name, &file_system, disk.total_space()),
                    mount_point: disk.mount_point().to_path_buf(),
                    total_bytes: disk.total_space(),
                    free_bytes: disk.available_space(),
                    is_ssd: matches!(disk.kind(), sysinfo::DiskKind::SSD),
                }
            })
            .collect()
    }
}

/// Registration, health checks and removal of drives.
///
/// Online/offline updates for one drive are serialized by a per-drive lock;
/// the scan workers and the health monitor both go through it.
pub struct DriveRegistry {
    db: Arc<Database>,
    probe: Arc<dyn VolumeProbe>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl DriveRegistry {
    pub fn new(db: Arc<Database>, probe: Arc<dyn VolumeProbe>) -> Self {
        Self {
            db,
            probe,
            locks: DashMap::new(),
        }
    }

    pub fn with_system_probe(db: Arc<Database>) -> Self {
        Self::new(db, Arc::new(SystemProbe))
    }

    fn lock_for(&self, drive_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(drive_id).or_default().clone()
    }

    pub fn register(&self, root: &Path, label: Option<&str>) -> Result<Drive> {
        if !root.is_dir() {
            return Err(Error::not_found(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = platform::normalize_root(root)?;
        let root_str = root.display().to_string();

        if self.db.get_drive_by_root(&root_str)?.is_some() {
            return Err(Error::conflict(format!("{} is already registered", root_str)));
        }
        let existing: Vec<String> = self
            .db
            .list_drives()?
            .into_iter()
            .map(|d| d.root_path)
            .collect();
        if let Some(other) = find_overlapping_root(&existing, &root_str) {
            return Err(Error::conflict(format!(
                "{} overlaps registered drive {}",
                root_str, other
            )));
        }

        let volume = self.probe.volume_for(&root);
        let now = now_rfc3339();
        let mut drive = Drive {
            id: 0,
            label: label
                .map(str::to_string)
                .unwrap_or_else(|| platform::default_label(&root)),
            root_path: root_str,
            volume_id: volume.as_ref().map(|v| v.volume_id.clone()),
            is_online: true,
            is_enabled: true,
            is_ssd: volume.as_ref().map_or(false, |v| v.is_ssd),
            total_bytes: volume.as_ref().map(|v| v.total_bytes as i64),
            free_bytes: volume.as_ref().map(|v| v.free_bytes as i64),
            last_seen_at: Some(now.clone()),
            last_scanned_at: None,
            created_at: now,
        };
        drive.id = self.db.insert_drive(&drive)?;
        info!(
            "Registered drive {} '{}' at {} (volume {:?})",
            drive.id, drive.label, drive.root_path, drive.volume_id
        );
        Ok(drive)
    }

    pub fn get(&self, drive_id: i64) -> Result<Drive> {
        self.db
            .get_drive(drive_id)?
            .ok_or_else(|| Error::not_found(format!("drive {}", drive_id)))
    }

    pub fn list(&self) -> Result<Vec<Drive>> {
        Ok(self.db.list_drives()?)
    }

    /// Look at the drive again and store what was seen.
    ///
    /// A drive whose root is gone but whose volume is mounted somewhere else
    /// is moved to the new location.
    pub fn refresh(&self, drive_id: i64) -> Result<Drive> {
        let lock = self.lock_for(drive_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let drive = self.get(drive_id)?;
        let observation = self.observe(&drive);
        if observation.is_online != drive.is_online {
            info!(
                "Drive {} '{}' is now {}",
                drive.id,
                drive.label,
                if observation.is_online { "online" } else { "offline" }
            );
        }
        if let Some(new_root) = &observation.root_path {
            info!("Drive {} reconnected at {}", drive.id, new_root);
        }
        self.db.record_drive_observation(drive_id, &observation)?;
        self.get(drive_id)
    }

    pub fn refresh_all(&self) -> Result<Vec<Drive>> {
        let drives = self.db.list_drives()?;
        let mut refreshed = Vec::with_capacity(drives.len());
        for drive in drives {
            refreshed.push(self.refresh(drive.id)?);
        }
        Ok(refreshed)
    }

    fn observe(&self, drive: &Drive) -> DriveObservation {
        let root = PathBuf::from(&drive.root_path);
        let offline = DriveObservation {
            is_online: false,
            root_path: None,
            total_bytes: None,
            free_bytes: None,
        };

        if root.is_dir() {
            let volume = self.probe.volume_for(&root);
            let same_volume = match (&drive.volume_id, &volume) {
                (Some(expected), Some(found)) => *expected == found.volume_id,
                _ => true,
            };
            if same_volume {
                return DriveObservation {
                    is_online: true,
                    root_path: None,
                    total_bytes: volume.as_ref().map(|v| v.total_bytes as i64),
                    free_bytes: volume.as_ref().map(|v| v.free_bytes as i64),
                };
            }
            debug!(
                "Drive {} root exists but belongs to another volume",
                drive.id
            );
        }

        let Some(volume_id) = drive.volume_id.as_deref() else {
            return offline;
        };
        let Some(volume) = self
            .probe
            .mounted_volumes()
            .into_iter()
            .find(|v| v.volume_id == volume_id)
        else {
            return offline;
        };

        match relocated_root(&root, &volume.mount_point) {
            Some(new_root) => DriveObservation {
                is_online: true,
                root_path: Some(new_root.display().to_string()),
                total_bytes: Some(volume.total_bytes as i64),
                free_bytes: Some(volume.free_bytes as i64),
            },
            None => offline,
        }
    }

    pub fn mark_offline(&self, drive_id: i64) -> Result<()> {
        let lock = self.lock_for(drive_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        warn!("Marking drive {} offline", drive_id);
        self.db.record_drive_observation(
            drive_id,
            &DriveObservation {
                is_online: false,
                root_path: None,
                total_bytes: None,
                free_bytes: None,
            },
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, drive_id: i64, enabled: bool) -> Result<Drive> {
        if !self.db.set_drive_enabled(drive_id, enabled)? {
            return Err(Error::not_found(format!("drive {}", drive_id)));
        }
        self.get(drive_id)
    }

    pub fn set_label(&self, drive_id: i64, label: &str) -> Result<Drive> {
        if !self.db.set_drive_label(drive_id, label)? {
            return Err(Error::not_found(format!("drive {}", drive_id)));
        }
        self.get(drive_id)
    }

    /// Forget a drive. Its files stay in the database, detached and offline.
    pub fn remove(&self, drive_id: i64) -> Result<Drive> {
        let drive = self.get(drive_id)?;
        let busy = [JobStatus::Pending, JobStatus::Running]
            .into_iter()
            .map(|status| self.db.jobs_with_status(status))
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .any(|job| job.drive_id == drive_id);
        if busy {
            return Err(Error::conflict(format!(
                "drive {} has a queued or running scan",
                drive_id
            )));
        }
        self.db.delete_drive(drive_id)?;
        self.locks.remove(&drive_id);
        info!("Removed drive {} '{}'", drive.id, drive.label);
        Ok(drive)
    }

    /// The registered drive with the deepest root containing `path`, plus the
    /// path below it. Disabled drives are included.
    pub fn drive_for_path(&self, path: &Path) -> Result<Option<(Drive, String)>> {
        let best = self
            .db
            .list_drives()?
            .into_iter()
            .filter_map(|drive| {
                let root = PathBuf::from(&drive.root_path);
                platform::relative_slash_path(&root, path).map(|rel| (drive, rel))
            })
            .max_by_key(|(drive, _)| drive.root_path.len());
        Ok(best)
    }
}

/// Where `old_root` would be if its volume is now mounted at `mount_point`:
/// the longest tail of `old_root` that exists below the new mount.
fn relocated_root(old_root: &Path, mount_point: &Path) -> Option<PathBuf> {
    let parts: Vec<_> = old_root
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect();
    (0..=parts.len())
        .map(|skip| {
            let mut candidate = mount_point.to_path_buf();
            for part in &parts[skip..] {
                candidate.push(part.as_os_str());
            }
            candidate
        })
        .find(|candidate| candidate.is_dir())
}

/// Polls every drive at a fixed interval until stopped or dropped.
pub struct HealthMonitor {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn start(registry: Arc<DriveRegistry>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("drive-health".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = registry.refresh_all() {
                            warn!("Drive health check failed: {}", e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start drive health monitor: {}", e);
                None
            }
        };
        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::models::{JobPriority, ScanJob, ScanPhase};
    use std::fs;

    /// Probe with a configurable list of volumes.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub volumes: Mutex<Vec<VolumeInfo>>,
    }

    impl FakeProbe {
        pub(crate) fn mount(&self, volume_id: &str, mount_point: &Path) {
            self.volumes.lock().unwrap().push(VolumeInfo {
                volume_id: volume_id.to_string(),
                mount_point: mount_point.to_path_buf(),
                total_bytes: 1000,
                free_bytes: 500,
                is_ssd: false,
            });
        }

        pub(crate) fn unmount_all(&self) {
            self.volumes.lock().unwrap().clear();
        }
    }

    impl VolumeProbe for FakeProbe {
        fn mounted_volumes(&self) -> Vec<VolumeInfo> {
            self.volumes.lock().unwrap().clone()
        }
    }

    fn make_test_registry() -> (DriveRegistry, Arc<FakeProbe>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let probe = Arc::new(FakeProbe::default());
        (DriveRegistry::new(db.clone(), probe.clone()), probe, db)
    }

    #[test]
    fn test_register_rejects_duplicates_and_overlaps() {
        let (registry, _, _) = make_test_registry();
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nes");
        fs::create_dir(&nested).unwrap();

        let drive = registry.register(dir.path(), Some("Roms")).unwrap();
        assert_eq!(drive.label, "Roms");
        assert!(drive.is_online);

        assert!(matches!(registry.register(dir.path(), None), Err(Error::Conflict(_))));
        assert!(matches!(registry.register(&nested, None), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_register_missing_root_is_not_found() {
        let (registry, _, _) = make_test_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = registry.register(&dir.path().join("missing"), None);
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_refresh_marks_offline_and_back() {
        let (registry, _, _) = make_test_registry();
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("usb");
        fs::create_dir(&root).unwrap();
        let drive = registry.register(&root, None).unwrap();

        fs::rename(&root, parent.path().join("elsewhere")).unwrap();
        let offline = registry.refresh(drive.id).unwrap();
        assert!(!offline.is_online, "drive must go offline, not disappear");

        fs::rename(parent.path().join("elsewhere"), &root).unwrap();
        assert!(registry.refresh(drive.id).unwrap().is_online);
    }

    #[test]
    fn test_refresh_follows_volume_to_new_mount_point() {
        let (registry, probe, _) = make_test_registry();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let old_root = first.path().join("roms");
        fs::create_dir(&old_root).unwrap();
        let first_mount = platform::normalize_root(first.path()).unwrap();
        probe.mount("vol-1", &first_mount);

        let drive = registry.register(&old_root, None).unwrap();
        assert_eq!(drive.volume_id.as_deref(), Some("vol-1"));

        fs::remove_dir(&old_root).unwrap();
        fs::create_dir(second.path().join("roms")).unwrap();
        probe.unmount_all();
        probe.mount("vol-1", second.path());

        let moved = registry.refresh(drive.id).unwrap();
        assert!(moved.is_online);
        assert_eq!(moved.root_path, second.path().join("roms").display().to_string());
    }

    #[test]
    fn test_remove_refuses_while_scan_queued() {
        let (registry, _, db) = make_test_registry();
        let dir = tempfile::tempdir().unwrap();
        let drive = registry.register(dir.path(), None).unwrap();
        db.insert_scan_job(&ScanJob {
            id: 0,
            drive_id: drive.id,
            target_path: String::new(),
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            phase: ScanPhase::Queued,
            rehash: false,
            total_files: 0,
            processed_files: 0,
            verified_files: 0,
            unknown_files: 0,
            error_files: 0,
            total_bytes: 0,
            processed_bytes: 0,
            last_processed_path: None,
            last_processed_entry: None,
            resume_count: 0,
            error_message: None,
            created_at: String::new(),
            started_at: None,
            completed_at: None,
            updated_at: String::new(),
        })
        .unwrap();

        assert!(matches!(registry.remove(drive.id), Err(Error::Conflict(_))));
    }
}
