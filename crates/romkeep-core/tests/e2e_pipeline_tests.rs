use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

use romkeep_core::catalog::store::ImportOptions;
use romkeep_core::config::ScanConfig;
use romkeep_core::dedupe::duplicate_groups_for_drive;
use romkeep_core::drives::{VolumeInfo, VolumeProbe};
use romkeep_core::hasher::hash_bytes;
use romkeep_core::progress::{ProgressEvent, ScanProgress};
use romkeep_core::scanner::{JobControl, ScanRunner};
use romkeep_core::storage::models::*;
use romkeep_core::{
    CatalogStore, Database, DriveRegistry, Error, OrganizeEngine, OrganizeRequest,
    ProgressReporter, ScanOrchestrator, ScanRequest, SilentReporter, TemplateStore,
};

const SYSTEM: &str = "Nintendo - Nintendo Entertainment System";

/// Reports no mounted volumes, so drives are judged by their root alone.
struct NoVolumes;

impl VolumeProbe for NoVolumes {
    fn mounted_volumes(&self) -> Vec<VolumeInfo> {
        Vec::new()
    }
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    drive: Drive,
    db: Arc<Database>,
    catalogs: Arc<CatalogStore>,
    drives: Arc<DriveRegistry>,
}

/// Deterministic content that never starts with a known header magic.
fn make_test_rom(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) | 0x01)
        .collect()
}

fn rom_xml(name: &str, clone_of: Option<&str>, rom_name: &str, data: &[u8]) -> String {
    let hashes = hash_bytes(data);
    let clone = clone_of
        .map(|parent| format!(" cloneof=\"{}\"", parent))
        .unwrap_or_default();
    format!(
        "\t<game name=\"{name}\"{clone}>\n\t\t<description>{name}</description>\n\t\t\
         <rom name=\"{rom}\" size=\"{size}\" crc=\"{crc}\" sha1=\"{sha1}\"/>\n\t</game>\n",
        name = name,
        clone = clone,
        rom = rom_name,
        size = data.len(),
        crc = hashes.crc32.unwrap(),
        sha1 = hashes.sha1.unwrap(),
    )
}

fn make_test_dat(games: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<datafile>\n\t<header>\n\t\t<name>{}</name>\n\t\t\
         <description>{}</description>\n\t\t<homepage>No-Intro</homepage>\n\t</header>\n{}</datafile>\n",
        SYSTEM,
        SYSTEM,
        games.concat()
    )
}

/// Layout:
///   root/
///     nes/
///       Game (USA).nes      (rom A, catalog parent)
///       Game (Europe).nes   (rom B, catalog clone)
///     dupes/
///       copy.nes            (rom A again)
///     misc/
///       unknown.bin         (not in the catalog)
fn create_test_tree(root: &Path) {
    fs::create_dir_all(root.join("nes")).unwrap();
    fs::create_dir_all(root.join("dupes")).unwrap();
    fs::create_dir_all(root.join("misc")).unwrap();
    fs::write(root.join("nes/Game (USA).nes"), make_test_rom(1, 4096)).unwrap();
    fs::write(root.join("nes/Game (Europe).nes"), make_test_rom(2, 4096)).unwrap();
    fs::write(root.join("dupes/copy.nes"), make_test_rom(1, 4096)).unwrap();
    fs::write(root.join("misc/unknown.bin"), make_test_rom(3, 1000)).unwrap();
}

fn setup() -> Fixture {
    let tmp = tempdir().unwrap();
    let drive_dir = tmp.path().join("drive");
    create_test_tree(&drive_dir);

    let db = Arc::new(Database::open_in_memory().unwrap());
    let catalogs = Arc::new(CatalogStore::open(db.clone()).unwrap());
    let dat = make_test_dat(&[
        rom_xml("Game (USA)", None, "Game (USA).nes", &make_test_rom(1, 4096)),
        rom_xml(
            "Game (Europe)",
            Some("Game (USA)"),
            "Game (Europe).nes",
            &make_test_rom(2, 4096),
        ),
    ]);
    catalogs
        .import(Cursor::new(dat.into_bytes()), &ImportOptions::default())
        .unwrap();

    let drives = Arc::new(DriveRegistry::new(db.clone(), Arc::new(NoVolumes)));
    let drive = drives.register(&drive_dir, Some("Test")).unwrap();
    Fixture {
        _tmp: tmp,
        root: PathBuf::from(&drive.root_path),
        drive,
        db,
        catalogs,
        drives,
    }
}

fn test_scan_config(batch_size: usize) -> ScanConfig {
    ScanConfig {
        hash_workers: 2,
        batch_size,
        ..ScanConfig::default()
    }
}

fn new_job(fixture: &Fixture) -> i64 {
    let job = ScanJob {
        id: 0,
        drive_id: fixture.drive.id,
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
    };
    fixture.db.insert_scan_job(&job).unwrap()
}

fn runner(fixture: &Fixture, batch_size: usize) -> ScanRunner {
    ScanRunner::new(
        fixture.db.clone(),
        fixture.catalogs.clone(),
        fixture.drives.clone(),
        test_scan_config(batch_size),
    )
}

fn scan_to_completion(fixture: &Fixture) -> ScanJob {
    let job_id = new_job(fixture);
    let status = runner(fixture, 64)
        .run(job_id, &JobControl::new(), &|_| {})
        .unwrap();
    assert_eq!(status, JobStatus::Completed);
    fixture.db.get_scan_job(job_id).unwrap().unwrap()
}

/// Comparable view of the stored files of a drive.
fn file_set(fixture: &Fixture) -> BTreeSet<(String, i64, Option<String>, String)> {
    fixture
        .db
        .list_scanned_files(Some(fixture.drive.id))
        .unwrap()
        .into_iter()
        .map(|f| (f.relative_path, f.size, f.hashes.sha1, f.status.to_string()))
        .collect()
}

fn template(fixture: &Fixture, name: &str) -> OrganizationTemplate {
    TemplateStore::new(fixture.db.clone()).get(name).unwrap()
}

#[test]
fn test_scan_verifies_and_finds_duplicates() {
    let fixture = setup();
    let job = scan_to_completion(&fixture);

    assert_eq!(job.total_files, 4);
    assert_eq!(job.processed_files, 4);
    assert_eq!(job.verified_files, 3, "both titles and the copy match the catalog");
    assert_eq!(job.unknown_files, 1);
    assert_eq!(job.error_files, 0);
    assert!(job.completed_at.is_some());

    let usa = fixture
        .db
        .get_scanned_file_by_path(fixture.drive.id, "nes/Game (USA).nes")
        .unwrap()
        .unwrap();
    assert_eq!(usa.status, FileStatus::Verified);
    let matches = fixture.db.matches_for_file(usa.id).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].game_name, "Game (USA)");

    let groups = duplicate_groups_for_drive(&fixture.db, Some(fixture.drive.id)).unwrap();
    assert_eq!(groups.len(), 1, "only rom A exists twice");
    let paths: Vec<&str> = groups[0].files.iter().map(|f| f.relative_path.as_str()).collect();
    assert!(paths.contains(&"dupes/copy.nes"));
    assert!(paths.contains(&"nes/Game (USA).nes"));
    assert_eq!(groups[0].wasted_space, 4096);

    let drive = fixture.drives.get(fixture.drive.id).unwrap();
    assert!(drive.last_scanned_at.is_some());
}

#[test]
fn test_paused_scan_resumes_to_the_same_result() {
    let uninterrupted = setup();
    let expected_job = scan_to_completion(&uninterrupted);
    let expected_files = file_set(&uninterrupted);

    let fixture = setup();
    let job_id = new_job(&fixture);
    let control = JobControl::new();
    let pause_on_first_batch = |event: ProgressEvent| {
        if matches!(event, ProgressEvent::Progress(_)) {
            control.request_pause();
        }
    };
    let status = runner(&fixture, 1)
        .run(job_id, &control, &pause_on_first_batch)
        .unwrap();
    assert_eq!(status, JobStatus::Paused);

    let paused = fixture.db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(paused.processed_files, 1, "one batch of one file");
    assert!(paused.last_processed_path.is_some());
    assert!(paused.completed_at.is_none());

    let status = runner(&fixture, 1)
        .run(job_id, &JobControl::new(), &|_| {})
        .unwrap();
    assert_eq!(status, JobStatus::Completed);

    let resumed = fixture.db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(resumed.resume_count, 1);
    assert_eq!(resumed.processed_files, expected_job.processed_files);
    assert_eq!(resumed.verified_files, expected_job.verified_files);
    assert_eq!(resumed.unknown_files, expected_job.unknown_files);
    assert_eq!(resumed.processed_bytes, expected_job.processed_bytes);
    assert_eq!(file_set(&fixture), expected_files);
}

#[test]
fn test_cancelled_scan_is_terminal() {
    let fixture = setup();
    let job_id = new_job(&fixture);
    let control = JobControl::new();
    let cancel = |event: ProgressEvent| {
        if matches!(event, ProgressEvent::Progress(_)) {
            control.request_cancel();
        }
    };
    let status = runner(&fixture, 1).run(job_id, &control, &cancel).unwrap();
    assert_eq!(status, JobStatus::Cancelled);

    let job = fixture.db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(job.processed_files, 1, "partial counters are kept");
    let err = runner(&fixture, 1)
        .run(job_id, &JobControl::new(), &|_| {})
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_missing_root_fails_the_job_and_marks_drive_offline() {
    let fixture = setup();
    let job_id = new_job(&fixture);
    fs::rename(&fixture.root, fixture.root.with_file_name("unplugged")).unwrap();

    let status = runner(&fixture, 64)
        .run(job_id, &JobControl::new(), &|_| {})
        .unwrap();
    assert_eq!(status, JobStatus::Failed);
    let job = fixture.db.get_scan_job(job_id).unwrap().unwrap();
    assert!(job.error_message.unwrap().contains("not reachable"));
    assert!(job.status.is_resumable());
    assert!(!fixture.drives.get(fixture.drive.id).unwrap().is_online);
}

#[test]
fn test_root_vanishing_mid_scan_keeps_stored_records() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let before = file_set(&fixture);

    let job_id = new_job(&fixture);
    let unplugged = fixture.root.with_file_name("unplugged");
    let unplug_on_hashing = |event: ProgressEvent| {
        if matches!(
            event,
            ProgressEvent::PhaseChanged {
                phase: ScanPhase::Hashing,
                ..
            }
        ) {
            fs::rename(&fixture.root, &unplugged).unwrap();
        }
    };
    let status = runner(&fixture, 64)
        .run(job_id, &JobControl::new(), &unplug_on_hashing)
        .unwrap();
    assert_eq!(status, JobStatus::Failed);

    let job = fixture.db.get_scan_job(job_id).unwrap().unwrap();
    assert!(job.error_message.unwrap().contains("not reachable"));
    assert_eq!(job.processed_files, 0, "no batch was committed");
    assert_eq!(job.error_files, 0);
    assert!(!fixture.drives.get(fixture.drive.id).unwrap().is_online);
    assert_eq!(file_set(&fixture), before, "stored records are untouched");
}

#[test]
fn test_organize_move_then_rollback_restores_everything() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: fixture.root.join("nes"),
        destination_root: fixture.root.join("organized"),
        template: template(&fixture, "Default"),
        is_move: true,
    };

    let preview = engine.dry_run(&request).unwrap();
    assert!(preview.log_id.is_none());
    assert_eq!(preview.plan.planned_count(), 2);
    assert!(fixture.root.join("nes/Game (USA).nes").exists(), "dry run changes nothing");

    let result = engine.execute(&request, &SilentReporter).unwrap();
    assert_eq!((result.succeeded, result.failed, result.skipped), (2, 0, 0));
    let moved = fixture.root.join("organized").join(SYSTEM).join("Game (USA).nes");
    assert!(moved.exists());
    assert!(!fixture.root.join("nes/Game (USA).nes").exists());

    let relocated = format!("organized/{}/Game (USA).nes", SYSTEM);
    assert!(
        fixture
            .db
            .get_scanned_file_by_path(fixture.drive.id, &relocated)
            .unwrap()
            .is_some(),
        "record follows the moved file"
    );

    let log_id = result.log_id.unwrap();
    let rollback = engine.rollback(log_id).unwrap();
    assert_eq!(rollback.restored, 2);
    assert_eq!(rollback.failed, 0);
    assert!(fixture.root.join("nes/Game (USA).nes").exists());
    assert!(fixture.root.join("nes/Game (Europe).nes").exists());
    assert!(!moved.exists());
    assert!(!fixture.root.join("organized").join(SYSTEM).exists());
    assert!(fixture
        .db
        .get_scanned_file_by_path(fixture.drive.id, "nes/Game (USA).nes")
        .unwrap()
        .is_some());

    let (log, _) = engine.log(log_id).unwrap();
    assert!(log.is_rolled_back);
    let again = engine.rollback(log_id).unwrap_err();
    assert!(matches!(again, Error::InvalidState(_)), "second rollback is an error");
    assert!(fixture.root.join("nes/Game (USA).nes").exists());
}

#[test]
fn test_move_replaces_stale_record_at_destination() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let destination = format!("organized/{}/Game (USA).nes", SYSTEM);

    // A record left behind by a file that was deleted outside the tool.
    let mut stale = fixture
        .db
        .get_scanned_file_by_path(fixture.drive.id, "misc/unknown.bin")
        .unwrap()
        .unwrap();
    stale.id = 0;
    stale.relative_path = destination.clone();
    stale.file_name = "Game (USA).nes".to_string();
    fixture.db.upsert_scanned_file(&stale, &[]).unwrap();

    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: fixture.root.join("nes"),
        destination_root: fixture.root.join("organized"),
        template: template(&fixture, "Default"),
        is_move: true,
    };
    let result = engine.execute(&request, &SilentReporter).unwrap();
    assert_eq!((result.succeeded, result.failed), (2, 0));
    assert!(result.entries.iter().all(|e| e.error_message.is_none()));

    let relocated = fixture
        .db
        .get_scanned_file_by_path(fixture.drive.id, &destination)
        .unwrap()
        .unwrap();
    assert_eq!(relocated.status, FileStatus::Verified, "the moved record replaced the stale one");
    assert_eq!(fixture.db.matches_for_file(relocated.id).unwrap()[0].game_name, "Game (USA)");

    let log_id = result.log_id.unwrap();
    assert_eq!(engine.logs().unwrap().len(), 1, "the run is logged");
    let rollback = engine.rollback(log_id).unwrap();
    assert_eq!((rollback.restored, rollback.failed), (2, 0));
    assert!(rollback.errors.is_empty());
    assert!(fixture.root.join("nes/Game (USA).nes").exists());
    assert!(fixture.root.join("nes/Game (Europe).nes").exists());
    assert!(fixture
        .db
        .get_scanned_file_by_path(fixture.drive.id, "nes/Game (USA).nes")
        .unwrap()
        .is_some());
}

#[test]
fn test_rollback_reverses_only_successful_entries() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());

    let taken = fixture.root.join("organized").join(SYSTEM).join("Game (Europe).nes");
    fs::create_dir_all(taken.parent().unwrap()).unwrap();
    fs::write(&taken, b"already here").unwrap();

    let request = OrganizeRequest {
        source_root: fixture.root.join("nes"),
        destination_root: fixture.root.join("organized"),
        template: template(&fixture, "Default"),
        is_move: true,
    };
    let result = engine.execute(&request, &SilentReporter).unwrap();
    assert_eq!((result.succeeded, result.failed, result.skipped), (1, 0, 1));
    assert!(result.message.contains("1 skipped"));
    let skipped = result
        .entries
        .iter()
        .find(|e| e.operation == OperationKind::Skip)
        .unwrap();
    assert!(skipped.error_message.as_deref().unwrap().contains("already exists"));

    let rollback = engine.rollback(result.log_id.unwrap()).unwrap();
    assert_eq!(rollback.restored, 1);
    assert!(fixture.root.join("nes/Game (USA).nes").exists());
    assert!(fixture.root.join("nes/Game (Europe).nes").exists(), "skipped file never moved");
    assert_eq!(fs::read(&taken).unwrap(), b"already here", "foreign file untouched");
}

#[test]
fn test_rollback_does_not_overwrite_a_reoccupied_source() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: fixture.root.join("nes"),
        destination_root: fixture.root.join("organized"),
        template: template(&fixture, "Flat"),
        is_move: true,
    };
    let result = engine.execute(&request, &SilentReporter).unwrap();
    assert_eq!(result.succeeded, 2);
    assert!(fixture.root.join("organized/Game (USA).nes").exists());

    fs::write(fixture.root.join("nes/Game (USA).nes"), b"new file").unwrap();
    let rollback = engine.rollback(result.log_id.unwrap()).unwrap();
    assert_eq!((rollback.restored, rollback.failed), (1, 1));
    assert!(rollback.errors[0].contains("occupied"));
    assert_eq!(fs::read(fixture.root.join("nes/Game (USA).nes")).unwrap(), b"new file");
    assert!(fixture.root.join("organized/Game (USA).nes").exists());
}

#[test]
fn test_copy_runs_cannot_be_rolled_back() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: fixture.root.clone(),
        destination_root: fixture.root.join("copies"),
        template: template(&fixture, "Alphabetical"),
        is_move: false,
    };
    let result = engine.execute(&request, &SilentReporter).unwrap();
    assert_eq!(result.succeeded, 2, "the duplicate copy collides with its original");
    assert_eq!(result.skipped, 1);
    assert!(fixture.root.join("copies").join(SYSTEM).join("G/Game (USA).nes").exists());
    assert!(fixture.root.join("nes/Game (USA).nes").exists());

    let err = engine.rollback(result.log_id.unwrap()).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_one_game_one_rom_keeps_the_preferred_region() {
    let fixture = setup();
    scan_to_completion(&fixture);
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: fixture.root.join("nes"),
        destination_root: fixture.root.join("1g1r"),
        template: template(&fixture, "One Game One ROM"),
        is_move: false,
    };
    let plan = engine.plan(&request).unwrap();
    assert_eq!(plan.planned_count(), 1);

    let kept = plan.items.iter().find(|i| !i.is_skipped()).unwrap();
    assert_eq!(kept.game_name.as_deref(), Some("Game (USA)"));
    assert_eq!(
        kept.destination,
        fixture.root.join("1g1r").join(format!("{} (1G1R)", SYSTEM)).join("Game (US).nes")
    );
    let dropped = plan.items.iter().find(|i| i.is_skipped()).unwrap();
    assert_eq!(dropped.game_name.as_deref(), Some("Game (Europe)"));
    assert_eq!(dropped.skip_reason.as_deref(), Some("1G1R prefers Game (USA)"));
}

#[test]
fn test_organize_rejects_paths_off_any_drive() {
    let fixture = setup();
    let elsewhere = tempdir().unwrap();
    let engine = OrganizeEngine::new(fixture.db.clone(), fixture.drives.clone());
    let request = OrganizeRequest {
        source_root: elsewhere.path().to_path_buf(),
        destination_root: fixture.root.join("out"),
        template: template(&fixture, "Default"),
        is_move: true,
    };
    assert!(engine.plan(&request).unwrap_err().is_not_found());
}

#[derive(Default)]
struct RecordingReporter {
    events: Mutex<Vec<String>>,
    progress: Mutex<Vec<ScanProgress>>,
}

impl ProgressReporter for RecordingReporter {
    fn on_job_queued(&self, job_id: i64, _drive_id: i64) {
        self.events.lock().unwrap().push(format!("queued {}", job_id));
    }

    fn on_job_started(&self, job_id: i64, _drive_id: i64, _resume_count: i64) {
        self.events.lock().unwrap().push(format!("started {}", job_id));
    }

    fn on_scan_progress(&self, progress: &ScanProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn on_job_finished(&self, job_id: i64, status: JobStatus, _message: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finished {} {}", job_id, status));
    }
}

#[test]
fn test_orchestrator_runs_queued_jobs_and_reports_in_order() {
    let fixture = setup();
    let reporter = Arc::new(RecordingReporter::default());
    let mut orchestrator = ScanOrchestrator::new(
        fixture.db.clone(),
        fixture.catalogs.clone(),
        fixture.drives.clone(),
        test_scan_config(1),
        reporter.clone(),
    )
    .unwrap();

    let job = orchestrator
        .enqueue(ScanRequest {
            drive_id: fixture.drive.id,
            sub_path: Some("nes".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(job.target_path, "nes");
    orchestrator.wait_idle();

    let done = orchestrator.job(job.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.processed_files, 2);
    assert!(!orchestrator.is_active(job.id));
    assert!(matches!(
        orchestrator.pause(job.id).unwrap_err(),
        Error::InvalidState(_)
    ));
    orchestrator.shutdown();

    let events = reporter.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            format!("queued {}", job.id),
            format!("started {}", job.id),
            format!("finished {} completed", job.id),
        ]
    );
    let progress = reporter.progress.lock().unwrap();
    assert_eq!(progress.len(), 2);
    assert!(progress.windows(2).all(|w| w[0].processed_files <= w[1].processed_files));
}

#[test]
fn test_orchestrator_refuses_disabled_drive_and_escaping_paths() {
    let fixture = setup();
    let orchestrator = ScanOrchestrator::new(
        fixture.db.clone(),
        fixture.catalogs.clone(),
        fixture.drives.clone(),
        test_scan_config(64),
        Arc::new(SilentReporter),
    )
    .unwrap();

    let escaping = orchestrator.enqueue(ScanRequest {
        drive_id: fixture.drive.id,
        sub_path: Some("../elsewhere".to_string()),
        ..Default::default()
    });
    assert!(matches!(escaping.unwrap_err(), Error::Validation(_)));

    fixture.drives.set_enabled(fixture.drive.id, false).unwrap();
    let disabled = orchestrator.enqueue(ScanRequest {
        drive_id: fixture.drive.id,
        ..Default::default()
    });
    assert!(matches!(disabled.unwrap_err(), Error::InvalidState(_)));
    assert!(orchestrator.jobs().unwrap().is_empty());
}
