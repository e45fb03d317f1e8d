use romkeep_core::catalog::RomHashes;
use romkeep_core::storage::models::*;
use romkeep_core::storage::Database;

fn make_test_drive(root: &str) -> Drive {
    Drive {
        id: 0,
        label: root.rsplit('/').next().unwrap_or(root).to_string(),
        root_path: root.to_string(),
        volume_id: Some("vol-1".to_string()),
        is_online: true,
        is_enabled: true,
        is_ssd: false,
        total_bytes: Some(1_000_000),
        free_bytes: Some(500_000),
        last_seen_at: None,
        last_scanned_at: None,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn make_test_job(drive_id: i64) -> ScanJob {
    ScanJob {
        id: 0,
        drive_id,
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
    }
}

fn make_test_scanned_file(drive_id: i64, path: &str, size: i64, crc: &str) -> ScannedFile {
    ScannedFile {
        id: 0,
        drive_id: Some(drive_id),
        relative_path: path.to_string(),
        file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
        archive_path: None,
        inner_path: None,
        size,
        modified_at: 1_700_000_000,
        hashes: RomHashes::new(Some(crc), None, None).unwrap(),
        header_size: None,
        headerless_hashes: None,
        is_online: true,
        status: FileStatus::Unknown,
        error_message: None,
        scan_job_id: None,
        first_seen_at: String::new(),
        last_seen_at: String::new(),
        verified_at: None,
    }
}

#[test]
fn test_drive_crud_and_paging() {
    let db = Database::open_in_memory().unwrap();
    let ids: Vec<i64> = ["/mnt/a", "/mnt/b", "/mnt/c"]
        .iter()
        .map(|root| db.insert_drive(&make_test_drive(root)).unwrap())
        .collect();

    let fetched = db.get_drive(ids[0]).unwrap().unwrap();
    assert_eq!(fetched.root_path, "/mnt/a");
    assert_eq!(fetched.volume_id.as_deref(), Some("vol-1"));
    assert!(db.get_drive_by_root("/mnt/b").unwrap().is_some());

    assert!(db.set_drive_label(ids[1], "Backup").unwrap());
    assert!(db.set_drive_enabled(ids[1], false).unwrap());
    let b = db.get_drive(ids[1]).unwrap().unwrap();
    assert_eq!(b.label, "Backup");
    assert!(!b.is_enabled);

    let first = db.list_drives_page(None, 2).unwrap();
    assert_eq!(first.items.len(), 2);
    let second = db.list_drives_page(first.next_cursor.as_deref(), 2).unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.next_cursor.is_none());
    assert_eq!(second.items[0].root_path, "/mnt/c");

    assert!(db.delete_drive(ids[2]).unwrap());
    assert!(!db.delete_drive(ids[2]).unwrap());
    assert_eq!(db.list_drives().unwrap().len(), 2);
}

#[test]
fn test_job_status_transitions() {
    let db = Database::open_in_memory().unwrap();
    let drive_id = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();
    let job_id = db.insert_scan_job(&make_test_job(drive_id)).unwrap();

    db.update_job_status(job_id, JobStatus::Running, ScanPhase::Discovering, None)
        .unwrap();
    let running = db.get_scan_job(job_id).unwrap().unwrap();
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    db.update_job_status(job_id, JobStatus::Paused, ScanPhase::Hashing, None)
        .unwrap();
    let paused = db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.phase, ScanPhase::Hashing);
    assert!(paused.completed_at.is_none(), "paused jobs are not finished");
    assert_eq!(db.increment_resume_count(job_id).unwrap(), 1);

    db.update_job_status(job_id, JobStatus::Failed, ScanPhase::Finished, Some("root vanished"))
        .unwrap();
    let failed = db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("root vanished"));
    assert!(failed.completed_at.is_some());
    assert_eq!(failed.started_at, running.started_at, "first start is kept");

    assert_eq!(db.jobs_with_status(JobStatus::Failed).unwrap().len(), 1);
    assert!(db.jobs_with_status(JobStatus::Running).unwrap().is_empty());
}

#[test]
fn test_job_paging_walks_every_job_once() {
    let db = Database::open_in_memory().unwrap();
    let drive_id = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();
    for _ in 0..5 {
        db.insert_scan_job(&make_test_job(drive_id)).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = db.list_scan_jobs_page(cursor.as_deref(), 2).unwrap();
        assert!(page.items.len() <= 2);
        seen.extend(page.items.iter().map(|j| j.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    let all: Vec<i64> = db.list_scan_jobs().unwrap().iter().map(|j| j.id).collect();
    let mut sorted = all.clone();
    sorted.sort_unstable();
    assert_eq!(seen, sorted);
    assert!(db.list_scan_jobs_page(Some("not-a-cursor"), 2).is_err());
}

#[test]
fn test_commit_batch_advances_checkpoint_with_files() {
    let db = Database::open_in_memory().unwrap();
    let drive_id = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();
    let job_id = db.insert_scan_job(&make_test_job(drive_id)).unwrap();

    let files = vec![
        (make_test_scanned_file(drive_id, "nes/a.nes", 10, "0000000a"), vec![]),
        (make_test_scanned_file(drive_id, "nes/b.nes", 20, "0000000b"), vec![]),
    ];
    let checkpoint = ScanCheckpoint {
        last_processed_path: Some("nes/b.nes".to_string()),
        last_processed_entry: None,
        processed_files: 2,
        verified_files: 0,
        unknown_files: 2,
        error_files: 0,
        processed_bytes: 30,
    };
    let ids = db.commit_scan_batch(job_id, &files, &checkpoint).unwrap();
    assert_eq!(ids.len(), 2);

    let job = db.get_scan_job(job_id).unwrap().unwrap();
    assert_eq!(job.last_processed_path.as_deref(), Some("nes/b.nes"));
    assert_eq!(job.processed_bytes, 30);

    // Committing the same paths again updates instead of duplicating.
    let again = db.commit_scan_batch(job_id, &files, &checkpoint).unwrap();
    assert_eq!(again, ids);
    assert_eq!(db.list_scanned_files(Some(drive_id)).unwrap().len(), 2);
}

#[test]
fn test_file_queries_by_status_hash_and_page() {
    let db = Database::open_in_memory().unwrap();
    let drive_id = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();

    let mut ids = Vec::new();
    for (i, status) in [FileStatus::Verified, FileStatus::Unknown, FileStatus::Verified]
        .into_iter()
        .enumerate()
    {
        let mut file = make_test_scanned_file(drive_id, &format!("nes/{}.nes", i), 10, "0000000a");
        file.status = status;
        ids.push(db.upsert_scanned_file(&file, &[]).unwrap());
    }

    let fetched = db.get_scanned_file(ids[1]).unwrap().unwrap();
    assert_eq!(fetched.relative_path, "nes/1.nes");
    assert_eq!(fetched.status, FileStatus::Unknown);

    let by_hash = db
        .find_files_by_hash(romkeep_core::catalog::HashKind::Crc32, "0000000A")
        .unwrap();
    assert_eq!(by_hash.len(), 3, "lookup ignores hex case");

    assert_eq!(
        db.count_files_by_status(Some(drive_id)).unwrap(),
        vec![(FileStatus::Unknown, 1), (FileStatus::Verified, 2)]
    );

    let verified = db
        .list_scanned_files_page(Some(drive_id), Some(FileStatus::Verified), None, 1)
        .unwrap();
    assert_eq!(verified.items.len(), 1);
    let rest = db
        .list_scanned_files_page(
            Some(drive_id),
            Some(FileStatus::Verified),
            verified.next_cursor.as_deref(),
            1,
        )
        .unwrap();
    assert_eq!(rest.items[0].id, ids[2]);
    assert!(rest.next_cursor.is_none());

    assert!(db.delete_scanned_file(ids[0]).unwrap());
    assert!(db.get_scanned_file(ids[0]).unwrap().is_none());
    assert!(!db.delete_scanned_file(ids[0]).unwrap());
}

#[test]
fn test_relocate_disk_path_moves_file_record() {
    let db = Database::open_in_memory().unwrap();
    let a = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();
    let b = db.insert_drive(&make_test_drive("/mnt/b")).unwrap();
    let job_id = db.insert_scan_job(&make_test_job(a)).unwrap();
    let files = vec![(make_test_scanned_file(a, "in/x.nes", 10, "0000000a"), vec![])];
    let checkpoint = ScanCheckpoint {
        last_processed_path: Some("in/x.nes".to_string()),
        last_processed_entry: None,
        processed_files: 1,
        verified_files: 0,
        unknown_files: 1,
        error_files: 0,
        processed_bytes: 10,
    };
    db.commit_scan_batch(job_id, &files, &checkpoint).unwrap();

    let moved = db
        .relocate_disk_path(Some(a), "in/x.nes", Some(b), "NES/X.nes")
        .unwrap();
    assert_eq!(moved, 1);
    assert!(db.get_scanned_file_by_path(a, "in/x.nes").unwrap().is_none());
    let file = db.get_scanned_file_by_path(b, "NES/X.nes").unwrap().unwrap();
    assert_eq!(file.file_name, "X.nes");
    assert_eq!(file.hashes.crc32.as_deref(), Some("0000000a"));
}

#[test]
fn test_relocate_disk_path_replaces_stale_destination_record() {
    let db = Database::open_in_memory().unwrap();
    let a = db.insert_drive(&make_test_drive("/mnt/a")).unwrap();
    db.upsert_scanned_file(&make_test_scanned_file(a, "in/x.nes", 10, "0000000a"), &[])
        .unwrap();
    db.upsert_scanned_file(&make_test_scanned_file(a, "NES/X.nes", 99, "000000ff"), &[])
        .unwrap();

    db.relocate_disk_path(Some(a), "in/x.nes", Some(a), "NES/X.nes")
        .unwrap();
    let files = db.list_scanned_files(Some(a)).unwrap();
    assert_eq!(files.len(), 1, "stale record is dropped");
    assert_eq!(files[0].relative_path, "NES/X.nes");
    assert_eq!(files[0].hashes.crc32.as_deref(), Some("0000000a"));
}

#[test]
fn test_reopening_a_database_keeps_its_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("romkeep.db");
    let id = {
        let db = Database::open(&path).unwrap();
        db.insert_drive(&make_test_drive("/mnt/a")).unwrap()
    };
    let db = Database::open(&path).unwrap();
    assert_eq!(db.get_drive(id).unwrap().unwrap().root_path, "/mnt/a");
    let version: i64 = db
        .connection()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 1);
}

#[test]
fn test_organization_log_round_trip_and_single_rollback_claim() {
    let db = Database::open_in_memory().unwrap();
    let log = OrganizationLog {
        id: 0,
        source_root: "/mnt/a/in".to_string(),
        destination_root: "/mnt/a/out".to_string(),
        template_name: "Default".to_string(),
        is_move: true,
        total_files: 2,
        succeeded: 1,
        failed: 1,
        skipped: 0,
        total_bytes: 10,
        success: false,
        message: Some("1 moved, 1 failed, 0 skipped".to_string()),
        rollback_data: Some("{\"moves\":[]}".to_string()),
        is_rolled_back: false,
        rolled_back_at: None,
        started_at: "2024-01-01T00:00:00Z".to_string(),
        completed_at: Some("2024-01-01T00:00:01Z".to_string()),
    };
    let entries: Vec<OrganizationEntry> = (0..2)
        .map(|i| OrganizationEntry {
            id: 0,
            log_id: 0,
            ordinal: i,
            operation: OperationKind::Move,
            source_path: format!("/mnt/a/in/{}.nes", i),
            destination_path: format!("/mnt/a/out/{}.nes", i),
            size: 10,
            hash: None,
            success: i == 0,
            error_message: (i == 1).then(|| "permission denied".to_string()),
            file_id: None,
        })
        .collect();

    let log_id = db.insert_organization_log(&log, &entries).unwrap();
    let stored = db.get_organization_log(log_id).unwrap().unwrap();
    assert_eq!(stored.template_name, "Default");
    assert!(stored.is_move);
    assert!(!stored.is_rolled_back);

    let stored_entries = db.organization_entries(log_id).unwrap();
    assert_eq!(stored_entries.len(), 2);
    assert_eq!(stored_entries[1].error_message.as_deref(), Some("permission denied"));
    assert_eq!(stored_entries[0].operation, OperationKind::Move);

    assert!(db.mark_log_rolled_back(log_id).unwrap());
    assert!(!db.mark_log_rolled_back(log_id).unwrap(), "second claim must fail");
    let rolled = db.get_organization_log(log_id).unwrap().unwrap();
    assert!(rolled.is_rolled_back);
    assert!(rolled.rolled_back_at.is_some());
}

#[test]
fn test_template_crud() {
    let db = Database::open_in_memory().unwrap();
    let mut template = OrganizationTemplate {
        id: 0,
        name: "Mine".to_string(),
        folder_pattern: "{System}".to_string(),
        file_pattern: "{Name}.{Extension}".to_string(),
        use_1g1r: false,
        region_priority: vec!["USA".to_string()],
        language_priority: vec!["En".to_string()],
        exclude_categories: vec![],
        is_builtin: false,
    };
    template.id = db.insert_template(&template).unwrap();

    template.folder_pattern = "{System}/{FirstLetter}".to_string();
    assert!(db.update_template(&template).unwrap());
    let stored = db.get_template_by_name("Mine").unwrap().unwrap();
    assert_eq!(stored.folder_pattern, "{System}/{FirstLetter}");
    assert_eq!(stored.region_priority, vec!["USA"]);
    assert!(!stored.is_builtin);

    assert!(db.insert_template(&template).is_err(), "names are unique");
    assert!(db.delete_template(template.id).unwrap());
    assert!(db.list_templates().unwrap().is_empty());
}
