mod commands;
mod logging;
mod progress;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{
    CatalogCommand, Cli, Commands, DriveCommand, FilesArgs, JobCommand, OrganizeArgs, ScanArgs,
    TemplateCommand,
};
use dotenv::dotenv;
use progress::CliReporter;
use romkeep_core::catalog::store::ImportOptions;
use romkeep_core::catalog::{CatalogFormat, HashKind, InvalidEntryPolicy};
use romkeep_core::config::{load_configuration, AppConfig};
use romkeep_core::dedupe::duplicate_groups_for_drive;
use romkeep_core::drives::HealthMonitor;
use romkeep_core::organize::validate;
use romkeep_core::storage::models::{
    Drive, FileStatus, JobPriority, JobStatus, OrganizationTemplate, ScanJob, ScannedFile,
};
use romkeep_core::{
    CatalogStore, Database, DriveRegistry, OrganizeEngine, OrganizeRequest, ScanOrchestrator,
    ScanRequest, SilentReporter, TemplateStore, Verifier,
};
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Shared handles every command works through.
struct App {
    config: AppConfig,
    db: Arc<Database>,
    catalogs: Arc<CatalogStore>,
    drives: Arc<DriveRegistry>,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        let db = Arc::new(
            Database::open(Path::new(&config.database_path))
                .with_context(|| format!("opening database {}", config.database_path))?,
        );
        let catalogs = Arc::new(CatalogStore::open(db.clone())?);
        let drives = Arc::new(DriveRegistry::with_system_probe(db.clone()));
        Ok(Self {
            config,
            db,
            catalogs,
            drives,
        })
    }

    fn orchestrator(&self) -> Result<ScanOrchestrator> {
        Ok(ScanOrchestrator::new(
            self.db.clone(),
            self.catalogs.clone(),
            self.drives.clone(),
            self.config.scan.clone(),
            Arc::new(CliReporter::new()),
        )?)
    }

    /// Re-probes drives in the background while a scan runs.
    fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::start(
            self.drives.clone(),
            Duration::from_secs(self.config.scan.health_check_interval_secs.max(1)),
        )
    }

    fn templates(&self) -> TemplateStore {
        TemplateStore::new(self.db.clone())
    }

    /// A stored template, with configured priorities applied to built-ins.
    fn template(&self, name: &str) -> Result<OrganizationTemplate> {
        let mut template = self.templates().get(name)?;
        if template.is_builtin {
            template.region_priority = self.config.organize.region_priority.clone();
            template.language_priority = self.config.organize.language_priority.clone();
            template.exclude_categories = self.config.organize.exclude_categories.clone();
        }
        Ok(template)
    }
}

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration: {}", err);
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Err(err) = run(command, config) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run(command: Commands, config: AppConfig) -> Result<()> {
    if let Commands::PrintConfig = command {
        print_config(&config);
        return Ok(());
    }

    let app = App::open(config)?;
    match command {
        Commands::Drive(cmd) => run_drive(&app, cmd),
        Commands::Catalog(cmd) => run_catalog(&app, cmd),
        Commands::Scan(args) => run_scan(&app, args),
        Commands::Jobs => run_jobs(&app),
        Commands::Job(cmd) => run_job(&app, cmd),
        Commands::Verify => run_verify(&app),
        Commands::Files(args) => run_files(&app, args),
        Commands::File { id } => run_file(&app, id),
        Commands::Duplicates { drive, csv } => run_duplicates(&app, drive, csv.as_deref()),
        Commands::Organize(args) => run_organize(&app, args),
        Commands::Rollback { log_id } => run_rollback(&app, log_id),
        Commands::Logs { id } => run_logs(&app, id),
        Commands::Template(cmd) => run_template(&app, cmd),
        Commands::TruncateDb => run_truncate_db(&app),
        Commands::PrintConfig => Ok(()),
    }
}

fn print_drive(drive: &Drive) {
    let state = if !drive.is_enabled {
        "disabled".yellow()
    } else if drive.is_online {
        "online".green()
    } else {
        "offline".red()
    };
    let free = drive
        .free_bytes
        .map(|b| format!("{} free", indicatif::HumanBytes(b.max(0) as u64)))
        .unwrap_or_default();
    info!(
        "{:>4}  {:<20} {:<8} {}{} {}",
        drive.id,
        drive.label.cyan(),
        state,
        drive.root_path,
        if drive.is_ssd { " (ssd)" } else { "" },
        free
    );
}

fn run_drive(app: &App, cmd: DriveCommand) -> Result<()> {
    match cmd {
        DriveCommand::Add { path, label } => {
            let drive = app.drives.register(&path, label.as_deref())?;
            info!("{} drive {}", "Registered".green(), drive.id);
            print_drive(&drive);
        }
        DriveCommand::List => {
            let drives = app.drives.list()?;
            if drives.is_empty() {
                info!("No drives registered. Add one with `romkeep drive add <path>`.");
            }
            drives.iter().for_each(print_drive);
        }
        DriveCommand::Refresh { id } => {
            let drives = match id {
                Some(id) => vec![app.drives.refresh(id)?],
                None => app.drives.refresh_all()?,
            };
            drives.iter().for_each(print_drive);
        }
        DriveCommand::Enable { id } => print_drive(&app.drives.set_enabled(id, true)?),
        DriveCommand::Disable { id } => print_drive(&app.drives.set_enabled(id, false)?),
        DriveCommand::Label { id, label } => print_drive(&app.drives.set_label(id, &label)?),
        DriveCommand::Remove { id } => {
            if !prompt_confirm(&format!("Remove drive {}? Its scanned files are kept offline.", id), false)? {
                return Ok(());
            }
            let drive = app.drives.remove(id)?;
            info!("{} drive {} ({})", "Removed".green(), drive.id, drive.root_path);
        }
    }
    Ok(())
}

fn run_catalog(app: &App, cmd: CatalogCommand) -> Result<()> {
    match cmd {
        CatalogCommand::Import {
            path,
            name,
            strict,
            format,
        } => {
            let format = match format {
                Some(name) => Some(
                    CatalogFormat::from_name(&name.to_lowercase())
                        .with_context(|| format!("unknown catalog format '{}'", name))?,
                ),
                None => None,
            };
            let options = ImportOptions {
                invalid_entries: if strict {
                    InvalidEntryPolicy::Fail
                } else {
                    InvalidEntryPolicy::Skip
                },
                name_override: name,
                format,
            };
            let start = Instant::now();
            let report = app.catalogs.import_path(&path, &options)?;
            info!(
                "{} {} ({}): {} games, {} roms in {:.2}s",
                "Imported".green(),
                report.catalog.name.cyan(),
                report.format.as_str(),
                report.games,
                report.roms,
                start.elapsed().as_secs_f64()
            );
            if report.skipped_roms > 0 || report.skipped_elements > 0 {
                warn!(
                    "Skipped {} invalid roms and {} unknown elements",
                    report.skipped_roms, report.skipped_elements
                );
            }
            for warning in report.warnings.iter().take(20) {
                warn!("  {}", warning);
            }
        }
        CatalogCommand::List => {
            let catalogs = app.catalogs.list()?;
            if catalogs.is_empty() {
                info!("No catalogs imported.");
            }
            for catalog in catalogs {
                info!(
                    "{:>4}  {}  [{}] {} games, {} roms, version {}",
                    catalog.id,
                    catalog.name.cyan(),
                    catalog.provider,
                    catalog.game_count,
                    catalog.rom_count,
                    catalog.version.as_deref().unwrap_or("-")
                );
            }
        }
        CatalogCommand::Remove { id } => {
            let catalog = app.catalogs.remove(id)?;
            info!("{} catalog {}", "Removed".green(), catalog.name);
        }
    }
    Ok(())
}

fn run_scan(app: &App, args: ScanArgs) -> Result<()> {
    let priority: JobPriority = args.priority.parse()?;
    let mut orchestrator = app.orchestrator()?;
    let recovered = orchestrator.recover()?;
    if recovered > 0 {
        info!("Picked up {} pending jobs from an earlier run", recovered);
    }

    let start = Instant::now();
    let job = orchestrator.enqueue(ScanRequest {
        drive_id: args.drive,
        sub_path: args.path,
        priority,
        rehash: args.rehash,
    })?;
    info!("Queued scan job {} for drive {}", job.id, job.drive_id);

    let mut monitor = app.health_monitor();
    orchestrator.wait_idle();
    monitor.stop();
    orchestrator.shutdown();

    let job = app.db.get_scan_job(job.id)?.context("scan job vanished")?;
    print_job(&job);
    info!("Scan finished in {:.2}s", start.elapsed().as_secs_f64());
    if job.status != JobStatus::Completed {
        bail!("scan job {} ended {}", job.id, job.status);
    }
    Ok(())
}

fn print_job(job: &ScanJob) {
    let status = match job.status {
        JobStatus::Completed => job.status.to_string().green(),
        JobStatus::Failed => job.status.to_string().red(),
        JobStatus::Running => job.status.to_string().cyan(),
        _ => job.status.to_string().yellow(),
    };
    info!(
        "{:>4}  drive {:<3} {:<10} {:<11} {}/{} files, {} verified, {} unknown, {} errors{}",
        job.id,
        job.drive_id,
        status,
        job.phase.to_string(),
        job.processed_files,
        job.total_files,
        job.verified_files,
        job.unknown_files,
        job.error_files,
        job.error_message
            .as_deref()
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    );
}

fn run_jobs(app: &App) -> Result<()> {
    let jobs = app.db.list_scan_jobs()?;
    if jobs.is_empty() {
        info!("No scan jobs.");
    }
    jobs.iter().for_each(print_job);
    Ok(())
}

fn run_job(app: &App, cmd: JobCommand) -> Result<()> {
    match cmd {
        JobCommand::Pause { id } => {
            // Nothing runs outside a scan command, so only persisted state can change here.
            let job = app.db.get_scan_job(id)?.with_context(|| format!("scan job {} not found", id))?;
            match job.status {
                JobStatus::Pending | JobStatus::Running => {
                    app.db
                        .update_job_status(id, JobStatus::Paused, job.phase, Some("paused by user"))?;
                    info!("{} scan job {}", "Paused".green(), id);
                }
                other => bail!("scan job {} is {} and cannot be paused", id, other),
            }
        }
        JobCommand::Resume { id } => {
            let mut orchestrator = app.orchestrator()?;
            let job = orchestrator.resume(id)?;
            info!("Resuming scan job {} on drive {}", job.id, job.drive_id);
            let mut monitor = app.health_monitor();
            orchestrator.wait_idle();
            monitor.stop();
            orchestrator.shutdown();
            if let Some(job) = app.db.get_scan_job(id)? {
                print_job(&job);
            }
        }
        JobCommand::Cancel { id } => {
            let mut orchestrator = ScanOrchestrator::new(
                app.db.clone(),
                app.catalogs.clone(),
                app.drives.clone(),
                app.config.scan.clone(),
                Arc::new(SilentReporter),
            )?;
            let result = orchestrator.cancel(id);
            orchestrator.shutdown();
            result?;
            info!("{} scan job {}", "Cancelled".green(), id);
        }
    }
    Ok(())
}

fn run_verify(app: &App) -> Result<()> {
    let verifier = Verifier::new(app.db.clone(), app.catalogs.clone());
    let report = verifier.reverify_all()?;
    info!(
        "{} files: {} verified, {} bad dumps, {} unknown, {} errors ({} changed)",
        report.files,
        report.verified.to_string().green(),
        report.bad_dumps.to_string().yellow(),
        report.unknown,
        report.errors.to_string().red(),
        report.changed
    );
    print_status_counts(app, None)
}

fn print_status_counts(app: &App, drive: Option<i64>) -> Result<()> {
    let counts = app.db.count_files_by_status(drive)?;
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();
    info!("Stored files: {}", summary.join(", "));
    Ok(())
}

fn print_file(file: &ScannedFile) {
    let status = match file.status {
        FileStatus::Verified => file.status.to_string().green(),
        FileStatus::BadDump => file.status.to_string().yellow(),
        FileStatus::Error => file.status.to_string().red(),
        _ => file.status.to_string().normal(),
    };
    info!(
        "{:>6}  drive {:<3} {:<9} {:>10}  {}",
        file.id,
        file.drive_id.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
        status,
        file.size,
        file.relative_path
    );
}

fn run_files(app: &App, args: FilesArgs) -> Result<()> {
    if let Some(hash) = args.hash {
        let (kind, value) = hash
            .split_once(':')
            .with_context(|| format!("expected kind:value, got '{}'", hash))?;
        let kind: HashKind = kind.parse()?;
        let files = app.db.find_files_by_hash(kind, &value.to_lowercase())?;
        if files.is_empty() {
            info!("No files carry {}", hash);
        }
        files.iter().for_each(print_file);
        return Ok(());
    }

    let status = args.status.as_deref().map(str::parse::<FileStatus>).transpose()?;
    let page = app
        .db
        .list_scanned_files_page(args.drive, status, args.cursor.as_deref(), args.limit.max(1))?;
    page.items.iter().for_each(print_file);
    match page.next_cursor {
        Some(cursor) => info!("More files: --cursor {}", cursor),
        None => print_status_counts(app, args.drive)?,
    }
    Ok(())
}

fn run_file(app: &App, id: i64) -> Result<()> {
    let file = app
        .db
        .get_scanned_file(id)?
        .with_context(|| format!("scanned file {} not found", id))?;
    print_file(&file);
    for kind in [HashKind::Crc32, HashKind::Md5, HashKind::Sha1] {
        if let Some(value) = file.hashes.get(kind) {
            info!("    {:<6} {}", kind.to_string(), value);
        }
    }
    if let Some(header) = file.header_size {
        info!("    header {} bytes", header);
    }
    if let Some(message) = &file.error_message {
        warn!("    {}", message);
    }
    for m in app.db.matches_for_file(id)? {
        info!(
            "    {} {} / {} ({} match{})",
            "=".green(),
            m.catalog_name,
            m.game_name,
            m.match_type,
            if m.headerless { ", headerless" } else { "" }
        );
    }
    Ok(())
}

fn run_duplicates(app: &App, drive: Option<i64>, csv_path: Option<&Path>) -> Result<()> {
    let groups = duplicate_groups_for_drive(&app.db, drive)?;
    if groups.is_empty() {
        info!("No duplicates found.");
        return Ok(());
    }

    for group in groups.iter().take(25) {
        info!(
            "{} {} copies, {} wasted",
            group.hash.to_string().cyan(),
            group.count(),
            indicatif::HumanBytes(group.wasted_space)
        );
        for file in &group.files {
            info!("    drive {:<3} {}", file.drive_id.unwrap_or_default(), file.relative_path);
        }
    }
    if groups.len() > 25 {
        info!("... and {} more groups", groups.len() - 25);
    }
    let wasted: u64 = groups.iter().map(|g| g.wasted_space).sum();
    info!(
        "{} duplicate groups, {} reclaimable",
        groups.len(),
        indicatif::HumanBytes(wasted).to_string().green()
    );

    if let Some(path) = csv_path {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        wtr.write_record(["hash", "file_id", "drive_id", "path", "size", "status"])?;
        for group in &groups {
            for file in &group.files {
                wtr.write_record([
                    group.hash.to_string(),
                    file.id.to_string(),
                    file.drive_id.map(|d| d.to_string()).unwrap_or_default(),
                    file.relative_path.clone(),
                    file.size.to_string(),
                    file.status.to_string(),
                ])?;
            }
        }
        wtr.flush()?;
        info!("Wrote duplicates to {}", path.display());
    }
    Ok(())
}

fn run_organize(app: &App, args: OrganizeArgs) -> Result<()> {
    let engine = OrganizeEngine::new(app.db.clone(), app.drives.clone());
    let request = OrganizeRequest {
        source_root: args.source,
        destination_root: args.dest,
        template: app.template(&args.template)?,
        is_move: !args.copy,
    };

    if args.dry_run {
        let result = engine.dry_run(&request)?;
        for item in &result.plan.items {
            match &item.skip_reason {
                Some(reason) => info!("  {} {} ({})", "skip".yellow(), item.source.display(), reason),
                None => info!(
                    "  {} {} -> {}",
                    (if request.is_move { "move" } else { "copy" }).cyan(),
                    item.source.display(),
                    item.destination.display()
                ),
            }
        }
        info!("{}", result.message);
        return Ok(());
    }

    if request.is_move
        && !prompt_confirm(
            &format!(
                "Move verified files from {} to {}?",
                request.source_root.display(),
                request.destination_root.display()
            ),
            true,
        )?
    {
        return Ok(());
    }

    let reporter = CliReporter::new();
    let result = engine.execute(&request, &reporter)?;
    for entry in result.entries.iter().filter(|e| !e.success) {
        warn!(
            "  {} {}: {}",
            "failed".red(),
            entry.source_path,
            entry.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    match result.log_id {
        Some(id) if request.is_move => info!("{} (roll back with `romkeep rollback {}`)", result.message, id),
        _ => info!("{}", result.message),
    }
    if result.failed > 0 {
        bail!("{} files could not be organized", result.failed);
    }
    Ok(())
}

fn run_rollback(app: &App, log_id: i64) -> Result<()> {
    let engine = OrganizeEngine::new(app.db.clone(), app.drives.clone());
    let result = engine.rollback(log_id)?;
    for err in &result.errors {
        warn!("  {}", err);
    }
    info!("{}", result.message);
    if result.failed > 0 {
        bail!("{} files could not be restored", result.failed);
    }
    Ok(())
}

fn run_logs(app: &App, id: Option<i64>) -> Result<()> {
    let engine = OrganizeEngine::new(app.db.clone(), app.drives.clone());
    if let Some(id) = id {
        let (log, entries) = engine.log(id)?;
        info!(
            "Run {} with '{}': {} -> {}",
            log.id, log.template_name, log.source_root, log.destination_root
        );
        for entry in entries {
            let mark = if entry.success { "ok".green() } else { "failed".red() };
            info!(
                "  {:>5} {:<6} {:<6} {} -> {}{}",
                entry.ordinal,
                entry.operation.to_string(),
                mark,
                entry.source_path,
                entry.destination_path,
                entry
                    .error_message
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            );
        }
        return Ok(());
    }

    let logs = engine.logs()?;
    if logs.is_empty() {
        info!("No organize runs.");
    }
    for log in logs {
        let state = if log.is_rolled_back {
            "rolled back".yellow()
        } else if log.success {
            "ok".green()
        } else {
            "partial".red()
        };
        info!(
            "{:>4}  {}  {:<12} {} {} files  {}",
            log.id,
            local_time(&log.started_at),
            state,
            if log.is_move { "move" } else { "copy" },
            log.total_files,
            log.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_template(app: &App, cmd: TemplateCommand) -> Result<()> {
    let store = app.templates();
    match cmd {
        TemplateCommand::List => {
            for template in store.list()? {
                info!(
                    "{:<20} {} / {}{}",
                    template.name.cyan(),
                    template.folder_pattern,
                    template.file_pattern,
                    match (template.is_builtin, template.use_1g1r) {
                        (true, true) => " (built-in, 1G1R)",
                        (true, false) => " (built-in)",
                        (false, true) => " (1G1R)",
                        (false, false) => "",
                    }
                );
            }
        }
        TemplateCommand::Add {
            name,
            folder,
            file,
            one_g1r,
            regions,
            languages,
            exclude,
        } => {
            let defaults = &app.config.organize;
            let or_default = |values: Vec<String>, fallback: &Vec<String>| {
                if values.is_empty() {
                    fallback.clone()
                } else {
                    values
                }
            };
            let template = store.add(&OrganizationTemplate {
                id: 0,
                name,
                folder_pattern: folder,
                file_pattern: file,
                use_1g1r: one_g1r,
                region_priority: or_default(regions, &defaults.region_priority),
                language_priority: or_default(languages, &defaults.language_priority),
                exclude_categories: or_default(exclude, &defaults.exclude_categories),
                is_builtin: false,
            })?;
            info!("{} template '{}'", "Added".green(), template.name);
        }
        TemplateCommand::Remove { name } => {
            let template = store.remove(&name)?;
            info!("{} template '{}'", "Removed".green(), template.name);
        }
        TemplateCommand::Validate { pattern } => {
            let validation = validate(&pattern);
            if validation.is_valid() {
                info!("{}", "Pattern is valid".green());
            } else {
                for problem in validation.problems() {
                    warn!("  {}", problem.red());
                }
                bail!("invalid pattern");
            }
        }
    }
    Ok(())
}

fn run_truncate_db(app: &App) -> Result<()> {
    if !prompt_confirm("Truncate all database tables?", false)? {
        return Ok(());
    }
    app.db.truncate_all()?;
    info!("{}", "All tables truncated".green());
    Ok(())
}

/// Stored RFC 3339 timestamps shown in local time.
fn local_time(stamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(stamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| stamp.to_string())
}

fn print_config(config: &AppConfig) {
    info!("database_path: {}", config.database_path);
    info!("scan: {:#?}", config.scan);
    info!("organize: {:#?}", config.organize);
}

fn prompt_confirm(prompt: &str, default: bool) -> Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    print!("{} {} ", prompt, hint);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(match input.trim().to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}
