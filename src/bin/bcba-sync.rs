//! bcba-sync CLI - Command-line interface for BCBA Sync
//!
//! Commands:
//! - export / import: Local backup files against a store snapshot
//! - inspect: Print a backup's metadata
//! - upload / list / restore / delete / prune: Google Drive backups
//! - doctor: Diagnose configuration, store and credentials

use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bcba_sync::remote::{AuthSession, Credential, DriveClient, OAuthRefresher, TokenRefresher};
use bcba_sync::schema::decode_document;
use bcba_sync::{
    BackupError, BackupService, ConfigError, Exporter, ImportStrategy, Importer, MemoryStore,
    StoreError, SyncConfig, SyncProgress, APP_VERSION, CURRENT_SCHEMA_VERSION, PRODUCER_NAME,
};

/// bcba-sync - Backup and restore behavior data collection records
#[derive(Parser)]
#[command(name = "bcba-sync")]
#[command(version = APP_VERSION)]
#[command(about = "Back up, restore and sync BCBA Tracker records", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (TOML)
    #[arg(long, global = true, env = "BCBA_CONFIG")]
    config: Option<PathBuf>,

    /// Store snapshot file; a missing file is an empty store
    #[arg(long, global = true, default_value = "bcba_store.json")]
    store: PathBuf,

    /// Override the remote folder name
    #[arg(long, global = true)]
    folder: Option<String>,

    /// Override the number of remote backups to keep
    #[arg(long, global = true)]
    cap: Option<usize>,

    /// Override the device name recorded in backups
    #[arg(long, global = true)]
    device_name: Option<String>,

    /// OAuth access token for Google Drive
    #[arg(long, global = true, env = "BCBA_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// OAuth refresh token for Google Drive
    #[arg(long, global = true, env = "BCBA_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Seconds until the access token expires
    #[arg(long, global = true, env = "BCBA_TOKEN_EXPIRES_IN", default_value = "3600")]
    token_expires_in: i64,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the store to a backup file
    Export {
        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a backup file into the store
    Import {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Conflict strategy: merge, replace or skip
        #[arg(long, default_value = "merge")]
        strategy: ImportStrategy,
    },

    /// Print a backup's metadata
    Inspect {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload a backup of the store and prune old ones
    Upload,

    /// List remote backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download a remote backup and import it into the store
    Restore {
        /// Remote file id
        id: String,

        /// Conflict strategy: merge, replace or skip
        #[arg(long, default_value = "merge")]
        strategy: ImportStrategy,
    },

    /// Delete a remote backup
    Delete {
        /// Remote file id
        id: String,
    },

    /// Delete remote backups beyond the retention cap
    Prune,

    /// Diagnose configuration, store and credentials
    Doctor {
        /// Also try listing the remote folder
        #[arg(long)]
        remote: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bcba_sync=debug" } else { "bcba_sync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), SyncCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let global = cli.global;

    // Inspect and doctor work without a valid config or store
    match &cli.command {
        Commands::Inspect { input, json } => return cmd_inspect(input, *json),
        Commands::Doctor { remote, json } => return runtime.block_on(cmd_doctor(&global, *remote, *json)),
        _ => {}
    }

    let config = load_config(&global)?;
    let store = Arc::new(MemoryStore::load(&global.store)?);
    runtime.block_on(dispatch(cli.command, &global, &config, store))
}

async fn dispatch(
    command: Commands,
    global: &GlobalArgs,
    config: &SyncConfig,
    store: Arc<MemoryStore>,
) -> Result<(), SyncCliError> {
    match command {
        Commands::Export { output } => {
            let exporter = Exporter::new(store, &config.device_name, &config.app_version);
            let bytes = exporter.export_to_bytes().await.map_err(BackupError::from)?;
            write_output(&output, &bytes)
        }
        Commands::Import { input, strategy } => {
            let bytes = read_input(&input)?;
            let summary = Importer::new(store.clone())
                .import_bytes(&bytes, strategy)
                .await
                .map_err(BackupError::from)?;
            store.save(&global.store)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Upload => {
            let service = drive_service(global, config, store).await?;
            let outcome = service.upload_backup(&mut |_: SyncProgress| {}).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::List { json } => {
            let service = drive_service(global, config, store).await?;
            let backups = service.list_backups().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&backups)?);
            } else if backups.is_empty() {
                println!("No backups in '{}'", config.folder_name);
            } else {
                for backup in &backups {
                    let size = backup
                        .size_bytes
                        .map(|s| format!("{s} bytes"))
                        .unwrap_or_else(|| "size unknown".to_string());
                    println!("{}  {}  ({})", backup.id, backup.display_name(), size);
                }
            }
            Ok(())
        }
        Commands::Restore { id, strategy } => {
            let service = drive_service(global, config, store.clone()).await?;
            let summary = service.restore_backup(&id, strategy, &mut |_: SyncProgress| {}).await?;
            store.save(&global.store)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Delete { id } => {
            let service = drive_service(global, config, store).await?;
            service.delete_backup(&id).await?;
            println!("Deleted {id}");
            Ok(())
        }
        Commands::Prune => {
            let service = drive_service(global, config, store).await?;
            let report = service.prune().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Inspect { .. } | Commands::Doctor { .. } => Ok(()),
    }
}

fn load_config(global: &GlobalArgs) -> Result<SyncConfig, SyncCliError> {
    let mut config = match &global.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(folder) = &global.folder {
        config.folder_name = folder.clone();
    }
    if let Some(cap) = global.cap {
        config.retention_cap = cap;
    }
    if let Some(device_name) = &global.device_name {
        config.device_name = device_name.clone();
    }
    config.validate()?;
    Ok(config)
}

fn credential(global: &GlobalArgs) -> Option<Credential> {
    let access_token = global.access_token.clone()?;
    Some(Credential {
        access_token,
        refresh_token: global.refresh_token.clone(),
        expires_at: Utc::now() + Duration::seconds(global.token_expires_in),
    })
}

async fn auth_session(global: &GlobalArgs, config: &SyncConfig) -> Result<Arc<AuthSession>, SyncCliError> {
    let refresher: Option<Arc<dyn TokenRefresher>> = match &config.client_id {
        Some(client_id) => {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
                .build()
                .map_err(bcba_sync::RemoteError::from)
                .map_err(BackupError::from)?;
            Some(Arc::new(OAuthRefresher::new(client, &config.token_url, client_id)))
        }
        None => None,
    };

    let session = AuthSession::new(refresher).with_refresh_window(config.refresh_window());
    match credential(global) {
        Some(credential) => session.sign_in(credential).await,
        None => return Err(SyncCliError::NoCredentials),
    }
    Ok(Arc::new(session))
}

async fn drive_service(
    global: &GlobalArgs,
    config: &SyncConfig,
    store: Arc<MemoryStore>,
) -> Result<BackupService, SyncCliError> {
    let session = auth_session(global, config).await?;
    let drive = DriveClient::new(config.drive_config(), session).map_err(BackupError::from)?;
    Ok(BackupService::new(store, Arc::new(drive), config))
}

fn read_input(input: &Path) -> Result<Vec<u8>, SyncCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(std::fs::read(input)?)
    }
}

fn write_output(output: &Path, bytes: &[u8]) -> Result<(), SyncCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    } else {
        std::fs::write(output, bytes)?;
    }
    Ok(())
}

fn cmd_inspect(input: &Path, json: bool) -> Result<(), SyncCliError> {
    let bytes = read_input(input)?;
    let document = decode_document(&bytes)?;
    let metadata = &document.metadata;

    if json {
        println!("{}", serde_json::to_string_pretty(metadata)?);
    } else {
        println!("Backup {}", metadata.id);
        println!("==================");
        println!("Created:   {}", metadata.created_at.to_rfc3339());
        println!("Device:    {}", metadata.device_name);
        println!("App:       {}", metadata.app_version);
        println!("Schema:    v{}", metadata.schema_version);
        println!("Students:  {}", metadata.student_count);
        if let Some(programs) = metadata.program_count {
            println!("Programs:  {}", programs);
        }
        println!("Sessions:  {}", metadata.session_count);
        println!("Behaviors: {}", metadata.behavior_count);
        println!("Size:      {} bytes", metadata.file_size_bytes);
    }

    if document.is_compatible() {
        Ok(())
    } else {
        Err(SyncCliError::Incompatible(metadata.schema_version))
    }
}

async fn cmd_doctor(global: &GlobalArgs, remote: bool, json: bool) -> Result<(), SyncCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::new("version", CheckStatus::Ok, format!("bcba-sync version {}", APP_VERSION)),
        DoctorCheck::new(
            "schema_version",
            CheckStatus::Ok,
            format!("Backup schema: v{}", CURRENT_SCHEMA_VERSION),
        ),
    ];

    let config = match load_config(global) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config",
                CheckStatus::Ok,
                format!(
                    "Folder '{}', keeping {} backups",
                    config.folder_name, config.retention_cap
                ),
            ));
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck::new("config", CheckStatus::Error, CliError::from(e).message));
            None
        }
    };

    let store = match MemoryStore::load(&global.store) {
        Ok(store) => {
            let check = match store.snapshot() {
                Ok(snapshot) if global.store.exists() => DoctorCheck::new(
                    "store",
                    CheckStatus::Ok,
                    format!(
                        "{} students, {} programs, {} sessions, {} behaviors",
                        snapshot.students.len(),
                        snapshot.programs.len(),
                        snapshot.sessions.len(),
                        snapshot.behaviors.len()
                    ),
                ),
                Ok(_) => DoctorCheck::new(
                    "store",
                    CheckStatus::Warning,
                    "Store file does not exist (empty store)".to_string(),
                ),
                Err(e) => DoctorCheck::new("store", CheckStatus::Error, e.to_string()),
            };
            checks.push(check);
            Some(Arc::new(store))
        }
        Err(e) => {
            checks.push(DoctorCheck::new(
                "store",
                CheckStatus::Error,
                format!("Cannot load store: {}", e),
            ));
            None
        }
    };

    checks.push(match (&global.access_token, &global.refresh_token) {
        (Some(_), Some(_)) => DoctorCheck::new(
            "credentials",
            CheckStatus::Ok,
            "Access and refresh tokens present".to_string(),
        ),
        (Some(_), None) => DoctorCheck::new(
            "credentials",
            CheckStatus::Warning,
            "No refresh token; the session ends when the access token expires".to_string(),
        ),
        (None, _) => DoctorCheck::new(
            "credentials",
            CheckStatus::Warning,
            "BCBA_ACCESS_TOKEN not set; remote commands unavailable".to_string(),
        ),
    });

    if remote {
        let check = match (config, store) {
            (Some(config), Some(store)) => match drive_service(global, &config, store).await {
                Ok(service) => match service.list_backups().await {
                    Ok(backups) => DoctorCheck::new(
                        "remote",
                        CheckStatus::Ok,
                        format!("{} backups in '{}'", backups.len(), config.folder_name),
                    ),
                    Err(e) => DoctorCheck::new("remote", CheckStatus::Error, e.to_string()),
                },
                Err(e) => DoctorCheck::new("remote", CheckStatus::Error, CliError::from(e).message),
            },
            _ => DoctorCheck::new(
                "remote",
                CheckStatus::Warning,
                "Skipped (config or store failed)".to_string(),
            ),
        };
        checks.push(check);
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: APP_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("bcba-sync Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SyncCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum SyncCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Config(ConfigError),
    Store(StoreError),
    Backup(BackupError),
    NoCredentials,
    Incompatible(u32),
    DoctorFailed,
}

impl From<io::Error> for SyncCliError {
    fn from(e: io::Error) -> Self {
        SyncCliError::Io(e)
    }
}

impl From<serde_json::Error> for SyncCliError {
    fn from(e: serde_json::Error) -> Self {
        SyncCliError::Json(e)
    }
}

impl From<ConfigError> for SyncCliError {
    fn from(e: ConfigError) -> Self {
        SyncCliError::Config(e)
    }
}

impl From<StoreError> for SyncCliError {
    fn from(e: StoreError) -> Self {
        SyncCliError::Store(e)
    }
}

impl From<BackupError> for SyncCliError {
    fn from(e: BackupError) -> Self {
        SyncCliError::Backup(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<SyncCliError> for CliError {
    fn from(e: SyncCliError) -> Self {
        use bcba_sync::{ImportError, RemoteError};

        match e {
            SyncCliError::Io(e) => CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions"),
            SyncCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            SyncCliError::Config(e) => CliError::new("CONFIG_ERROR", e.to_string(), "Fix the config file or flags"),
            SyncCliError::Store(e) => CliError::new("STORE_ERROR", e.to_string(), "Check the --store snapshot file"),
            SyncCliError::NoCredentials => CliError::new(
                "NOT_SIGNED_IN",
                "No access token provided".to_string(),
                "Set BCBA_ACCESS_TOKEN (and BCBA_REFRESH_TOKEN to allow refresh)",
            ),
            SyncCliError::Incompatible(found) => CliError::new(
                "INCOMPATIBLE_SCHEMA",
                format!(
                    "Backup schema version {} is newer than supported version {}",
                    found, CURRENT_SCHEMA_VERSION
                ),
                "Update bcba-sync to restore this backup",
            ),
            SyncCliError::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more health checks failed".to_string(),
                "Review the doctor report for details",
            ),
            SyncCliError::Backup(e) => {
                let message = e.to_string();
                match e {
                    BackupError::Import(ImportError::IncompatibleSchema { .. }) => {
                        CliError::new("INCOMPATIBLE_SCHEMA", message, "Update bcba-sync to restore this backup")
                    }
                    BackupError::Import(ImportError::Malformed(_)) => {
                        CliError::new("MALFORMED_BACKUP", message, "Run 'bcba-sync inspect' on the file")
                    }
                    BackupError::Import(ImportError::Store(_)) | BackupError::Store(_) => {
                        CliError::new("STORE_ERROR", message, "No changes were written; retry the import")
                    }
                    BackupError::Export(_) => {
                        CliError::new("EXPORT_ERROR", message, "Check the --store snapshot file")
                    }
                    BackupError::Remote(RemoteError::NotSignedIn) => CliError::new(
                        "NOT_SIGNED_IN",
                        message,
                        "Refresh BCBA_ACCESS_TOKEN or set client_id to allow token refresh",
                    ),
                    BackupError::Remote(RemoteError::NotFound(_)) => {
                        CliError::new("NOT_FOUND", message, "Run 'bcba-sync list' for valid ids")
                    }
                    BackupError::Remote(_) => {
                        CliError::new("REMOTE_ERROR", message, "Check network access and retry")
                    }
                    BackupError::Io(_) => CliError::new("IO_ERROR", message, "Check file paths and permissions"),
                }
            }
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: String) -> Self {
        DoctorCheck {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
