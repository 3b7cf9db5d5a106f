//! snowrecon CLI - ServiceNow user reconciliation
//!
//! Usage:
//!   snowrecon init                          Write default config to .snowrecon/config.toml
//!   snowrecon username --first A --last B   Preview a generated username
//!   snowrecon diff --profile P --record R   Show the field edits a record needs
//!   snowrecon rehearse --profile P --directory D
//!                                           Run a reconciliation against a directory file

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snow_core::{CandidateUsername, ReconciliationOutcome, Record, SnowConfig, TargetProfile};
use snow_reconcile::{DirectorySnapshot, FieldDiff, MemoryPage, PageCall, UserReconciler};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "snowrecon")]
#[command(author, version, about = "Duplicate-aware ServiceNow user reconciliation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to .snowrecon/config.toml in the current directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Preview the username generated for a name
    Username {
        /// First name
        #[arg(long)]
        first: String,

        /// Last name
        #[arg(long)]
        last: String,

        /// Disambiguation suffix (0 = none)
        #[arg(long, default_value = "0")]
        suffix: u32,
    },

    /// Show the field edits needed to bring a record in line with a profile
    Diff {
        /// Target profile (JSON)
        #[arg(long, value_name = "FILE")]
        profile: PathBuf,

        /// Stored record (JSON with display_text and fields)
        #[arg(long, value_name = "FILE")]
        record: PathBuf,

        /// Treat the record as an existing user (compares project ID too)
        #[arg(long)]
        existing: bool,
    },

    /// Reconcile a profile against a directory file, offline
    Rehearse {
        /// Target profile (JSON)
        #[arg(long, value_name = "FILE")]
        profile: PathBuf,

        /// Directory snapshot (JSON with records, companies, projects)
        #[arg(long, value_name = "FILE")]
        directory: PathBuf,

        /// Write the updated directory back to the file
        #[arg(long)]
        write: bool,
    },
}

/// Everything a rehearsal did
#[derive(Debug, Serialize)]
struct RehearsalReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<ReconciliationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    journal: Vec<PageCall>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path).await,
        Commands::Username {
            first,
            last,
            suffix,
        } => cmd_username(load_config(cli.config.as_deref())?, &first, &last, suffix),
        Commands::Diff {
            profile,
            record,
            existing,
        } => cmd_diff(load_config(cli.config.as_deref())?, &profile, &record, existing).await,
        Commands::Rehearse {
            profile,
            directory,
            write,
        } => cmd_rehearse(load_config(cli.config.as_deref())?, &profile, &directory, write).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<SnowConfig> {
    match path {
        Some(path) => SnowConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => SnowConfig::load_or_default(Path::new(".")).context("Failed to load config"),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing snowrecon in {:?}", path);
    SnowConfig::write_default(&path).context("Failed to write default config")?;

    println!("Initialized snowrecon in {:?}", path);
    println!("Created:");
    println!("  .snowrecon/config.toml");
    println!("\nNext steps:");
    println!("  1. Set username.domain and the field locators for your instance");
    println!("  2. Adjust error_patterns if your instance words its errors differently");
    Ok(())
}

fn cmd_username(config: SnowConfig, first: &str, last: &str, suffix: u32) -> Result<()> {
    let profile = TargetProfile {
        first_name: first.to_string(),
        last_name: last.to_string(),
        employee_id: String::new(),
        email: String::new(),
        division: String::new(),
        customer_id: String::new(),
        company: String::new(),
        office_id: String::new(),
        project_id: String::new(),
        organization: String::new(),
        office_location: String::new(),
        is_admin: false,
        requestor_email: String::new(),
    }
    .validate()?;

    let candidate = CandidateUsername::new(&profile, &config.username.domain).with_suffix(suffix);
    println!("{}", candidate);
    Ok(())
}

async fn cmd_diff(config: SnowConfig, profile: &Path, record: &Path, existing: bool) -> Result<()> {
    let profile: TargetProfile = read_json(profile).await?;
    let profile = profile.validate()?;
    let record: Record = read_json(record).await?;

    let diff = FieldDiff::between(&record, &profile, &config.fields.bindings, existing);
    if diff.is_empty() {
        info!("Record already matches profile");
    }
    println!("{}", serde_json::to_string_pretty(&diff)?);
    Ok(())
}

async fn cmd_rehearse(config: SnowConfig, profile: &Path, directory: &Path, write: bool) -> Result<()> {
    let target: TargetProfile = read_json(profile).await?;
    let snapshot: DirectorySnapshot = read_json(directory).await?;

    let (report, updated) = rehearse(config, &target, snapshot).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if write {
        tokio::fs::write(directory, serde_json::to_string_pretty(&updated)?)
            .await
            .with_context(|| format!("Failed to write {}", directory.display()))?;
        info!("Updated directory written to {}", directory.display());
    }

    match report.error {
        Some(error) => anyhow::bail!("Reconciliation failed: {}", error),
        None => Ok(()),
    }
}

async fn rehearse(
    config: SnowConfig,
    target: &TargetProfile,
    snapshot: DirectorySnapshot,
) -> (RehearsalReport, DirectorySnapshot) {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!("Rehearsal {} for {}", run_id, target.full_name());

    let mut page = MemoryPage::new(snapshot, &config.fields);
    let timeout = config.run.timeout_secs.map(Duration::from_secs);
    let reconciler = UserReconciler::new(config);

    let result = match timeout {
        Some(deadline) => {
            reconciler
                .reconcile_with_deadline(target, &mut page, deadline)
                .await
        }
        None => reconciler.reconcile(target, &mut page).await,
    };

    let (outcome, error) = match result {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let report = RehearsalReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        outcome,
        error,
        journal: page.journal(),
    };
    (report, page.snapshot())
}
