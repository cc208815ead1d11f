//! Forensic chain-of-custody simulation runner.
//!
//! Exit status: 0 when every record verifies, 1 when tampering was found,
//! 2 on a storage fault and 3 on any other error.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use custody_chain::audit::{AuditLogger, RunEntry};
use custody_chain::collector::collect_fleet;
use custody_chain::config::AppConfig;
use custody_chain::device::build_fleet;
use custody_chain::report;
use custody_chain::storage::{TamperInjector, TamperMode};
use custody_chain::verification::VerificationSummary;
use custody_chain::{Collector, CustodyError, KeyManager, Storage, VerificationEngine};

#[derive(Parser)]
#[command(name = "custody-chain")]
#[command(about = "Seal simulated IoT evidence and verify its chain of custody")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./custody.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evidence database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Number of simulated devices
    #[arg(long, global = true)]
    devices: Option<usize>,

    /// Events emitted per device
    #[arg(long, global = true)]
    events: Option<usize>,

    /// Number of concurrent collectors
    #[arg(long, global = true)]
    collectors: Option<usize>,

    /// Print the per-record verification table
    #[arg(long, global = true)]
    summary: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect events and verify every stored record
    Demo,

    /// Collect events, corrupt some stored records, then verify
    Tamper {
        /// Records whose ciphertext gets a flipped bit (default: 5% of events)
        #[arg(long)]
        corrupt_ciphertext: Option<usize>,

        /// Records whose stored digest gets overwritten (default: 5% of events)
        #[arg(long)]
        overwrite_digest: Option<usize>,

        /// Seed for picking tamper targets
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "custody_chain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(summary) if summary.tamper_found() => 1,
        Ok(_) => 0,
        Err(e) => {
            error!("Run aborted: {:#}", e);
            e.downcast_ref::<CustodyError>()
                .map(CustodyError::exit_code)
                .unwrap_or(3)
        }
    };
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }
    if let Some(devices) = cli.devices {
        config.devices = devices;
    }
    if let Some(events) = cli.events {
        config.events_per_device = events;
    }
    if let Some(collectors) = cli.collectors {
        config.collectors = collectors;
    }
    config.validate()?;
    Ok(config)
}

fn reset_database(path: &Path) -> anyhow::Result<()> {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    let mut shm = path.as_os_str().to_owned();
    shm.push("-shm");

    for file in [path.to_path_buf(), PathBuf::from(wal), PathBuf::from(shm)] {
        if file.exists() {
            std::fs::remove_file(&file).map_err(CustodyError::from)?;
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<VerificationSummary> {
    let config = load_config(&cli)?;
    info!(
        "Starting run: {} devices x {} events over {} collector(s)",
        config.devices, config.events_per_device, config.collectors
    );

    if config.reset_database {
        reset_database(&config.database_path)?;
    } else if config.database_path.exists() {
        warn!(
            "Reusing {}; records from earlier runs were sealed under keys that no longer exist",
            config.database_path.display()
        );
    }

    let storage = Arc::new(Storage::open(&config.database_path).await?);
    let key_manager = Arc::new(KeyManager::new());
    let collectors: Vec<Arc<Collector>> = config
        .collector_ids()
        .into_iter()
        .map(|id| Arc::new(Collector::new(id, key_manager.clone(), storage.clone())))
        .collect();

    let fleet = build_fleet(config.devices, config.device_seed);
    let event_count = collect_fleet(&collectors, fleet, config.events_per_device).await?;
    info!("Collected {} events", event_count);

    if let Commands::Tamper {
        corrupt_ciphertext,
        overwrite_digest,
        seed,
    } = &cli.command
    {
        let default_count = (event_count / 20).max(1);
        let plan = [
            (
                TamperMode::FlipCiphertext,
                corrupt_ciphertext.unwrap_or(default_count),
            ),
            (
                TamperMode::OverwriteDigest,
                overwrite_digest.unwrap_or(default_count),
            ),
        ];
        let applied = TamperInjector::new(&storage)
            .apply_disjoint(&plan, *seed)
            .await?;

        let mut ids: Vec<i64> = applied.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        println!("Tampered IDs: {:?}", ids);
    }

    let engine = VerificationEngine::new(storage.clone(), key_manager.clone())
        .with_workers(config.verify_workers);
    let results = engine.verify_all().await?;
    let summary = VerificationEngine::summarize(&results);

    if cli.summary {
        print!("{}", report::render_table(&results));
        println!();
        print!("{}", report::render_summary(&summary));
    } else {
        println!(
            "Verify summary: {}",
            serde_json::to_string_pretty(&summary).context("Failed to render summary")?
        );
    }

    report::write_csv(&config.report.csv_path, &results).with_context(|| {
        format!("Failed to write {}", config.report.csv_path.display())
    })?;
    report::write_txt(&config.report.txt_path, &results).with_context(|| {
        format!("Failed to write {}", config.report.txt_path.display())
    })?;
    info!(
        "Saved {} and {}",
        config.report.csv_path.display(),
        config.report.txt_path.display()
    );

    if config.audit.enabled {
        let logger = AuditLogger::new(&config.audit.log_path)?;
        logger.append(&RunEntry::new(event_count, &summary)).await?;
        info!("Appended run to {}", logger.log_path().display());
    }

    storage.close().await;
    Ok(summary)
}
