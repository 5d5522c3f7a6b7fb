//! AXON client — decentralized compute marketplace client core

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use axon_client::activity::ActivityKind;
use axon_client::client::FailoverClient;
use axon_client::config::Config;
use axon_client::notify::{LogNotifier, Notifier, Severity};
use axon_client::realtime::RealtimeChannel;
use axon_client::rewards::RewardsService;
use axon_client::store::ActivityStore;
use axon_client::tracker::ActivityTracker;
use axon_client::transfer::{
    HttpContentStore, JobMetadata, ResourceRequirements, TransferCoordinator,
};

#[derive(Parser)]
#[command(name = "axon-client")]
#[command(about = "AXON decentralized compute client")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Wallet address override
    #[arg(long, env = "AXON_WALLET")]
    wallet: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the client core: tracker, reconciliation loop, realtime channel
    Start,
    /// Show the cached rewards snapshot
    Status,
    /// Show the cached earnings estimate
    Earnings,
    /// Upload a dataset and create a job
    SubmitJob {
        /// Input file (repeatable)
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "1")]
        cpus: u32,
        #[arg(long, default_value = "1024")]
        memory_mb: u64,
        #[arg(long)]
        gpu: bool,
        /// Where to write the job manifest
        #[arg(long, default_value = "job-manifest.json")]
        manifest: PathBuf,
    },
    /// Retrieve a dataset from a job manifest, verifying checksums
    FetchJob {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "axon_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;
    if cli.wallet.is_some() {
        config.wallet_address = cli.wallet;
    }

    match cli.command {
        Commands::Start => run_client(config).await,
        Commands::Status => show_status(&config),
        Commands::Earnings => show_earnings(&config),
        Commands::SubmitJob {
            inputs,
            cpus,
            memory_mb,
            gpu,
            manifest,
        } => submit_job(&config, &inputs, cpus, memory_mb, gpu, &manifest).await,
        Commands::FetchJob { manifest, out } => fetch_job(&config, &manifest, &out).await,
    }
}

async fn run_client(config: Config) -> Result<()> {
    let store = Arc::new(ActivityStore::open(Path::new(&config.storage.data_dir))?);
    let client = Arc::new(FailoverClient::new(&config.api)?);
    let notifier = Arc::new(LogNotifier);
    let tracker = Arc::new(ActivityTracker::new(
        store.clone(),
        client.clone(),
        notifier.clone(),
        config.wallet_address.clone(),
        &config.tracker,
    ));
    let rewards = Arc::new(RewardsService::new(
        store,
        client.clone(),
        tracker.clone(),
        notifier.clone(),
        config.wallet_address.clone(),
        &config.rewards,
    ));

    let mut realtime = RealtimeChannel::new(&config.realtime, client.offline_flag());
    for kind in ["new_task", "task_available"] {
        let notifier = notifier.clone();
        realtime.on(kind, move |_| {
            notifier.notify("New task available", Severity::Info);
        });
    }
    {
        let notifier = notifier.clone();
        realtime.on("reward_update", move |envelope| {
            let amount = envelope
                .get("amount")
                .and_then(|a| a.as_f64())
                .unwrap_or_default();
            notifier.notify(&format!("Reward update: {amount} AXON"), Severity::Info);
        });
    }

    let sync_task = tokio::spawn(rewards.clone().run());
    let push_task = tokio::spawn(realtime.run());

    tracing::info!(
        wallet = config.wallet_address.as_deref().unwrap_or("<none>"),
        endpoints = config.api.endpoints.len(),
        "client core running"
    );

    let session_id = format!("session-{}", chrono::Utc::now().timestamp_millis());
    let started = Instant::now();
    track_best_effort(
        &tracker,
        ActivityKind::PlatformLogin {
            session_id: session_id.clone(),
        },
    )
    .await;
    track_best_effort(
        &tracker,
        ActivityKind::MiningStarted {
            session_id: session_id.clone(),
        },
    )
    .await;

    shutdown_signal().await;
    tracing::info!("shutting down");

    track_best_effort(
        &tracker,
        ActivityKind::MiningStopped {
            session_id,
            duration_ms: started.elapsed().as_millis() as i64,
        },
    )
    .await;

    sync_task.abort();
    push_task.abort();
    Ok(())
}

/// Tracking trouble never blocks the session itself.
async fn track_best_effort(tracker: &ActivityTracker, kind: ActivityKind) {
    if let Err(e) = tracker.track(kind).await {
        tracing::warn!(error = %e, "activity tracking failed");
    }
}

fn show_status(config: &Config) -> Result<()> {
    let store = ActivityStore::open(Path::new(&config.storage.data_dir))?;
    let snapshot = store.snapshot();
    println!(
        "Total earned (estimate): {:.4} AXON",
        snapshot.total_earned_estimate
    );
    println!("Pending activities: {}", store.pending_count());
    println!("Failed submissions: {}", store.failed_count());
    match chrono::DateTime::from_timestamp_millis(snapshot.last_sync_ms) {
        Some(when) if snapshot.last_sync_ms > 0 => println!("Last sync: {}", when.to_rfc3339()),
        _ => println!("Last sync: never"),
    }
    if snapshot.offline_mode {
        println!("(offline — showing cached data)");
    }
    Ok(())
}

fn show_earnings(config: &Config) -> Result<()> {
    let store = ActivityStore::open(Path::new(&config.storage.data_dir))?;
    println!("{:.4} AXON", store.snapshot().total_earned_estimate);
    Ok(())
}

async fn submit_job(
    config: &Config,
    inputs: &[PathBuf],
    cpus: u32,
    memory_mb: u64,
    gpu: bool,
    manifest_path: &Path,
) -> Result<()> {
    let client = Arc::new(FailoverClient::new(&config.api)?);
    let content = Arc::new(HttpContentStore::new(&config.transfer));
    let coordinator = TransferCoordinator::new(content, client.clone(), &config.transfer);

    let requirements = ResourceRequirements {
        cpus,
        memory_mb,
        gpu,
    };
    let (job_id, metadata) = coordinator.submit_job(inputs, requirements).await?;

    let manifest = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(manifest_path, manifest)
        .with_context(|| format!("write manifest {}", manifest_path.display()))?;

    // Job submission feeds the reward tracker.
    let store = Arc::new(ActivityStore::open(Path::new(&config.storage.data_dir))?);
    let tracker = ActivityTracker::new(
        store,
        client,
        Arc::new(LogNotifier),
        config.wallet_address.clone(),
        &config.tracker,
    );
    track_best_effort(
        &tracker,
        ActivityKind::JobPosted {
            job_id: job_id.clone(),
        },
    )
    .await;

    println!("Job created: {job_id}");
    println!("Manifest written to {}", manifest_path.display());
    Ok(())
}

async fn fetch_job(config: &Config, manifest_path: &Path, out: &Path) -> Result<()> {
    let manifest = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("read manifest {}", manifest_path.display()))?;
    let metadata: JobMetadata = serde_json::from_str(&manifest)
        .with_context(|| format!("parse manifest {}", manifest_path.display()))?;

    let client = Arc::new(FailoverClient::new(&config.api)?);
    let content = Arc::new(HttpContentStore::new(&config.transfer));
    let coordinator = TransferCoordinator::new(content, client, &config.transfer);

    let files = coordinator.fetch_dataset(&metadata).await?;
    std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    for file in &files {
        let path = out.join(&file.file_name);
        std::fs::write(&path, &file.bytes)
            .with_context(|| format!("write {}", path.display()))?;
        println!("Fetched {} ({} bytes)", path.display(), file.bytes.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
