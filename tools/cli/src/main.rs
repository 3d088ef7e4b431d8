//! Health Sync CLI - Command line interface for the sync agent.
//!
//! This tool runs single sync attempts, inspects local state and history,
//! and hosts the long-lived scheduler.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use healthsync_common::{ApiKey, Settings, SyncTrigger};
use healthsync_storage::{FileStore, KeyValueStore, MemoryStore, ResilientStore};
use healthsync_sync::{
    AgentConfig, BackgroundRunner, BackgroundSignal, ConnectivityMonitor, FailureKind,
    HttpTransport, RandomHealthSource, ScheduleCoordinator, SchedulePolicy, SyncAgent, SyncResult,
    SyncStatus, SyncTransport,
};

/// Exit code for a failure with no more specific code.
const EXIT_FAILURE: u8 = 1;
/// The remote could not be reached.
const EXIT_CONNECTIVITY: u8 = 2;
/// The remote refused the credential (401/403).
const EXIT_AUTH: u8 = 3;
/// The remote answered with another non-2xx status.
const EXIT_TRANSPORT: u8 = 4;

#[derive(Parser)]
#[command(name = "healthsync")]
#[command(about = "Health Sync - Store-and-forward health data sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the API base URL.
    #[arg(long)]
    api_base: Option<String>,

    /// Override the API key.
    #[arg(long)]
    api_key: Option<String>,

    /// Override the state directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Print sync results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one manual sync.
    Sync,

    /// Check whether the API is reachable.
    Check,

    /// Show settings, last sync and pending work.
    Status,

    /// Show recent sync history.
    Logs {
        /// Number of entries to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Skip fetching the server-side history.
        #[arg(long)]
        local: bool,
    },

    /// Turn periodic auto-sync on or off.
    AutoSync {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Run the scheduler in the foreground until interrupted.
    Run,

    /// Handle one background signal and exit.
    Background {
        #[arg(value_enum)]
        signal: SignalKind,

        /// Message text for a push signal.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum SignalKind {
    Wake,
    Reconnect,
    Push,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "healthsync", &mut std::io::stdout());
        return Ok(0);
    }

    let config = load_config(&cli)?;
    let store = open_store(&config);

    match cli.command {
        Commands::Sync => cmd_sync(&config, store, cli.json).await,
        Commands::Check => cmd_check(&config).await,
        Commands::Status => cmd_status(&config, store).await,
        Commands::Logs { limit, local } => cmd_logs(&config, store, limit, local).await,
        Commands::AutoSync { state } => cmd_auto_sync(store, state).await,
        Commands::Run => cmd_run(&config, store).await,
        Commands::Background { signal, message } => {
            cmd_background(&config, store, signal, message, cli.json).await
        }
        Commands::Completions { .. } => Ok(0),
    }
}

/// Configuration from file and flags, validated.
fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AgentConfig::default(),
    };

    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = ApiKey::new(api_key.as_str());
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// File-backed store that keeps working in memory if the disk fails.
fn open_store(config: &AgentConfig) -> Arc<dyn KeyValueStore> {
    let durable: Arc<dyn KeyValueStore> = match config
        .resolve_data_dir()
        .and_then(FileStore::new)
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("State directory unavailable, keeping state in memory: {}", e);
            Arc::new(MemoryStore::new())
        }
    };
    Arc::new(ResilientStore::new(durable))
}

fn transport(config: &AgentConfig) -> Result<Arc<dyn SyncTransport>> {
    let transport = HttpTransport::new(config).context("Failed to create HTTP client")?;
    Ok(Arc::new(transport))
}

/// Foreground agent with connectivity seeded from a probe.
async fn foreground_agent(config: &AgentConfig, store: Arc<dyn KeyValueStore>) -> Result<SyncAgent> {
    let transport = transport(config)?;
    let connectivity = ConnectivityMonitor::new(true);
    connectivity.check(transport.as_ref()).await;

    Ok(SyncAgent::new(
        Arc::new(RandomHealthSource::new(config.device_info.clone())),
        transport,
        store,
        connectivity,
    )
    .with_log_capacity(config.log_capacity)
    .with_remote_log_limit(config.remote_log_limit))
}

fn exit_code(result: &SyncResult) -> u8 {
    match result.failure_kind() {
        None => 0,
        Some(FailureKind::Connectivity) => EXIT_CONNECTIVITY,
        Some(FailureKind::Authentication) => EXIT_AUTH,
        Some(FailureKind::Rejected) => EXIT_TRANSPORT,
        Some(FailureKind::DataSource) | Some(FailureKind::Other) => EXIT_FAILURE,
    }
}

fn print_result(result: &SyncResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    match &result.status {
        SyncStatus::Synced { .. } | SyncStatus::Skipped => println!("{}", result.summary()),
        SyncStatus::Failed { .. } | SyncStatus::Queued { .. } => eprintln!("{}", result.summary()),
    }
    Ok(())
}

/// Run one manual sync.
async fn cmd_sync(config: &AgentConfig, store: Arc<dyn KeyValueStore>, json: bool) -> Result<u8> {
    let agent = foreground_agent(config, store).await?;
    info!("Syncing to {}", agent.transport().endpoint());

    let result = agent.run_sync(SyncTrigger::Manual).await;
    print_result(&result, json)?;
    Ok(exit_code(&result))
}

/// Probe the API.
async fn cmd_check(config: &AgentConfig) -> Result<u8> {
    let transport = transport(config)?;
    match transport.probe().await {
        Ok(()) => {
            println!("API reachable: {}", transport.endpoint());
            Ok(0)
        }
        Err(e) => {
            eprintln!("API unreachable: {}", e);
            Ok(if e.is_connectivity() {
                EXIT_CONNECTIVITY
            } else if e.is_auth_failure() {
                EXIT_AUTH
            } else {
                EXIT_TRANSPORT
            })
        }
    }
}

/// Show local state.
async fn cmd_status(config: &AgentConfig, store: Arc<dyn KeyValueStore>) -> Result<u8> {
    let state = healthsync_sync::AgentState::new(store);
    let settings = state.settings().await;
    let summary = state.latest_summary().await;

    println!("Health Sync Status:");
    println!("  Endpoint: {}", config.base_url());
    println!(
        "  Auto-sync: {}",
        if settings.auto_sync_enabled { "on" } else { "off" }
    );
    match state.last_sync().await {
        Some(at) => println!(
            "  Last sync: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("  Last sync: never"),
    }
    println!(
        "  Pending payload: {}",
        if state.pending_payload().await.is_some() { "yes" } else { "no" }
    );

    let show = |value: Option<String>| value.unwrap_or_else(|| "--".to_string());
    println!("  Latest data:");
    println!("    Steps: {}", show(summary.steps.map(|s| s.to_string())));
    println!("    Calories: {}", show(summary.calories.map(|c| c.to_string())));
    println!(
        "    Sleep: {}",
        show(summary.sleep_hours.map(|h| format!("{:.1}h", h)))
    );

    Ok(0)
}

/// Show sync history.
async fn cmd_logs(
    config: &AgentConfig,
    store: Arc<dyn KeyValueStore>,
    limit: usize,
    local: bool,
) -> Result<u8> {
    let entries = if local {
        healthsync_sync::SyncLogStore::with_capacity(store, config.log_capacity)
            .list(limit)
            .await
    } else {
        foreground_agent(config, store).await?.refresh_logs(limit).await
    };

    if entries.is_empty() {
        println!("No sync history yet.");
        return Ok(0);
    }

    for entry in entries {
        println!(
            "{} [{}] {}",
            entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            if entry.is_success() { "ok" } else { "error" },
            entry.message
        );
    }
    Ok(0)
}

/// Persist the auto-sync flag.
async fn cmd_auto_sync(store: Arc<dyn KeyValueStore>, state: Toggle) -> Result<u8> {
    let enabled = matches!(state, Toggle::On);
    healthsync_sync::AgentState::new(store)
        .save_settings(Settings {
            auto_sync_enabled: enabled,
        })
        .await
        .context("Failed to save settings")?;

    println!("Auto-sync {}", if enabled { "enabled" } else { "disabled" });
    Ok(0)
}

/// Host the scheduler until Ctrl-C.
async fn cmd_run(config: &AgentConfig, store: Arc<dyn KeyValueStore>) -> Result<u8> {
    let agent = Arc::new(foreground_agent(config, store).await?);
    let probe_loop = agent
        .connectivity()
        .spawn_probe_loop(agent.transport(), config.connectivity_poll());

    let coordinator = ScheduleCoordinator::start(agent.clone(), SchedulePolicy::from(config)).await;
    println!(
        "Scheduler running (auto-sync {}), press Ctrl-C to stop",
        if coordinator.is_auto_sync_enabled() { "on" } else { "off" }
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping scheduler");
    coordinator.stop().await;
    probe_loop.abort();
    Ok(0)
}

/// Handle one background signal.
async fn cmd_background(
    config: &AgentConfig,
    store: Arc<dyn KeyValueStore>,
    signal: SignalKind,
    message: Option<String>,
    json: bool,
) -> Result<u8> {
    let signal = match signal {
        SignalKind::Wake => BackgroundSignal::PeriodicWake,
        SignalKind::Reconnect => BackgroundSignal::Reconnected,
        SignalKind::Push => BackgroundSignal::Push(message),
    };

    let runner = BackgroundRunner::from_config(config, store, transport(config)?);
    match runner.handle(signal).await {
        Some(result) => {
            print_result(&result, json)?;
            Ok(exit_code(&result))
        }
        None => {
            println!("Nothing to sync");
            Ok(0)
        }
    }
}
