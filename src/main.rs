//! # Irrigo: irrigation reminders
//!
//! Usage:
//!   irrigo                                   # Start gateway + background scanner
//!   irrigo scan                              # One due/overdue pass, print the report
//!   irrigo complete <SCHEDULE_ID> --water 120
//!   irrigo schedules                         # List schedules
//!   irrigo notifications --unread            # List notifications

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use irrigo_core::IrrigoConfig;
use irrigo_gateway::AppState;
use irrigo_scheduler::dispatch::{platform_notifier_from_config, sms_sender_from_config};
use irrigo_scheduler::{FileKvStore, IrrigationDb, spawn_scanner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "irrigo", version, about = "💧 Irrigo: irrigation schedule reminders")]
struct Cli {
    /// Config file (default: ~/.irrigo/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket gateway and the background scanner
    Serve {
        /// Override gateway.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single scan and exit
    Scan,
    /// Record a completed irrigation
    Complete {
        schedule_id: String,
        /// Water used, in litres
        #[arg(short, long)]
        water: f64,
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// List schedules with farm and crop names
    Schedules,
    /// List stored notifications
    Notifications {
        #[arg(long)]
        unread: bool,
    },
    /// Write the default config file
    Init,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "irrigo=debug,irrigo_scheduler=debug,irrigo_gateway=debug,tower_http=debug"
    } else {
        "irrigo=info,irrigo_scheduler=info,irrigo_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<IrrigoConfig> {
    let config = match path {
        Some(p) => IrrigoConfig::load_from(p),
        None => IrrigoConfig::load(),
    };
    config.context("loading configuration")
}

/// Open stores under `data_dir` and wire the services.
fn build_state(config: IrrigoConfig) -> Result<Arc<AppState>> {
    let data_dir = config.data_path();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(IrrigationDb::open(&data_dir.join("irrigo.db"))?);
    let kv = Arc::new(FileKvStore::new(&data_dir.join("store"))?);
    let sms = sms_sender_from_config(&config.sms);
    let platform = platform_notifier_from_config(&config.notifications);

    tracing::debug!("📂 Data dir: {}", data_dir.display());
    Ok(Arc::new(AppState::new(config, db, kv, sms, platform)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config_path = cli.config;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Init => {
            let path = config_path.unwrap_or_else(IrrigoConfig::default_path);
            if path.exists() {
                println!("⚠️  {} already exists, leaving it untouched.", path.display());
            } else {
                IrrigoConfig::default().save_to(&path)?;
                println!("✅ Wrote default config to {}", path.display());
            }
        }
        Command::Serve { port } => {
            let mut config = load_config(config_path.as_ref())?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let interval = Duration::from_secs(config.scheduler.scan_interval_secs);
            let startup_delay = Duration::from_secs(config.scheduler.startup_delay_secs);
            let state = build_state(config)?;

            let cancel = CancellationToken::new();
            let scanner = spawn_scanner(state.scanner.clone(), interval, startup_delay, cancel.clone());

            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("🛑 Shutdown requested");
                }
                shutdown.cancel();
            });

            irrigo_gateway::serve(state, cancel.clone()).await?;
            cancel.cancel();
            scanner.await.context("scanner task")?;
        }
        Command::Scan => {
            let state = build_state(load_config(config_path.as_ref())?)?;
            let report = state.scanner.scan().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Complete {
            schedule_id,
            water,
            notes,
        } => {
            let state = build_state(load_config(config_path.as_ref())?)?;
            let done = state.completion.complete(&schedule_id, water, notes).await?;
            println!(
                "✅ Logged {} L for schedule {}; next due {}",
                done.log.water_used,
                schedule_id,
                done.next_due.with_timezone(&state.config.scheduler.offset()).format("%Y-%m-%d %H:%M")
            );
        }
        Command::Schedules => {
            let state = build_state(load_config(config_path.as_ref())?)?;
            let offset = state.config.scheduler.offset();
            for view in state.db.list_schedules()? {
                let s = &view.schedule;
                println!(
                    "{}  {:<16} {:<12} every {}d @ {}  {} min  next {}{}",
                    s.id,
                    view.farm_name,
                    view.crop_name,
                    s.frequency_days,
                    s.time_of_day.format("%H:%M"),
                    s.duration_minutes,
                    s.next_due.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
                    if s.active { "" } else { "  (paused)" }
                );
            }
        }
        Command::Notifications { unread } => {
            let state = build_state(load_config(config_path.as_ref())?)?;
            let center = state.notifications();
            for n in center.list().iter().filter(|n| !unread || !n.read) {
                println!(
                    "{} [{}] {:?} {}: {}",
                    if n.read { " " } else { "●" },
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.priority,
                    n.title,
                    n.message
                );
            }
            println!("{} unread", center.unread_count());
        }
    }

    Ok(())
}
