// Insight Sync - command line entry point

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use insight_sync::services::streaming::{StreamAbort, StreamObserver, StreamState};
use insight_sync::storage::ConfigService;
use insight_sync::{AppState, InsightKind, RefreshOptions};
use insight_sync_core::{PeriodKey, Scope, ScopeFilter};

#[derive(Parser)]
#[command(name = "insight-sync")]
#[command(about = "Chat with derived wellbeing insights kept in sync across contexts", long_about = None)]
struct Cli {
    /// User the commands act for
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one chat message and stream the reply
    Chat {
        message: String,
        /// Skip waiting for the background analyses
        #[arg(long)]
        no_wait: bool,
    },
    /// Read an insight through the cache
    Insight {
        kind: InsightKind,
        /// Period key (defaults to the kind's period for today)
        #[arg(long)]
        period: Option<String>,
    },
    /// Recompute an insight
    Refresh {
        kind: InsightKind,
        #[arg(long)]
        period: Option<String>,
        /// Recompute even when a fresh value is cached
        #[arg(long)]
        force: bool,
    },
    /// Mood balance over the last N days
    Balance {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Print invalidation events until interrupted
    Watch,
}

/// Prints fragments to stdout as they are revealed.
struct StdoutObserver;

impl StreamObserver for StdoutObserver {
    fn on_fragment(&self, text: &str) {
        let mut out = std::io::stdout();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn on_complete(&self, _full_text: &str) {
        println!();
    }

    fn on_error(&self, message: &str) {
        eprintln!("\nerror: {}", message);
    }

    fn on_aborted(&self, reason: StreamAbort) {
        eprintln!("\naborted ({:?}), try again", reason);
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn scope_for(
    default_scope: Result<Scope, insight_sync::AppError>,
    user: &str,
    period: Option<String>,
) -> Result<Scope> {
    match period {
        Some(raw) => Ok(Scope::new(user, PeriodKey::parse(&raw)?)?),
        None => Ok(default_scope?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let debug = ConfigService::new()
        .map(|c| c.get_config().debug_mode)
        .unwrap_or(false);
    init_tracing(debug);

    let state = AppState::new();
    state
        .initialize()
        .await
        .context("failed to initialize insight engine")?;
    let engine = state.engine().await?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Chat { message, no_wait } => {
            let turn = engine.stream_chat(user, &message, Arc::new(StdoutObserver))?;
            if no_wait {
                turn.wait().await;
            } else if let Some(outcomes) = turn.wait_analysis().await {
                for outcome in outcomes {
                    println!("{}", serde_json::to_string(&outcome)?);
                }
            } else if turn.session().state() != StreamState::Complete {
                std::process::exit(1);
            }
        }
        Commands::Insight { kind, period } => {
            let scope = scope_for(engine.scope_for_today(kind, user), user, period)?;
            let read = engine.read_insight(kind, &scope);
            println!("{}", serde_json::to_string_pretty(&read)?);
        }
        Commands::Refresh { kind, period, force } => {
            let scope = scope_for(engine.scope_for_today(kind, user), user, period)?;
            let outcome = engine
                .refresh_insight(kind, &scope, RefreshOptions { force })
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Balance { days } => {
            let balance = engine.mood_balance(user, days)?;
            println!("{}", serde_json::to_string_pretty(&balance)?);
        }
        Commands::Watch => {
            let cancel = CancellationToken::new();
            let watcher = engine.start_watcher(cancel.clone())?;
            let _subscription = engine.on_invalidated(ScopeFilter::user(user), |event| {
                if let Ok(line) = serde_json::to_string(event) {
                    println!("{}", line);
                }
            });
            tokio::signal::ctrl_c().await?;
            cancel.cancel();
            let _ = watcher.await;
        }
    }

    Ok(())
}
