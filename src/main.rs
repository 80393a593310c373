use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use gamedock::analytics::{compute_analytics, format_duration};
use gamedock::api::{self, ApiState};
use gamedock::catalog::CatalogClient;
use gamedock::clock::{Clock, SystemClock};
use gamedock::config::{
    default_data_dir, ServiceConfig, DATA_DIR_ENV, DEFAULT_BIND, DEFAULT_POLL_SECONDS,
};
use gamedock::paths::LaunchPolicy;
use gamedock::service::{recover_offline, ServiceBuilder};
use gamedock::settings::autostart_drift;
use gamedock::startup;
use gamedock::storage::{default_export_file_name, DocumentStore};
use tokio::{net::TcpListener, signal, sync::Notify};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GameDock library service", long_about = None)]
struct Cli {
    /// Directory holding gamedock.json and cached covers
    #[arg(long, global = true, env = DATA_DIR_ENV, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Liveness poll interval in seconds (1-60)
    #[arg(long, default_value_t = DEFAULT_POLL_SECONDS)]
    poll_seconds: u64,
    /// Address for the local JSON API
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: SocketAddr,
    /// Permit launching executables from network shares
    #[arg(long)]
    allow_network_paths: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            poll_seconds: DEFAULT_POLL_SECONDS,
            bind: SocketAddr::from(([127, 0, 0, 1], 47615)),
            allow_network_paths: false,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the library service and its API (default command)
    Serve(ServeArgs),
    /// Print a playtime summary to stdout
    Report,
    /// Write a sanitized backup of the library
    Export {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Replace the library with a backup file
    Import {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Credit sessions left open by a crashed run
    Recover,
    /// Register this executable to run on Windows login
    InstallStartup {
        #[arg(long, value_name = "EXE", default_value = "")]
        exe: String,
        #[arg(long, value_name = "ARGS", default_value = "")]
        args: String,
    },
    /// Remove the Windows startup registration
    UninstallStartup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(data_dir, args).await,
        Command::Report => run_report(&data_dir),
        Command::Export { path } => export(&data_dir, path),
        Command::Import { path } => import(&data_dir, &path),
        Command::Recover => recover(&data_dir),
        Command::InstallStartup { exe, args } => install_startup(exe, args),
        Command::UninstallStartup => startup::uninstall(),
    }
}

async fn serve(data_dir: PathBuf, args: ServeArgs) -> Result<()> {
    let config = ServiceConfig::new(data_dir)
        .with_poll_seconds(args.poll_seconds)
        .with_bind(args.bind)
        .with_launch_policy(LaunchPolicy {
            allow_network_paths: args.allow_network_paths,
        });
    let catalog = CatalogClient::from_env(config.network_timeout)?;
    let (library, service_task) = ServiceBuilder::from_config(&config)?.start();

    let shutdown = Arc::new(Notify::new());
    let app = api::router(ApiState {
        library: library.clone(),
        catalog,
        shutdown: shutdown.clone(),
    });
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!(
        "GameDock listening on http://{} (data: {})",
        config.bind,
        config.data_dir.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("API server crashed")?;

    if let Err(err) = library.shutdown().await {
        warn!("Library service did not shut down cleanly: {err}");
    }
    drop(library);
    service_task.await.context("Library service task failed")?;
    Ok(())
}

async fn wait_for_shutdown(requested: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = requested.notified() => {}
    }
    info!("Shutting down");
}

fn run_report(data_dir: &Path) -> Result<()> {
    let store = DocumentStore::new(data_dir)?;
    let document = store.load();
    if document.games.is_empty() {
        println!("No games in the library yet.");
        return Ok(());
    }
    if cfg!(windows) {
        match startup::registered_command() {
            Ok(registered) => {
                if let Some(drift) =
                    autostart_drift(document.settings.auto_start, registered.is_some())
                {
                    println!("Note: {drift}.\n");
                }
            }
            Err(err) => warn!("Could not read the login auto-start entry: {err:#}"),
        }
    }
    let analytics = compute_analytics(&document, Local::now());
    println!(
        "Library Summary\n\n{} games, {} total across {} recorded sessions",
        analytics.total_games,
        format_duration(analytics.total_minutes),
        analytics.total_sessions
    );
    println!(
        "Average session: {} | Median session: {}",
        format_duration(analytics.average_session_minutes.round() as u64),
        format_duration(analytics.median_session_minutes.round() as u64)
    );
    if let (Some(first), Some(last)) = (analytics.first_day, analytics.last_day) {
        println!("Span: {first} to {last}");
    }
    println!(
        "Last 7 days: {} | Last 30 days: {}",
        format_duration(analytics.minutes_last_7),
        format_duration(analytics.minutes_last_30)
    );
    println!("\nMost played:");
    for (idx, game) in analytics.top_games.iter().enumerate() {
        println!(
            " {}. {} - {} ({} launches)",
            idx + 1,
            game.name,
            format_duration(game.minutes),
            game.launch_count
        );
    }
    println!("\nTop play days:");
    for (idx, (day, minutes)) in analytics.top_days.iter().enumerate() {
        println!(" {}. {} - {}", idx + 1, day, format_duration(*minutes));
    }
    println!("\nRecent sessions:");
    for session in &analytics.recent_sessions {
        println!(
            " - {} | {} | {} ({:?})",
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.name,
            format_duration(session.duration_minutes),
            session.exit_reason
        );
    }
    Ok(())
}

fn export(data_dir: &Path, path: Option<PathBuf>) -> Result<()> {
    let store = DocumentStore::new(data_dir)?;
    let document = store.load();
    let target =
        path.unwrap_or_else(|| PathBuf::from(default_export_file_name(Local::now().date_naive())));
    store.export_to(&document, &target)?;
    println!("Exported {} games to {}", document.games.len(), target.display());
    Ok(())
}

fn import(data_dir: &Path, source: &Path) -> Result<()> {
    let store = DocumentStore::new(data_dir)?;
    let current = store.load();
    let mut document = store.import_from(source)?;
    document.settings.active_sessions = current.settings.active_sessions;
    store.try_save(&document)?;
    println!("Imported {} games from {}", document.games.len(), source.display());
    Ok(())
}

fn recover(data_dir: &Path) -> Result<()> {
    let store = DocumentStore::new(data_dir)?;
    let recovered = recover_offline(&store, SystemClock.now_ms())?;
    if recovered.is_empty() {
        println!("No open sessions to recover.");
    } else {
        for session in &recovered {
            println!(
                "Recovered game {}: {}",
                session.game_id,
                format_duration(session.entry.duration_minutes)
            );
        }
    }
    Ok(())
}

fn install_startup(exe: String, args: String) -> Result<()> {
    let exe_path = if exe.trim().is_empty() {
        std::env::current_exe().context("Unable to resolve launcher executable")?
    } else {
        PathBuf::from(exe)
    };
    startup::install(&exe_path, args.trim())
}
