//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "binary"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Control CLI for operators driving the file server dashboard engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use fsd_api::{HttpResourceApi, ResourceApi, StubResourceApi};
use fsd_common::{init_tracing, AppConfig, AuthMode};
use fsd_core::DashboardEngine;
use fsd_logging::{log_system_event, SystemEventOutcome};
use tokio::signal;
use tracing::info;

mod files;
mod render;
mod scenario;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "File server dashboard control utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        help = "Run against an in-memory server instead of the configured API"
    )]
    offline: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Authenticate and persist the session")]
    Login(LoginArgs),
    #[command(about = "End the current session")]
    Logout,
    #[command(about = "Refresh every domain once and print the dashboard")]
    Status,
    #[command(about = "Poll continuously, printing alerts and console lines")]
    Watch(WatchArgs),
    #[command(subcommand, about = "File listing, upload, download and delete")]
    Files(files::FilesCommand),
    #[command(subcommand, about = "Audit trail inspection")]
    Logs(files::LogsCommand),
    #[command(subcommand, about = "Synchronization demo scenarios")]
    Scenario(scenario::ScenarioCommand),
    #[command(about = "Print engine metrics in Prometheus text format")]
    Metrics,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long, short = 'u', value_name = "NAME")]
    username: String,

    /// Read from the terminal when neither the flag nor FSDASH_PASSWORD is set.
    #[arg(long, env = "FSDASH_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long, value_name = "SECS")]
    seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("fsdashctl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let command = cli.command.ok_or_else(|| anyhow!("no command given; see --help"))?;

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/fsdash.toml"));
    candidates.push(PathBuf::from("configs/fsdash.example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    // tables go to stdout; only the long-running watch mirrors events there
    config.logging.console = matches!(command, Commands::Watch(_));
    init_tracing("fsdashctl", &config.logging)?;
    if let Some(path) = &loaded.source {
        info!(config_path = %path.display(), "configuration loaded");
    }

    let api: Arc<dyn ResourceApi> = if cli.offline {
        config.api.auth = AuthMode::Disabled;
        config.session.store_path = None;
        Arc::new(StubResourceApi::new().without_auth())
    } else {
        Arc::new(
            HttpResourceApi::new(config.api.base_url.clone(), config.api.request_timeout)
                .context("failed to build API client")?,
        )
    };
    let engine = Arc::new(DashboardEngine::init(&config, api)?);

    let result = dispatch(&engine, command).await;
    engine.dispose().await;
    result
}

async fn dispatch(engine: &Arc<DashboardEngine>, command: Commands) -> Result<()> {
    match command {
        Commands::Login(args) => login(engine, args).await,
        Commands::Logout => {
            if engine.logout().await {
                println!("Logged out");
            } else {
                println!("No active session");
            }
            Ok(())
        }
        Commands::Status => {
            let failures = engine
                .refresh_now()
                .await
                .into_iter()
                .filter_map(|(domain, result)| result.err().map(|err| (domain, err)))
                .collect::<Vec<_>>();
            render::dashboard(&engine.view(), &engine.alerts());
            for (domain, err) in &failures {
                eprintln!("{domain}: {err}");
            }
            Ok(())
        }
        Commands::Watch(args) => watch(engine, args).await,
        Commands::Files(cmd) => files::run(engine, cmd).await,
        Commands::Logs(cmd) => files::run_logs(engine, cmd).await,
        Commands::Scenario(cmd) => scenario::run(engine, cmd).await,
        Commands::Metrics => match engine.metrics_text()? {
            Some(text) => {
                print!("{text}");
                Ok(())
            }
            None => Err(anyhow!("metrics are disabled; set metrics.enabled = true")),
        },
    }
}

async fn login(engine: &DashboardEngine, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };
    let session = engine.login(&args.username, &password).await?;
    log_system_event(
        None,
        "cli.login",
        &format!("session opened for {}", session.username),
        SystemEventOutcome::Success,
    );
    println!("Logged in as {}", session.username);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

async fn watch(engine: &DashboardEngine, args: WatchArgs) -> Result<()> {
    if !engine.is_polling() {
        engine.start_polling()?;
    }
    let mut console = engine.narrative().subscribe();
    let mut sessions = engine.subscribe_session();
    let mut summary = tokio::time::interval(Duration::from_secs(5));
    let deadline = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut seen_alerts = Vec::new();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = &mut deadline => break,
            line = console.recv() => {
                if let Ok(line) = line {
                    println!("{}", render::narrative_line(&line));
                }
            }
            event = sessions.recv() => {
                if let Ok(event) = event {
                    println!("session: {event:?}");
                    if !engine.is_polling() {
                        break;
                    }
                }
            }
            _ = summary.tick() => {
                let view = engine.view();
                println!("{}", render::summary_line(&view));
                let alerts = engine.alerts();
                for alert in alerts.iter().filter(|alert| !seen_alerts.contains(*alert)) {
                    println!("{}", render::alert_line(alert));
                }
                seen_alerts = alerts;
            }
        }
    }
    Ok(())
}
