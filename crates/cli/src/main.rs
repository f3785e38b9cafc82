mod bootstrap;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use kolbridge_config::Settings;

#[derive(Parser)]
#[command(name = "kolbridge", about = "Chat relay bridge between Kingdom of Loathing and Discord")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the bridge configuration file.
    #[arg(
        long,
        global = true,
        env = "KOLBRIDGE_CONFIG",
        default_value = "kolbridge.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge (default when no subcommand is provided).
    Run,
    /// Load the configuration, report problems, and exit.
    CheckConfig,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// The bridge runs unattended; a panic anywhere is appended to error.log
/// before the default hook takes over.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let unix_seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let entry = format!("[{unix_seconds}] panic: {info}\n\n");
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("error.log")
            .and_then(|mut file| std::io::Write::write_all(&mut file, entry.as_bytes()));
        default_hook(info);
    }));
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load(path)?;
    for diagnostic in &settings.diagnostics {
        warn!("{diagnostic}");
    }
    if !settings.diagnostics.is_empty() {
        anyhow::bail!(
            "{} configuration problem(s) found",
            settings.diagnostics.len()
        );
    }
    info!(
        accounts = settings.accounts.len(),
        channels = settings.identities.len(),
        "configuration OK"
    );
    Ok(())
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load(path)?;
    for diagnostic in &settings.diagnostics {
        warn!("{diagnostic}");
    }

    let bridge = bootstrap::build(&settings)?;
    bootstrap::start(&bridge).await?;

    info!("bridge running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);
    install_panic_hook();

    info!(version = env!("CARGO_PKG_VERSION"), "kolbridge starting");

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&cli.config),
        None | Some(Commands::Run) => run(&cli.config).await,
    }
}
