//! lamco-display-config - Monitor configuration tool
//!
//! Entry point for the command-line binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use lamco_display_config::config::Config;
use lamco_display_config::multimon::{
    assign, Assignment, ConfigStore, Configuration, MonitorManager, Resources, SimulatedBackend,
};

/// Command-line arguments for lamco-display-config
#[derive(Parser, Debug)]
#[command(name = "lamco-display-config")]
#[command(version, about = "Monitor configuration policy for Linux display servers", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "/etc/lamco-display-config/config.toml")]
    pub config: PathBuf,

    /// Stored layouts file (overrides [store] user_path)
    #[arg(long, global = true, env = "LAMCO_MONITORS_FILE")]
    pub store: Option<PathBuf>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stderr)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a stored layouts file and list its configurations
    Check {
        /// File to parse
        file: PathBuf,
    },

    /// Pick a configuration for the given hardware and print it
    Plan {
        /// JSON resource snapshot (modes, crtcs, outputs)
        #[arg(long)]
        resources: PathBuf,

        /// Plan as if the laptop lid were closed
        #[arg(long)]
        lid_closed: bool,
    },
}

#[derive(Serialize)]
struct Plan<'a> {
    configuration: &'a Configuration,
    assignment: Assignment,
    for_lid: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config).or_else(|e| {
        if args.config.exists() {
            return Err(e);
        }
        Ok(Config::default_config())
    });
    let config = match config {
        Ok(config) => config.with_overrides(args.store.clone(), None),
        Err(e) => {
            eprintln!("{}", lamco_display_config::utils::format_user_error(&e));
            return Err(e);
        }
    };

    // Worker guard must live until exit so buffered file logs are flushed
    let _guard = init_logging(&args, &config)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-display-config v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("════════════════════════════════════════════════════════");
    debug!("Config: {:?}", config);

    let result = match &args.command {
        Command::Check { file } => check(file),
        Command::Plan { resources, lid_closed } => plan(&config, resources, *lid_closed).await,
    };

    if let Err(e) = &result {
        eprintln!("{}", lamco_display_config::utils::format_user_error(e));
    }
    result
}

fn check(file: &Path) -> Result<()> {
    let configs = ConfigStore::read_file(file).with_context(|| format!("Failed to check {}", file.display()))?;

    info!("{} parses cleanly", file.display());
    println!("{}", serde_json::to_string_pretty(&configs)?);
    Ok(())
}

async fn plan(config: &Config, resources_path: &Path, lid_closed: bool) -> Result<()> {
    let content = std::fs::read_to_string(resources_path)
        .with_context(|| format!("Failed to read resources file: {}", resources_path.display()))?;
    let resources: Resources = serde_json::from_str(&content).context("Failed to parse resources file")?;

    let mut store = ConfigStore::new(config.user_store_path());
    if store.load(&config.store_paths()).is_none() {
        warn!("Planning without stored configurations");
    }

    let mut manager = MonitorManager::new(SimulatedBackend::new(resources), store, config.to_multimon_config());
    if lid_closed {
        manager.handle_lid(true).context("Failed to apply lid state")?;
    }
    manager.ensure_configuration().context("Failed to configure monitors")?;

    let Some(current) = manager.current() else {
        println!("null");
        return Ok(());
    };

    let assignment = assign(current, manager.resources()).context("Failed to assign CRTCs")?;
    let plan = Plan {
        configuration: current,
        assignment,
        for_lid: manager.current_is_for_lid(),
    };

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn init_logging(args: &Args, config: &Config) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use std::fs::File;

    let log_level = match args.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("lamco={level},warn", level = log_level))
    });

    let stderr_layer = match args.log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed(),
        "compact" => tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr).boxed(),
        _ => tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
    };

    let file_layer = match &args.log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).boxed())
        }
        None => None,
    };

    let (dir_layer, guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lamco-display-config.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(dir_layer)
        .init();

    if let Some(path) = &args.log_file {
        info!("Logging to file: {}", path.display());
    }

    Ok(guard)
}
