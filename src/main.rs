//! Binary entrypoint for the clampa CLI.
//!
//! Commands:
//! - `run [--peer <id>] [--name <name>]` - follow one sensor node and post its readings
//! - `browse [--timeout <s>]` - list nearby nodes whose name matches the filter
//! - `init` - write a starter `config.toml`
//! - `status` - print the effective configuration
//! - `decode <frame>` - decode a telemetry frame and print the payload that would be posted
//!
//! See the library crate docs for module-level details: `clampa::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::time::Duration;

use clampa::config::Config;
use clampa::location::GeoFix;
use clampa::monitor::runtime;
use clampa::radio::PeerIdentity;
use clampa::telemetry::{self, submission::SubmissionPayload, submission::SubmissionRecord};

#[derive(Parser)]
#[command(name = "clampa")]
#[command(about = "Bridge a BLE sensor node's telemetry to a web collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a sensor node and forward its readings
    Run {
        /// Peer identifier as reported by `browse`
        #[arg(short, long)]
        peer: Option<String>,
        /// Display name for the peer
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List nearby sensor nodes
    Browse {
        /// Seconds to scan before exiting (default: until Ctrl-C)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Write a default configuration file
    Init,
    /// Show the effective configuration
    Status,
    /// Decode a telemetry frame offline
    Decode {
        /// Frame text, e.g. "23,41,1200,-3,12,988"
        frame: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Run { peer, name } => {
            let config = load_config(pre_config, &cli.config).await?;
            let id = peer
                .or_else(|| config.radio.target_id.clone())
                .ok_or_else(|| {
                    anyhow!("No peer given: pass --peer or set radio.target_id (see `clampa browse`)")
                })?;
            let name = name.unwrap_or_else(|| config.radio.target_name.clone());
            info!("Starting clampa v{}", env!("CARGO_PKG_VERSION"));
            runtime::run_node(&config, PeerIdentity::new(id, name)).await?;
        }
        Commands::Browse { timeout } => {
            let config = load_config(pre_config, &cli.config).await?;
            println!("Scanning for '{}' (Ctrl-C to stop)...", config.radio.name_filter);
            let registry = runtime::browse(&config, timeout.map(Duration::from_secs)).await?;
            println!("{} matching peer(s) found.", registry.len());
        }
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!("Wrote {}. Set collector.base_url and radio.target_id before `clampa run`.", cli.config);
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            show_status(&config);
        }
        Commands::Decode { frame } => {
            let config = pre_config.unwrap_or_default();
            let peer = PeerIdentity::new(
                config.radio.target_id.clone().unwrap_or_default(),
                config.radio.target_name.clone(),
            );
            let reading = telemetry::decode(&peer, frame.as_bytes())
                .ok_or_else(|| anyhow!("frame is not valid text"))?;
            let fix = GeoFix {
                latitude: config.location.latitude.unwrap_or_default(),
                longitude: config.location.longitude.unwrap_or_default(),
            };
            let payload = SubmissionPayload::from(&SubmissionRecord { reading, fix });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }

    Ok(())
}

async fn load_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        None => Config::load(path).await,
    }
}

fn show_status(config: &Config) {
    println!("clampa v{}", env!("CARGO_PKG_VERSION"));
    println!("Collector:   {}", config.collector.url());
    println!("Timeout:     {}s", config.collector.timeout_seconds);
    println!("Name filter: {}", config.radio.name_filter);
    match &config.radio.target_id {
        Some(id) => println!("Target:      {} ({})", id, config.radio.target_name),
        None => println!("Target:      (none)"),
    }
    println!("Adapter:     #{}", config.radio.adapter_index);
    println!("Cached link: {}", config.radio.cached_connect);
    println!("Location:    {:?}", config.location.authorization);
    if let (Some(lat), Some(lon)) = (config.location.latitude, config.location.longitude) {
        println!("Position:    {:.5}, {:.5}", lat, lon);
    }
    println!(
        "Features:    ble={} http={}",
        cfg!(feature = "ble"),
        cfg!(feature = "http")
    );
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
