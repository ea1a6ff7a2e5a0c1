//! Callscope - live VoIP telemetry console
//!
//! Entry point: loads the config, starts the store thread, the web server,
//! the refresh loop and (when configured) the uplink to the telemetry
//! stream, then runs until Ctrl+C.

use anyhow::{bail, Context, Result};
use callscope::config::AppConfig;
use callscope_core::{AudioEngine, AudioSink};
use callscope_server::capture::CaptureClient;
use callscope_server::uplink::{run_uplink, UplinkConfig};
use callscope_server::{AppState, StoreHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Command-line overrides on top of the config file
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    uplink_url: Option<String>,
    control_url: Option<String>,
    port: Option<u16>,
    max_events: Option<usize>,
}

enum Command {
    Run(CliArgs),
    Help,
    Version,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callscope=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args[1..]) {
        Ok(Command::Run(cli)) => cli,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("callscope {} ({})", callscope::VERSION, callscope_core::BUILD_DATE);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    let config = resolve_config(&cli);
    info!(
        "Starting Callscope v{} on {}:{}",
        callscope::VERSION,
        config.bind_addr,
        config.port
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(run(config))
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut cli = CliArgs::default();
    let mut i = 0;

    while i < args.len() {
        let flag = args[i].as_str();
        let value = || -> Result<&String> {
            args.get(i + 1)
                .with_context(|| format!("{} requires a value", flag))
        };
        match flag {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-v" => return Ok(Command::Version),
            "--config" | "-c" => cli.config_path = Some(PathBuf::from(value()?)),
            "--uplink" | "-u" => cli.uplink_url = Some(value()?.clone()),
            "--control" => cli.control_url = Some(value()?.clone()),
            "--port" | "-p" => {
                let raw = value()?;
                cli.port = Some(raw.parse().with_context(|| format!("Invalid port: {}", raw))?);
            }
            "--max-events" => {
                let raw = value()?;
                let max: usize = raw
                    .parse()
                    .with_context(|| format!("Invalid event limit: {}", raw))?;
                if max == 0 {
                    bail!("--max-events must be at least 1");
                }
                cli.max_events = Some(max);
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 2;
    }

    Ok(Command::Run(cli))
}

fn print_help() {
    println!("Usage: callscope [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Config file (default: {})", AppConfig::path().display());
    println!("  -u, --uplink URL        Telemetry stream WebSocket, e.g. ws://10.0.0.5:11070/ws");
    println!("      --control URL       Upstream control API for capture toggling");
    println!("  -p, --port PORT         Web server port (default: 8930)");
    println!("      --max-events N      Event store capacity (default: 10000)");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Set RUST_LOG (e.g. RUST_LOG=callscope=debug) for more logging.");
}

fn resolve_config(cli: &CliArgs) -> AppConfig {
    let mut config = match &cli.config_path {
        Some(path) => AppConfig::load_or_default(path),
        None => AppConfig::load(),
    };
    if let Some(url) = &cli.uplink_url {
        config.uplink_url = Some(url.clone());
    }
    if let Some(url) = &cli.control_url {
        config.control_url = Some(url.clone());
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max) = cli.max_events {
        config.max_events = max;
    }
    config
}

#[cfg(feature = "playback")]
fn audio_sink() -> Arc<dyn AudioSink> {
    Arc::new(callscope_core::audio::sink::CpalSink::new())
}

#[cfg(not(feature = "playback"))]
fn audio_sink() -> Arc<dyn AudioSink> {
    Arc::new(callscope_core::SilentSink::new())
}

async fn run(config: AppConfig) -> Result<()> {
    let core = config.core_config();
    let store = StoreHandle::spawn(core.clone(), config.initial_controls());
    let audio = Arc::new(AudioEngine::new(audio_sink(), &core));
    info!(output = audio.sink_name(), "Audio output ready");

    let capture = match &config.control_url {
        Some(url) => match CaptureClient::new(url.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(url = %url, error = %e, "Capture control unavailable");
                None
            }
        },
        None => None,
    };

    let node_name = match &capture {
        Some(client) => match client.deployment().await {
            Ok(deployment) => {
                info!(
                    version = %deployment.version,
                    node = %deployment.node_name,
                    "Connected to upstream deployment"
                );
                Some(deployment.node_name).filter(|n| !n.is_empty())
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch upstream deployment info");
                None
            }
        },
        None => None,
    };

    let (uplink_tx, uplink_rx) = tokio::sync::watch::channel(false);
    let mut state = AppState::new(store.clone(), audio, config.server_config(), capture, uplink_rx);
    if let Some(name) = node_name {
        state.node_name = name;
    }

    match &config.uplink_url {
        Some(url) => {
            let uplink = UplinkConfig {
                url: url.clone(),
                reconnect_delay: config.reconnect_delay(),
            };
            tokio::spawn(run_uplink(uplink, store, uplink_tx));
        }
        None => warn!("No uplink configured; events arrive only through POST /api/v1/ingest"),
    }

    tokio::spawn(callscope_server::refresh_loop(state.clone()));

    // Set up Ctrl+C handler
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .context("Failed to install Ctrl+C handler")?;

    let shutdown = async move {
        let _ = stop_rx.changed().await;
        info!("Stopping...");
    };

    if let Err(e) = callscope_server::start_server(state, shutdown).await {
        error!("Web server error: {}", e);
        return Err(e);
    }
    info!("Done.");
    Ok(())
}
