//! Homie device - Main Entry Point

use clap::{Parser, Subcommand};
use homie_device::observability::{
    init_default_logging, init_logging, logging::parse_level, metrics, LogFormat,
};
use homie_device::{
    spawn_stats_reporter, BasicNode, Device, DeviceConfig, DeviceError, DeviceHandlers,
    MqttClient,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["homie-device.toml", "config/homie-device.toml"];

/// Homie convention device over MQTT
#[derive(Parser)]
#[command(name = "homie-device")]
#[command(about = "Announce a Homie device on an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); LOG_LEVEL wins when set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, announce the device and stay up until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the validated configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_observability(cli.verbose);

    info!("Starting homie-device v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        let fatal = e
            .downcast_ref::<DeviceError>()
            .is_some_and(DeviceError::is_fatal);
        process::exit(if fatal { 2 } else { 1 });
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    if verbose == 0 || std::env::var("LOG_LEVEL").is_ok() {
        init_default_logging();
        return;
    }

    let level = parse_level(if verbose == 1 { "DEBUG" } else { "TRACE" });
    let format =
        LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    init_logging(level, format, false);
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(&path)?);
        }
    }

    Err(
        "No configuration file found. Provide one with -c/--config or create homie-device.toml"
            .into(),
    )
}

fn handle_config_command(
    config: &DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(device = %config.device.name, "Configuration is valid");

    if show {
        let mut redacted = config.clone();
        if redacted.mqtt.password.is_some() {
            redacted.mqtt.password = Some("********".to_string());
        }
        println!("{}", toml::to_string_pretty(&redacted)?);
    }
    Ok(())
}

fn build_handlers() -> DeviceHandlers {
    DeviceHandlers::new()
        .on_connect(|device| {
            info!(device = %device.name(), "Device announced");
        })
        .on_connection_lost(|device, reason| {
            warn!(device = %device.name(), reason = %reason, "Broker session lost, reconnecting");
        })
        .on_broadcast(|device, level, payload| {
            info!(
                device = %device.name(),
                level = %level,
                payload = %String::from_utf8_lossy(payload),
                "Broadcast"
            );
        })
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stats_interval = Duration::from_secs(config.device.stats_interval_secs);
    let device = Device::new(config.clone(), build_handlers(), Arc::new(MqttClient::new()))?;

    for node_config in &config.nodes {
        device.add_node(Arc::new(BasicNode::from_config(node_config)?))?;
    }
    info!(device = %device.name(), nodes = ?device.node_names(), "Device configured");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal_name) => info!("Received {}, shutting down gracefully...", signal_name),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let reporter = spawn_stats_reporter(device.clone(), stats_interval);
    let result = device.run(shutdown_rx).await;
    reporter.abort();

    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => warn!("Could not serialize metrics: {}", e),
    }

    result.map_err(Into::into)
}

async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}
