use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use staggd::Config;
use staggd::Engine;
use staggd::KettleConfig;
use staggd::TemperatureUnit;
use staggd::config::LoggingConfig;
use staggd::integrations::stagg;
use staggd::integrations::stagg::BtleplugConnector;
use staggd::integrations::stagg::ClientOptions;
use staggd::integrations::stagg::KettleClient;
use staggd::integrations::stagg::KettleConnector;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "staggd", version, about = "Fellow Stagg EKG+ kettle daemon")]
struct Cli {
    /// Configuration file; repeat to merge several
    #[arg(short, long = "config", default_value = "staggd.toml")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// List kettles advertising nearby
    Scan {
        /// Seconds to scan for; defaults to bluetooth.scan_timeout
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print a config entry for a kettle by MAC address
    Add {
        address: String,
        /// Device name
        #[arg(long)]
        name: Option<String>,
    },
    /// Poll a kettle once and print what it reports
    State { address: String },
    /// Switch a kettle's heater
    Power { address: String, state: PowerState },
    /// Set a kettle's target temperature
    Temp {
        address: String,
        value: f64,
        /// Interpret the value in Celsius instead of the configured unit
        #[arg(long)]
        celsius: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerState {
    On,
    Off,
}

fn load_config(paths: &[PathBuf], required: bool) -> anyhow::Result<Config> {
    if !required && paths.iter().all(|p| !p.exists()) {
        return Ok(Config::default());
    }

    let (config, diagnostics) = Config::from_files(paths)?;
    if !diagnostics.is_empty() {
        eprint!("{}", staggd::format_diagnostics(&diagnostics));
    }
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) {
    let filter = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Client for a one-off command, using the kettle's configured options if any
fn one_shot_client(config: &Config, address: &str) -> anyhow::Result<(KettleClient, KettleConfig)> {
    let address = stagg::parse_address(address)?;
    let kettle = config
        .kettles
        .values()
        .find(|k| k.address == address)
        .cloned()
        .unwrap_or_else(|| KettleConfig::new(address));

    let connector: Arc<dyn KettleConnector> =
        Arc::new(BtleplugConnector::new(config.bluetooth.adapter));
    let client = KettleClient::new(address, connector, ClientOptions::from(&kettle));
    Ok((client, kettle))
}

async fn scan(config: &Config, timeout: Option<u64>) -> anyhow::Result<()> {
    let duration = timeout
        .map(Duration::from_secs)
        .unwrap_or(config.bluetooth.scan_timeout);
    let connector = BtleplugConnector::new(config.bluetooth.adapter);

    info!("Scanning for {:?}", duration);
    let found = connector.scan(duration).await?;
    if found.is_empty() {
        println!("No kettles found");
    }

    for ad in found {
        let configured = config
            .kettles
            .iter()
            .find(|(_, k)| k.address == ad.address)
            .map(|(id, _)| format!(" (configured as '{}')", id))
            .unwrap_or_default();
        println!(
            "{}  {:<16} {:>5}{}",
            ad.address,
            ad.name.as_deref().unwrap_or("-"),
            ad.rssi.map(|r| format!("{r}dBm")).unwrap_or_default(),
            configured,
        );
    }
    Ok(())
}

async fn run(mut config: Config) -> anyhow::Result<()> {
    info!("staggd starting");

    if config.bluetooth.auto_discover {
        let connector = BtleplugConnector::new(config.bluetooth.adapter);
        match stagg::auto_discover(&connector, &mut config).await {
            Ok(added) => {
                for id in added {
                    info!("Discovered kettle '{}'", id);
                }
            }
            Err(e) => warn!("Kettle discovery failed: {}", e),
        }
    }

    let engine = Arc::new(Engine::new());
    let count = engine.register_integrations_from_config(&config);
    if count == 0 {
        warn!("No kettles configured");
    }

    let runner = engine.clone();
    let engine_task = tokio::spawn(async move { runner.run().await });

    let api = config.api.clone().map(|api| {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(staggd::api::serve(
            engine.clone(),
            api.listen,
            api.port,
            shutdown_rx,
        ));
        (shutdown_tx, handle)
    });

    info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some((shutdown_tx, handle)) = api {
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("API server failed: {:#}", e),
            Err(e) => error!("API server task failed: {}", e),
        }
    }

    engine.shutdown().await;
    engine_task.abort();

    info!("staggd shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let required = matches!(command, Command::Run | Command::CheckConfig);
    let config = load_config(&cli.config, required).context("Failed to load configuration")?;
    init_logging(&config.logging);

    match command {
        Command::Run => run(config).await,
        Command::CheckConfig => {
            println!(
                "Configuration OK: {} kettle(s), API {}",
                config.kettles.len(),
                config
                    .api
                    .as_ref()
                    .map(|a| format!("on {}:{}", a.listen, a.port))
                    .unwrap_or_else(|| "disabled".to_string())
            );
            Ok(())
        }
        Command::Scan { timeout } => scan(&config, timeout).await,
        Command::Add { address, name } => {
            let configured: HashSet<_> = config.kettles.values().map(|k| k.address).collect();
            let address = stagg::manual_entry(&address, &configured)?;
            println!("# {}", stagg::entry_title(address));
            println!("[kettles.{}]", stagg::entry_id(address));
            println!("address = \"{}\"", address);
            if let Some(name) = name {
                println!("name = {}", toml::Value::String(name));
            }
            Ok(())
        }
        Command::State { address } => {
            let (client, _) = one_shot_client(&config, &address)?;
            let report = client.poll().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Power { address, state } => {
            let (client, _) = one_shot_client(&config, &address)?;
            client.set_power(matches!(state, PowerState::On)).await?;
            Ok(())
        }
        Command::Temp {
            address,
            value,
            celsius,
        } => {
            let (client, kettle) = one_shot_client(&config, &address)?;
            let unit = if celsius {
                TemperatureUnit::Celsius
            } else {
                kettle.units
            };
            let set = client.set_temperature(value, unit).await?;
            println!("Target set to {}{}", set, unit.symbol());
            Ok(())
        }
    }
}
