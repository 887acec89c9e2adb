use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::info;

mod config;
mod device;
mod driver;
mod manager;
mod messages;
mod mqtt;
mod pushover;
mod store;

/// Pushover notification driver for the Ninja Blocks hub platform.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the state file path from the configuration
    #[arg(long)]
    state: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    logger.parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    logger.init();

    let args = Args::parse();

    let config_contents = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading {:?}", args.config))?;
    let config: config::AppConfig = toml::de::from_str(&config_contents)?;

    let store = store::ConfigStore::new(args.state.unwrap_or_else(|| config.state_path()));
    let state = store.load().await?;
    info!(
        "Loaded state from {:?} (configured: {})",
        store.path(),
        state.credentials.is_some()
    );

    let api = pushover::PushoverApi::new(&config.pushover())?;
    let driver = driver::Driver::new(state, store, api);

    let (mqtt_client, eventloop) = mqtt::MqttClient::new(&config.mqtt);

    let core = manager::Manager::new(driver, mqtt_client);
    core.run_loop(eventloop).await?;

    Ok(())
}
