mod cli;
mod config;
mod pipeline;
mod storage;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;
use waybill_core::{record::ShipmentRecord, settings::Settings, storage::RecordStore};
use waybill_storage::{cipher::KeyMaterial, sealed_store::SealedStore};

use crate::cli::{Command, ConfigCommand, RecordArgs};
use crate::pipeline::Pipeline;

/// Entry point. Errors propagate out of `main`, so color-eyre reports them and
/// the process exits with a failure status.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(cli.config)?,
        Command::Record(args) => run_record(&load_settings(cli.config)?, args).await?,
        Command::Show { key } => run_show(&load_settings(cli.config)?, &key)?,
        Command::Health => run_health_check(&load_settings(cli.config)?)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("waybill {}", env!("CARGO_PKG_VERSION"));
}

fn load_settings(explicit: Option<PathBuf>) -> Result<Settings> {
    let path = config::resolve_path(explicit)?;
    info!(path = %path.display(), "loading settings");
    Ok(config::load_settings(&path)?)
}

fn init_config(explicit: Option<PathBuf>) -> Result<()> {
    let path = config::resolve_path(explicit)?;
    let key = KeyMaterial::generate()?;
    let path = config::write_template_if_missing(&path, &config::default_db_path()?, &key.encode())?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_record(settings: &Settings, args: RecordArgs) -> Result<()> {
    let key = args
        .key
        .unwrap_or_else(|| format!("shipment/{}", Uuid::new_v4()));
    let record = match args.timestamp {
        Some(ts) => ShipmentRecord::new(args.product_id, ts, args.location, args.owner),
        None => ShipmentRecord::now(args.product_id, args.location, args.owner),
    };

    let mut pipeline = Pipeline::from_settings(settings)?;
    pipeline.record(&key, record).await?;
    let published = pipeline.finish().await?;
    println!("Stored {key} ({published} publication task(s) completed)");
    Ok(())
}

fn run_show(settings: &Settings, key: &str) -> Result<()> {
    let store = storage::existing_store_from_settings(settings)?;
    let loaded = storage::load_record(&store, key);
    store.close()?;
    println!("{}", serde_json::to_string_pretty(&loaded?)?);
    Ok(())
}

/// Runs a quick encrypted round-trip against the configured store.
fn run_health_check(settings: &Settings) -> Result<()> {
    let store = storage::existing_store_from_settings(settings)?;
    let checked = run_store_health(&store).and_then(|()| Ok(store.store().len()?));
    store.close()?;
    println!("Storage: ok ({} records)", checked?);
    Ok(())
}

fn run_store_health<S: RecordStore>(store: &SealedStore<S>) -> Result<()> {
    let health_key = "health/check";
    let payload = b"ok";
    store.seal_and_put(health_key, payload)?;
    let round_trip = store.get_and_open(health_key)?;

    if round_trip != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}
