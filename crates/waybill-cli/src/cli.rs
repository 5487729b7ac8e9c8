use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "waybill",
    about = "Encrypted local ledger for shipment records",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Settings file (TOML, or JSON when the name ends in `.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt and store a shipment record, then publish it to the content store.
    Record(RecordArgs),
    /// Decrypt and print a stored record.
    Show {
        /// Storage key the record was written under.
        key: String,
    },
    /// Run an encrypted round-trip against the configured store.
    Health,
    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RecordArgs {
    /// Storage key; defaults to `shipment/<uuid>`.
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub product_id: String,
    #[arg(long)]
    pub location: String,
    #[arg(long)]
    pub owner: String,
    /// RFC 3339 timestamp; defaults to now.
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a config file with a fresh encryption key if one does not exist.
    Init,
}
