//! # `defi_loader`: DeFi Dataset Loader
//!
//! Drives the status-gated fetch orchestration against a task-based backend
//! and prints what happened as JSON on stdout.
//!
//! ## Usage
//!
//! ```bash
//! defi_loader [OPTIONS] <COMMAND>
//!
//! # Example: Load the overview for Aave and Compound users
//! defi_loader --modules aave,compound overview
//!
//! # Example: Lending balances and, with premium, lending history
//! defi_loader --premium true --modules aave,makerdao_dsr lending
//!
//! # Example: Rebuild Aave history on the backend
//! defi_loader --premium true --modules aave reset-history aave
//! ```
//!
//! Settings come from defaults, then the JSON file named by `--config-path`
//! (default `defi_loader.conf`), then `DEFI_*` environment variables (a `.env`
//! file is honoured) and finally command-line arguments.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use anyhow::Result;
use clap::Parser;

mod loader_logic;
use loader_logic::{app, config, logger};

#[derive(Parser, Debug)]
#[command(about = "Loads DeFi balances and history from a task-based backend", version)]
struct Cli {
    #[command(flatten)]
    config: config::Config,

    #[command(subcommand)]
    command: app::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = config::load_config(cli.config)?;
    let _guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let loader = app::Loader::connect(&settings)?;
    let report = loader.execute(cli.command).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
