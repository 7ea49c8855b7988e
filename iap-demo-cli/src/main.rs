//! In-app purchase demo CLI
//!
//! Drives the purchase coordinator against the in-process sandbox store,
//! behaving like either Play Billing or StoreKit.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use iap_lib::{Platform, PlayBilling, StoreKit};

mod commands;
mod ui;

use commands::buy::UserAction;
use commands::DemoConfig;

#[derive(Parser)]
#[command(name = "iap-demo")]
#[command(about = "In-app purchase demo CLI - exercise the purchase lifecycle against a sandbox store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store to simulate
    #[arg(short, long, global = true, value_enum, default_value = "play")]
    platform: PlatformArg,

    /// JSON file with manager settings, catalog and owned purchases
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlatformArg {
    /// Google Play Billing
    Play,
    /// Apple StoreKit
    Storekit,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up products
    Catalog {
        /// Product ids (default: the whole catalog)
        ids: Vec<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Buy a product
    Buy {
        /// Product id
        product_id: String,

        /// Back out of the purchase flow
        #[arg(long, conflicts_with = "defer")]
        cancel: bool,

        /// Ask for approval instead of paying
        #[arg(long)]
        defer: bool,

        /// Consume the purchase afterwards
        #[arg(long)]
        consume: bool,
    },

    /// List owned purchases without finalizing them
    Owned {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore and finalize prior purchases
    Restore,

    /// Walk through connect, lookup, purchase, acknowledge, consume, restore
    Scenario {
        /// Product to buy
        #[arg(default_value = "coins_100")]
        product_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("iap_demo=debug,iap_lib=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("iap_demo=info,iap_lib=warn")
            .init();
    }

    let config = DemoConfig::load(cli.config.as_deref())?;

    let result = match cli.platform {
        PlatformArg::Play => dispatch::<PlayBilling>(cli.command, &config).await,
        PlatformArg::Storekit => dispatch::<StoreKit>(cli.command, &config).await,
    };
    if let Err(e) = result {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch<P: Platform>(command: Commands, config: &DemoConfig) -> Result<()> {
    match command {
        Commands::Catalog { ids, json } => {
            commands::catalog::run::<P>(config, ids, json).await?;
        }
        Commands::Buy {
            product_id,
            cancel,
            defer,
            consume,
        } => {
            let action = if cancel {
                UserAction::Cancel
            } else if defer {
                UserAction::Defer
            } else {
                UserAction::Complete
            };
            commands::buy::run::<P>(config, &product_id, action, consume).await?;
        }
        Commands::Owned { json } => {
            commands::owned::run::<P>(config, json).await?;
        }
        Commands::Restore => {
            commands::restore::run::<P>(config).await?;
        }
        Commands::Scenario { product_id } => {
            commands::scenario::run::<P>(config, &product_id).await?;
        }
    }
    Ok(())
}
