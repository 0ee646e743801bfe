//! Cart Sync CLI - inspect and edit a live cart through the sync engine.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart
//! cartctl show
//!
//! # Add two units of a variant
//! cartctl add --product 64f1c2 --sku TEE-BLK-XL --quantity 2
//!
//! # Set a line's quantity (clamped to cached stock, then committed)
//! cartctl set 65a0d9 3
//!
//! # Merge the persisted guest cart after signing in
//! CART_API_TOKEN=... cartctl merge
//! ```
//!
//! # Commands
//!
//! - `show` - Fetch and print the cart
//! - `add` / `set` / `remove` / `clear` - Cart mutations
//! - `merge` - Merge a guest cart into the signed-in cart
//! - `validate` - Validate every line against stock
//! - `stock` - Re-check stock for one line
//!
//! Configuration comes from the environment (see `cart_sync::config`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "cartctl")]
#[command(author, version, about = "Cart sync CLI")]
struct Cli {
    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the cart
    Show,
    /// Add a product variant
    Add {
        /// Product ID
        #[arg(short, long)]
        product: String,

        /// Variant SKU
        #[arg(short, long)]
        sku: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set a line's quantity
    Set {
        /// Cart line ID
        line: String,

        /// New quantity (0 removes the line)
        quantity: u32,
    },
    /// Remove a line
    Remove {
        /// Cart line ID
        line: String,
    },
    /// Remove every line
    Clear,
    /// Merge a guest cart into the signed-in cart
    Merge {
        /// Guest session ID (defaults to the persisted one)
        #[arg(short, long)]
        guest_id: Option<String>,
    },
    /// Validate every line against stock
    Validate,
    /// Re-check stock for one line
    Stock {
        /// Cart line ID
        line: String,
    },
}

#[tokio::main]
async fn main() {
    let config = match cart_sync::SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Configuration error: {e}");
            }
            std::process::exit(2);
        }
    };

    // Keep the guard alive for the life of the process.
    let _sentry = cart_sync::telemetry::init_sentry(&config);
    cart_sync::telemetry::init_tracing(cart_sync::telemetry::DEFAULT_FILTER);

    let cli = Cli::parse();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &cart_sync::SyncConfig) -> Result<(), commands::CommandError> {
    let output = commands::Output { json: cli.json };
    match cli.command {
        Commands::Show => commands::show(config, output).await,
        Commands::Add {
            product,
            sku,
            quantity,
        } => commands::add(config, output, &product, &sku, quantity).await,
        Commands::Set { line, quantity } => commands::set(config, output, &line, quantity).await,
        Commands::Remove { line } => commands::remove(config, output, &line).await,
        Commands::Clear => commands::clear(config, output).await,
        Commands::Merge { guest_id } => commands::merge(config, output, guest_id).await,
        Commands::Validate => commands::validate(config, output).await,
        Commands::Stock { line } => commands::stock(config, output, &line).await,
    }
}
