//! TideSync CLI
//!
//! Command-line tools for inspecting sync schemas and node stores.
//!
//! # Commands
//!
//! - `order` - Show creation and deletion order of a schema
//! - `plan` - Show the nested export/import plan of a model
//! - `cursors` - Show per-channel cursors, queued deletions and dirty roots

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TideSync command-line tools.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the schema file (`{ "models": [...] }`)
    #[arg(global = true, short, long)]
    schema: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show creation and deletion order
    Order,

    /// Show the association plan of a model (all channels if omitted)
    Plan {
        /// Model name
        model: Option<String>,
    },

    /// Show sync progress of a node store
    Cursors {
        /// Path to the node's store log
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Order => {
            let schema = cli.schema.ok_or("Schema path required for order")?;
            let registry = commands::schema::load(&schema)?;
            commands::order::run(&registry, &cli.format)?;
        }
        Commands::Plan { model } => {
            let schema = cli.schema.ok_or("Schema path required for plan")?;
            let registry = commands::schema::load(&schema)?;
            commands::plan::run(&registry, model.as_deref(), &cli.format)?;
        }
        Commands::Cursors { path } => {
            let schema = cli.schema.ok_or("Schema path required for cursors")?;
            let registry = commands::schema::load(&schema)?;
            commands::cursors::run(&path, &registry, &cli.format)?;
        }
        Commands::Version => {
            println!("TideSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
