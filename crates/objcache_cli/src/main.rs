//! objcache CLI
//!
//! Command-line tools for objcache.
//!
//! # Commands
//!
//! - `simulate` - Run an in-process authority with polling sessions and
//!   report fetch statistics
//! - `shape` - Print the query-shape key of a JSON filter

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// objcache command-line tools.
#[derive(Parser)]
#[command(name = "objcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate sessions polling an authority and report fetch statistics
    Simulate {
        /// Number of polling sessions
        #[arg(short, long, default_value = "3")]
        sessions: usize,

        /// Number of polling rounds
        #[arg(short, long, default_value = "5")]
        rounds: usize,

        /// Number of seeded rows
        #[arg(long, default_value = "200")]
        rows: usize,

        /// Number of distinct teams (one query shape each)
        #[arg(short, long, default_value = "4")]
        teams: usize,

        /// Rows updated between rounds
        #[arg(short, long, default_value = "5")]
        writes: usize,

        /// Query-shape memo capacity on the authority
        #[arg(long, default_value = "100")]
        memo_capacity: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the query-shape key of a JSON filter
    Shape {
        /// Filter as a JSON object, e.g. '{"team": "red"}'
        filter: String,

        /// Also print the canonical CBOR encoding in hex
        #[arg(long)]
        cbor: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            sessions,
            rounds,
            rows,
            teams,
            writes,
            memo_capacity,
            format,
        } => {
            let plan = commands::simulate::Plan {
                sessions,
                rounds,
                rows,
                teams,
                writes,
                memo_capacity,
            };
            commands::simulate::run(&plan, &format)?;
        }
        Commands::Shape {
            filter,
            cbor,
            format,
        } => {
            commands::shape::run(&filter, cbor, &format)?;
        }
        Commands::Version => {
            println!("objcache CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
