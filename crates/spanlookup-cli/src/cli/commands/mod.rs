//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod helpers;
mod mapfile;
mod run;
mod store;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spanlookup")]
#[command(about = "Enrich document annotations from SQL databases and map files")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run a lookup pipeline over JSON documents
    Run {
        /// Pipeline file (TOML) listing the lookups to apply
        #[arg(short, long, env = "SPANLOOKUP_PIPELINE")]
        pipeline: PathBuf,
        /// Documents to process
        #[arg(required = true)]
        documents: Vec<PathBuf>,
        /// Write results here instead of overwriting the inputs
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Number of parallel pipeline duplicates
        #[arg(short, long, default_value = "1")]
        duplicates: usize,
    },

    /// Build and inspect map files
    Mapfile {
        #[command(subcommand)]
        command: MapfileCommands,
    },

    /// Read and write a string store table
    Store {
        #[command(flatten)]
        target: StoreTarget,
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum MapfileCommands {
    /// Import JSON lines of {"key": ..., "value": ...} into a map
    Import {
        /// Map file to create or extend
        file: PathBuf,
        /// JSON lines input ("-" for stdin)
        input: PathBuf,
        /// Name of the map inside the file
        #[arg(short, long, default_value = "map")]
        map: String,
        /// Values are plain JSON rather than tagged feature values
        #[arg(long)]
        plain: bool,
    },

    /// Print the value stored for a key
    Get {
        file: PathBuf,
        key: String,
        #[arg(short, long, default_value = "map")]
        map: String,
        /// Print the tagged JSON form instead of the display form
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct StoreTarget {
    /// Database URL (sqlite:path or a bare path)
    #[arg(long, env = "SPANLOOKUP_STORE_URL")]
    db: String,
    #[arg(long, default_value = "string_store")]
    table: String,
    #[arg(long, default_value = "key")]
    key_column: String,
    /// Value column, or an SQL expression over the row
    #[arg(long, default_value = "value")]
    value_column: String,
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Print the value for a key
    Get { key: String },
    /// Exit successfully if the key is present
    Contains { key: String },
    /// Set the value for a key
    Put { key: String, value: String },
    /// Remove one or more keys
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            documents,
            out_dir,
            duplicates,
        } => run::cmd_run(&pipeline, documents, out_dir, duplicates).await,
        Commands::Mapfile { command } => match command {
            MapfileCommands::Import {
                file,
                input,
                map,
                plain,
            } => mapfile::cmd_import(&file, &input, &map, plain),
            MapfileCommands::Get {
                file,
                key,
                map,
                json,
            } => mapfile::cmd_get(&file, &map, &key, json),
        },
        Commands::Store { target, command } => match command {
            StoreCommands::Get { key } => store::cmd_get(&target, &key),
            StoreCommands::Contains { key } => store::cmd_contains(&target, &key),
            StoreCommands::Put { key, value } => store::cmd_put(&target, &key, &value),
            StoreCommands::Remove { keys } => store::cmd_remove(&target, &keys),
        },
    }
}
