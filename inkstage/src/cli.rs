// inkstage/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "inkstage")]
#[command(about = "Validated, resumable staging loader for flat-file data", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🚀 Extracts, validates and stages every configured source
    Run {
        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        /// Stage into the in-memory store instead of the DuckDB database
        #[arg(long)]
        dry_run: bool,
    },

    /// 🧪 Runs the quality rules without staging anything
    Validate {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// ⚡ Executes a raw SQL query against the staging database
    Query {
        query: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}
