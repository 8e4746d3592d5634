// inkstage/src/main.rs

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug inkstage run ... pour voir les détails
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            project_dir,
            dry_run,
        } => commands::run::execute(project_dir, dry_run).await,
        Commands::Validate { project_dir } => commands::validate::execute(project_dir),
        Commands::Query { query, project_dir } => {
            commands::query::execute(query, project_dir).await
        }
    }
}
