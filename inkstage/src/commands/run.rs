// inkstage/src/commands/run.rs
//
// USE CASE: Run the staging pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use inkstage_core::application::run_pipeline;
use inkstage_core::infrastructure::adapters::MemoryBackend;
use inkstage_core::ports::StoreBackend;

use super::{duckdb_backend, load_config, open_pool};

pub async fn execute(project_dir: PathBuf, dry_run: bool) -> anyhow::Result<()> {
    let start = std::time::Instant::now();

    // A. Config
    let config = load_config(&project_dir)?;

    // B. Store
    let backend: Arc<dyn StoreBackend> = if dry_run {
        println!("   Store: in-memory (dry run) 🧪");
        Arc::new(MemoryBackend::new())
    } else {
        println!("   Store: DuckDB 🦆 ({})", config.database);
        duckdb_backend(&project_dir, &config)?
    };
    let pool = open_pool(backend, &config).await?;

    // C. Ctrl-C stops the load at the next commit boundary
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next commit");
            on_signal.cancel();
        }
    });

    // D. Pipeline
    let result = run_pipeline(&config, &project_dir, &pool, Some(&cancel)).await;
    pool.close();

    match result {
        Ok(run_res) if run_res.success => {
            println!("\n✨ SUCCESS! Pipeline finished in {:.2?}", start.elapsed());
        }
        Ok(run_res) => {
            match run_res.failed_source() {
                Some(failed) => eprintln!(
                    "\n❌ FAILURE. Source '{}' failed: {}",
                    failed.source_name,
                    failed.error.as_deref().unwrap_or("cancelled")
                ),
                None => eprintln!("\n❌ FAILURE. Run cancelled."),
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("\n💥 CRITICAL PIPELINE ERROR: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
