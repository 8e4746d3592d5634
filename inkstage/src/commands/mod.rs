// inkstage/src/commands/mod.rs

pub mod query;
pub mod run;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use inkstage_core::domain::project::PipelineConfig;
use inkstage_core::infrastructure::adapters::DuckDbBackend;
use inkstage_core::infrastructure::config::{load_pipeline_config, resolve_path};
use inkstage_core::infrastructure::pool::{ConnectionPool, RetryPolicy};
use inkstage_core::ports::StoreBackend;

pub(crate) fn load_config(project_dir: &Path) -> anyhow::Result<PipelineConfig> {
    println!("⚙️  Loading configuration...");
    let config = load_pipeline_config(project_dir).with_context(|| {
        format!(
            "Failed to load pipeline configuration from {:?}",
            project_dir
        )
    })?;
    println!("   Pipeline: {} (v{})", config.name, config.version);
    Ok(config)
}

pub(crate) fn duckdb_backend(
    project_dir: &Path,
    config: &PipelineConfig,
) -> anyhow::Result<Arc<dyn StoreBackend>> {
    let db_path = resolve_path(project_dir, &config.database);
    let db_path = db_path.to_string_lossy();
    let backend = DuckDbBackend::open(&db_path)
        .with_context(|| format!("Failed to initialize DuckDB at {}", db_path))?;
    Ok(Arc::new(backend))
}

pub(crate) async fn open_pool(
    backend: Arc<dyn StoreBackend>,
    config: &PipelineConfig,
) -> anyhow::Result<ConnectionPool> {
    let engine = backend.engine_name().to_string();
    ConnectionPool::create(
        backend,
        config.pool.clone(),
        RetryPolicy::from_config(&config.etl),
    )
    .await
    .with_context(|| format!("Failed to create the {} connection pool", engine))
}
