// inkstage-core/src/application/pipeline.rs

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::staging::StagingLoader;
use crate::domain::batch::RecordBatch;
use crate::domain::project::{PipelineConfig, SourceConfig};
use crate::domain::quality::{QualityReport, RuleRegistry};
use crate::domain::staging::{LoadOutcome, StagingTarget};
use crate::error::StageError;
use crate::infrastructure::config::resolve_path;
use crate::infrastructure::extract::{CsvExtractor, ExtractMetadata};
use crate::infrastructure::fs::write_json;
use crate::infrastructure::pool::ConnectionPool;
use crate::ports::store::StoreError;

/// What happened to one source during a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source_name: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<QualityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<LoadOutcome>,
    /// Automatic restarts after a transient load failure.
    pub resumes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceRun {
    fn new(source: &SourceConfig) -> Self {
        Self {
            source_name: source.name.clone(),
            table: source.target.table.clone(),
            extract: None,
            report: None,
            outcome: None,
            resumes: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.outcome.as_ref().is_some_and(LoadOutcome::is_success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub sources: Vec<SourceRun>,
    pub elapsed_ms: u64,
}

impl RunResult {
    /// The source that stopped the run, if any.
    pub fn failed_source(&self) -> Option<&SourceRun> {
        self.sources.iter().find(|s| !s.is_success())
    }
}

/// Extract → validate → stage, source after source, in configuration order.
///
/// A failing source stops the run; sources already staged stay committed.
/// The summary is written to `<target-path>/run_results.json` whatever the outcome.
pub async fn run_pipeline(
    config: &PipelineConfig,
    project_dir: &Path,
    pool: &ConnectionPool,
    cancel: Option<&CancellationToken>,
) -> Result<RunResult, StageError> {
    println!(
        "🚀 Starting staging pipeline '{}' on {}...",
        config.name,
        pool.engine_name()
    );
    let started = Instant::now();

    let extractor = CsvExtractor::new(config.etl.date_formats.clone());
    let registry = RuleRegistry::new(config.quality.clone());
    let loader = StagingLoader::new(pool, config.etl.commit_interval);

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            warn!(source = %source.name, "Run cancelled before source");
            break;
        }

        println!("  🔹 Processing source {}...", source.name);
        let run = stage_source(config, project_dir, source, &extractor, &registry, &loader, cancel).await;

        match (&run.error, &run.outcome) {
            (Some(e), _) => eprintln!("    ❌ {}: {}", source.name, e),
            (None, Some(o)) if o.cancelled => {
                eprintln!("    ⏹️  {}: cancelled after {} rows", source.name, o.rows_committed)
            }
            (None, Some(o)) => println!(
                "    ✅ {} rows staged into {} ({} commit(s), {:.0} rows/s)",
                o.rows_committed,
                o.table,
                o.commits,
                o.rows_per_second()
            ),
            (None, None) => {}
        }

        let stop = !run.is_success();
        sources.push(run);
        if stop {
            break;
        }
    }

    let success = sources.len() == config.sources.len() && sources.iter().all(SourceRun::is_success);
    let result = RunResult {
        success,
        sources,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    let target_dir = project_dir.join(&config.target_path);
    write_json(&target_dir.join("run_results.json"), &result)?;

    println!(
        "✨ Done in {:.2}s. {} source(s) processed, success: {}",
        started.elapsed().as_secs_f64(),
        result.sources.len(),
        result.success
    );
    Ok(result)
}

async fn stage_source(
    config: &PipelineConfig,
    project_dir: &Path,
    source: &SourceConfig,
    extractor: &CsvExtractor,
    registry: &RuleRegistry,
    loader: &StagingLoader<'_>,
    cancel: Option<&CancellationToken>,
) -> SourceRun {
    let mut run = SourceRun::new(source);

    // 1. Extraction
    let path = resolve_path(project_dir, &source.path);
    let batch = match extractor.extract(&path) {
        Ok((batch, meta)) => {
            run.extract = Some(meta);
            batch
        }
        Err(e) => {
            run.error = Some(e.to_string());
            return run;
        }
    };

    // 2. Validation
    let report = registry.validate(&source.name, &batch);
    log_report(&report);
    run.report = Some(report.clone());

    // 3. Staging
    let result = async {
        let columns = source
            .target
            .columns
            .clone()
            .unwrap_or_else(|| batch.columns().to_vec());
        let target = StagingTarget::new(&source.name, &source.target.table, columns)?;

        if source.target.create_if_missing && !report.has_errors() {
            loader.ensure_table(&target, &batch).await?;
        }

        let outcome = loader.stage(&batch, &report, &target, cancel).await?;
        resume_load(config, &batch, &report, &target, loader, outcome, &mut run.resumes, cancel).await
    }
    .await;

    match result {
        Ok(outcome) => {
            if let Some(err) = &outcome.error {
                run.error = Some(format!(
                    "load into {} failed at row {}: {}",
                    outcome.table,
                    outcome.failed_at_row.unwrap_or_default(),
                    err
                ));
            }
            run.outcome = Some(outcome);
        }
        Err(e) => run.error = Some(e.to_string()),
    }
    run
}

/// Restarts a load that stopped on a transient error, right after its last
/// committed row, up to `etl.resume_attempts` times.
#[allow(clippy::too_many_arguments)]
async fn resume_load(
    config: &PipelineConfig,
    batch: &RecordBatch,
    report: &QualityReport,
    target: &StagingTarget,
    loader: &StagingLoader<'_>,
    mut outcome: LoadOutcome,
    resumes: &mut u32,
    cancel: Option<&CancellationToken>,
) -> Result<LoadOutcome, StageError> {
    while *resumes < config.etl.resume_attempts
        && !outcome.cancelled
        && outcome.error.as_ref().is_some_and(|e| e.is_transient())
    {
        *resumes += 1;
        let offset = outcome.rows_committed;
        warn!(
            table = %target.table,
            resume = *resumes,
            from_row = offset + 1,
            "Resuming load after transient failure"
        );

        let tail = batch.slice_from(offset);
        match loader.stage(&tail, report, target, cancel).await {
            Ok(next) => outcome = merge_resumed(outcome, offset, next),
            Err(e) => {
                // Committed rows and the failing position stay those of the last load.
                warn!(table = %target.table, "Resume attempt failed: {}", e);
                outcome.error = Some(resume_error(e));
            }
        }
    }
    Ok(outcome)
}

fn resume_error(err: StageError) -> StoreError {
    match err.as_store_error() {
        Some(store) => store.clone(),
        None => StoreError::fatal(err.to_string()),
    }
}

/// Folds a resumed sub-load into the original outcome. Row positions of the
/// sub-load are shifted back to positions in the full batch.
fn merge_resumed(first: LoadOutcome, offset: usize, next: LoadOutcome) -> LoadOutcome {
    LoadOutcome {
        table: next.table,
        rows_attempted: offset + next.rows_attempted,
        rows_committed: offset + next.rows_committed,
        commits: first.commits + next.commits,
        failed_at_row: next.failed_at_row.map(|row| offset + row),
        error: next.error,
        cancelled: next.cancelled,
        elapsed_ms: first.elapsed_ms + next.elapsed_ms,
    }
}

fn log_report(report: &QualityReport) {
    if report.is_clean() {
        println!("    🧪 Quality: {} rows, no issue", report.total_rows);
        return;
    }
    for warning in &report.warnings {
        info!(source = %report.source_name, "Quality warning: {}", warning);
        println!("      ⚠️  {}", warning);
    }
    for error in &report.errors {
        warn!(source = %report.source_name, "Quality error: {}", error);
        eprintln!("      ❌ {}", error);
    }
}

/// Extraction and validation only, nothing is staged.
pub fn validate_sources(
    config: &PipelineConfig,
    project_dir: &Path,
) -> Result<Vec<QualityReport>, StageError> {
    let extractor = CsvExtractor::new(config.etl.date_formats.clone());
    let registry = RuleRegistry::new(config.quality.clone());

    config
        .sources
        .iter()
        .map(|source| {
            let (batch, _) = extractor.extract(&resolve_path(project_dir, &source.path))?;
            Ok(registry.validate(&source.name, &batch))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::batch::Value;
    use crate::domain::project::{PoolConfig, TargetConfig};
    use crate::domain::quality::QualityRuleSet;
    use crate::infrastructure::adapters::memory::MemoryBackend;
    use crate::infrastructure::pool::RetryPolicy;
    use anyhow::Result;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn write_csv(dir: &Path, name: &str, rows: usize) -> Result<()> {
        let mut content = String::from("id,quantity,region\n");
        for i in 1..=rows {
            content.push_str(&format!("{},{},North\n", i, i * 2));
        }
        fs::create_dir_all(dir.join("data"))?;
        fs::write(dir.join("data").join(name), content)?;
        Ok(())
    }

    fn source(name: &str, table: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            path: format!("data/{}.csv", name),
            target: TargetConfig {
                table: table.into(),
                columns: None,
                create_if_missing: false,
            },
        }
    }

    fn project(sources: Vec<SourceConfig>) -> Result<(TempDir, PipelineConfig)> {
        let dir = tempdir()?;
        let mut config: PipelineConfig = serde_yaml::from_str("name: test")?;
        config.etl.commit_interval = 10;
        config.sources = sources;
        Ok((dir, config))
    }

    async fn pool(backend: &MemoryBackend) -> Result<ConnectionPool> {
        Ok(ConnectionPool::create(
            Arc::new(backend.clone()),
            PoolConfig {
                min: 1,
                max: 2,
                ..Default::default()
            },
            RetryPolicy::new(2, Duration::from_millis(5)),
        )
        .await?)
    }

    #[tokio::test]
    async fn test_run_stages_every_source_and_writes_summary() -> Result<()> {
        let (dir, config) = project(vec![
            source("raw_daily", "STG_DAILY"),
            source("raw_sales", "STG_SALES"),
        ])?;
        write_csv(dir.path(), "raw_daily.csv", 25)?;
        write_csv(dir.path(), "raw_sales.csv", 5)?;
        let backend = MemoryBackend::new();

        let result = run_pipeline(&config, dir.path(), &pool(&backend).await?, None).await?;

        assert!(result.success);
        assert_eq!(backend.rows("stg_daily").map(|r| r.len()), Some(25));
        assert_eq!(backend.rows("stg_sales").map(|r| r.len()), Some(5));
        let summary = fs::read_to_string(dir.path().join("target").join("run_results.json"))?;
        assert!(summary.contains("\"success\": true"));
        Ok(())
    }

    #[tokio::test]
    async fn test_quality_error_stops_the_run() -> Result<()> {
        let (dir, mut config) = project(vec![
            source("raw_daily", "STG_DAILY"),
            source("raw_sales", "STG_SALES"),
        ])?;
        config.quality.insert(
            "raw_daily".into(),
            QualityRuleSet {
                required_columns: ["id".to_string(), "price".to_string()].into(),
                ..Default::default()
            },
        );
        write_csv(dir.path(), "raw_daily.csv", 5)?;
        write_csv(dir.path(), "raw_sales.csv", 5)?;
        let backend = MemoryBackend::new();

        let result = run_pipeline(&config, dir.path(), &pool(&backend).await?, None).await?;

        assert!(!result.success);
        assert_eq!(result.sources.len(), 1);
        let failed = result.failed_source().unwrap();
        assert_eq!(failed.source_name, "raw_daily");
        assert!(failed.error.as_deref().unwrap().contains("quality gate"));
        assert_eq!(backend.stats().inserts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_fails_the_source() -> Result<()> {
        let (dir, config) = project(vec![source("raw_daily", "STG_DAILY")])?;
        let backend = MemoryBackend::new();

        let result = run_pipeline(&config, dir.path(), &pool(&backend).await?, None).await?;

        assert!(!result.success);
        assert!(result.sources[0].error.as_deref().unwrap().contains("not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_is_resumed_after_last_commit() -> Result<()> {
        let (dir, mut config) = project(vec![source("raw_daily", "STG_DAILY")])?;
        config.etl.resume_attempts = 1;
        write_csv(dir.path(), "raw_daily.csv", 25)?;
        let backend = MemoryBackend::new();
        backend.fail_insert_at(15, crate::ports::store::StoreErrorKind::Transient);

        let result = run_pipeline(&config, dir.path(), &pool(&backend).await?, None).await?;

        assert!(result.success);
        assert_eq!(result.sources[0].resumes, 1);
        let outcome = result.sources[0].outcome.as_ref().unwrap();
        assert_eq!(outcome.rows_committed, 25);
        assert_eq!(backend.rows("stg_daily").map(|r| r.len()), Some(25));
        Ok(())
    }

    #[tokio::test]
    async fn test_without_resume_failure_position_is_reported() -> Result<()> {
        let (dir, config) = project(vec![source("raw_daily", "STG_DAILY")])?;
        write_csv(dir.path(), "raw_daily.csv", 25)?;
        let backend = MemoryBackend::new();
        backend.fail_insert_at(15, crate::ports::store::StoreErrorKind::Transient);

        let result = run_pipeline(&config, dir.path(), &pool(&backend).await?, None).await?;

        let outcome = result.sources[0].outcome.as_ref().unwrap();
        assert!(!result.success);
        assert_eq!(outcome.failed_at_row, Some(15));
        assert_eq!(outcome.rows_committed, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_resume_keeps_committed_rows() -> Result<()> {
        let (_dir, mut config) = project(vec![source("raw_daily", "STG_DAILY")])?;
        config.etl.resume_attempts = 1;
        let backend = MemoryBackend::new();
        let pool = ConnectionPool::create(
            Arc::new(backend.clone()),
            PoolConfig {
                min: 1,
                max: 1,
                ..Default::default()
            },
            RetryPolicy::new(2, Duration::from_millis(5)),
        )
        .await?;

        let rows = (1..=25).map(|i| vec![Value::Int(i)]).collect();
        let batch = RecordBatch::new(vec!["id".into()], rows)?;
        let report = QualityReport::empty("raw_daily", 25);
        let target = StagingTarget::for_batch("raw_daily", "STG_DAILY", &batch)?;
        let first = LoadOutcome {
            table: "STG_DAILY".into(),
            rows_attempted: 15,
            rows_committed: 10,
            commits: 1,
            failed_at_row: Some(15),
            error: Some(StoreError::transient("connection reset")),
            ..Default::default()
        };

        // The only session is leased elsewhere, so the resumed load cannot start.
        let _held = pool.acquire().await?;
        let mut resumes = 0;
        let loader = StagingLoader::new(&pool, 10);
        let outcome = resume_load(
            &config, &batch, &report, &target, &loader, first, &mut resumes, None,
        )
        .await?;

        assert_eq!(resumes, 1);
        assert_eq!(outcome.rows_committed, 10);
        assert_eq!(outcome.failed_at_row, Some(15));
        let err = outcome.error.unwrap();
        assert!(err.is_transient());
        assert!(err.message.contains("pool exhausted"));
        assert_eq!(backend.stats().inserts, 0);
        Ok(())
    }

    #[test]
    fn test_merge_resumed_shifts_positions() {
        let first = LoadOutcome {
            rows_attempted: 15,
            rows_committed: 10,
            commits: 1,
            ..Default::default()
        };
        let next = LoadOutcome {
            table: "STG".into(),
            rows_attempted: 7,
            rows_committed: 5,
            commits: 1,
            failed_at_row: Some(7),
            ..Default::default()
        };
        let merged = merge_resumed(first, 10, next);
        assert_eq!(merged.rows_committed, 15);
        assert_eq!(merged.failed_at_row, Some(17));
        assert_eq!(merged.commits, 2);
    }

    #[test]
    fn test_validate_sources_reports_each_source() -> Result<()> {
        let (dir, mut config) = project(vec![source("raw_daily", "STG_DAILY")])?;
        config.quality.insert(
            "raw_daily".into(),
            QualityRuleSet {
                positive_columns: ["quantity".to_string()].into(),
                ..Default::default()
            },
        );
        write_csv(dir.path(), "raw_daily.csv", 3)?;

        let reports = validate_sources(&config, dir.path())?;
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].has_errors());
        Ok(())
    }
}
