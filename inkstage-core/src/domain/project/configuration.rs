// src/domain/project/configuration.rs

use crate::domain::quality::QualityRuleSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[validate(schema(function = "validate_pipeline"))]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,

    /// DuckDB database file, relative to the project directory, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(rename = "target-path", default = "default_target_path")]
    pub target_path: String,

    #[serde(rename = "config-paths", default)]
    pub config_paths: Vec<String>,

    #[validate(nested)]
    #[serde(default)]
    pub pool: PoolConfig,

    #[validate(nested)]
    #[serde(default)]
    pub etl: EtlConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub quality: BTreeMap<String, QualityRuleSet>,
}

/// Session pool sizing. `threaded: false` serializes all leases.
#[derive(Debug, Deserialize, Serialize, Clone, Validate, PartialEq)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PoolConfig {
    #[validate(range(min = 1))]
    #[serde(default = "default_pool_min")]
    pub min: usize,
    #[serde(default = "default_pool_max")]
    pub max: usize,
    #[validate(range(min = 1))]
    #[serde(default = "default_pool_increment")]
    pub increment: usize,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub threaded: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: default_pool_min(),
            max: default_pool_max(),
            increment: default_pool_increment(),
            encoding: default_encoding(),
            threaded: true,
        }
    }
}

impl PoolConfig {
    /// Upper bound on simultaneous leases.
    pub fn capacity(&self) -> usize {
        if self.threaded { self.max } else { 1 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate, PartialEq)]
pub struct EtlConfig {
    /// Total attempts (first try included) for query, DML and acquisition.
    #[validate(range(min = 1))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[validate(range(min = 0.0))]
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
    #[validate(range(min = 1))]
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    /// Automatic restarts of a load that failed on a transient error (0 = off).
    #[serde(default)]
    pub resume_attempts: u32,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            commit_interval: default_commit_interval(),
            date_formats: default_date_formats(),
            resume_attempts: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    /// Flat file path, relative to the project directory.
    pub path: String,
    pub target: TargetConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TargetConfig {
    pub table: String,
    /// Explicit insert column order. Defaults to the file's column order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub create_if_missing: bool,
}

impl PipelineConfig {
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn validate_pool_bounds(pool: &PoolConfig) -> Result<(), ValidationError> {
    if pool.max < pool.min {
        let mut err = ValidationError::new("pool_bounds");
        err.message = Some(
            format!(
                "pool.max ({}) must be greater than or equal to pool.min ({})",
                pool.max, pool.min
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

fn validate_pipeline(config: &PipelineConfig) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    let mut tables = HashSet::new();
    for source in &config.sources {
        if !names.insert(source.name.as_str()) {
            let mut err = ValidationError::new("duplicate_source");
            err.message = Some(format!("source '{}' is declared twice", source.name).into());
            return Err(err);
        }
        // One staging target maps to exactly one source batch kind.
        if !tables.insert(source.target.table.to_lowercase()) {
            let mut err = ValidationError::new("shared_target");
            err.message = Some(
                format!(
                    "table '{}' is the target of more than one source",
                    source.target.table
                )
                .into(),
            );
            return Err(err);
        }
    }

    for (source, rules) in &config.quality {
        let bad = rules.invalid_ranges();
        if !bad.is_empty() {
            let mut err = ValidationError::new("range_bounds");
            err.message = Some(
                format!(
                    "quality.{}: inverted range for {}",
                    source,
                    bad.join(", ")
                )
                .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}

fn default_version() -> String {
    "0.1.0".to_string()
}
fn default_database() -> String {
    "inkstage.duckdb".to_string()
}
fn default_target_path() -> String {
    "target".to_string()
}
fn default_pool_min() -> usize {
    2
}
fn default_pool_max() -> usize {
    5
}
fn default_pool_increment() -> usize {
    1
}
fn default_encoding() -> String {
    "UTF-8".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    5.0
}
fn default_commit_interval() -> usize {
    1000
}
fn default_date_formats() -> Vec<String> {
    ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
