// inkstage-core/src/infrastructure/config/project.rs

use serde::{Deserialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use validator::Validate;

use crate::domain::project::PipelineConfig;
use crate::domain::quality::QualityRuleSet;
use crate::infrastructure::error::InfrastructureError;

const CANDIDATES: [&str; 2] = ["inkstage.yaml", "inkstage.yml"];

// --- LOADER ---

#[instrument(skip(project_dir))]
pub fn load_pipeline_config(project_dir: &Path) -> Result<PipelineConfig, InfrastructureError> {
    // 1. Fichier principal
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading pipeline configuration");

    let mut config: PipelineConfig = load_fragment(&config_path)?;

    // 2. Satellites (quality.yml)
    for folder in &config.config_paths.clone() {
        let config_dir = project_dir.join(folder);
        if config_dir.exists() {
            load_satellite_configs(&mut config, &config_dir)?;
        }
    }

    // 3. Overrides ENV
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .validate()
        .map_err(|e| InfrastructureError::ConfigError(e.to_string()))?;

    Ok(config)
}

pub fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    for filename in CANDIDATES {
        let p = root.join(filename);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "No configuration file found in {:?}. Checked: {:?}",
        root, CANDIDATES
    )))
}

/// Charge un fragment YAML typé.
fn load_fragment<T: DeserializeOwned>(path: &Path) -> Result<T, InfrastructureError> {
    let content = fs::read_to_string(path).map_err(|e| {
        InfrastructureError::ConfigError(format!("Failed to read {:?}: {}", path, e))
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

fn load_satellite_configs(
    config: &mut PipelineConfig,
    config_dir: &Path,
) -> Result<(), InfrastructureError> {
    let qual_path = config_dir.join("quality.yml");
    if qual_path.exists() {
        #[derive(Deserialize)]
        struct QualityWrapper {
            #[serde(default)]
            quality: BTreeMap<String, QualityRuleSet>,
        }

        // Un fichier corrompu arrête tout.
        let wrapper: QualityWrapper = load_fragment(&qual_path)?;
        let count = wrapper.quality.len();
        // Satellite entries replace inline ones for the same source.
        config.quality.extend(wrapper.quality);
        info!(sources = count, "  ✅ Quality rules loaded");
    }
    Ok(())
}

/// `INKSTAGE_DATABASE`, `INKSTAGE_COMMIT_INTERVAL` and `INKSTAGE_MAX_RETRIES`
/// take precedence over the file.
pub fn apply_env_overrides<F>(config: &mut PipelineConfig, lookup: F) -> Result<(), InfrastructureError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("INKSTAGE_DATABASE") {
        info!(old = ?config.database, new = ?val, "Overriding database via ENV");
        config.database = val;
    }
    if let Some(val) = lookup("INKSTAGE_COMMIT_INTERVAL") {
        config.etl.commit_interval = parse_env("INKSTAGE_COMMIT_INTERVAL", &val)?;
        info!(commit_interval = config.etl.commit_interval, "Overriding commit interval via ENV");
    }
    if let Some(val) = lookup("INKSTAGE_MAX_RETRIES") {
        config.etl.max_retries = parse_env("INKSTAGE_MAX_RETRIES", &val)?;
        info!(max_retries = config.etl.max_retries, "Overriding max retries via ENV");
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, InfrastructureError> {
    raw.trim().parse().map_err(|_| {
        InfrastructureError::ConfigError(format!("{} must be a positive integer, got '{}'", key, raw))
    })
}

/// Resolves a project-relative path. Absolute paths and `:memory:` pass through.
pub fn resolve_path(project_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if path == ":memory:" || p.is_absolute() {
        p.to_path_buf()
    } else {
        project_dir.join(p)
    }
}
