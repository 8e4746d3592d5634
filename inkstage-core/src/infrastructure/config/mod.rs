pub mod project;

pub use project::{apply_env_overrides, find_main_config, load_pipeline_config, resolve_path};
