// inkstage-core/src/domain/project/mod.rs

pub mod configuration;

pub use configuration::{EtlConfig, PipelineConfig, PoolConfig, SourceConfig, TargetConfig};
