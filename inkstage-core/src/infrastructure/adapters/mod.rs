pub mod duckdb;
pub mod memory;

pub use self::duckdb::DuckDbBackend;
pub use memory::MemoryBackend;
