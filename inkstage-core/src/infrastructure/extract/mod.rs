pub mod csv;

pub use csv::{CsvExtractor, ExtractMetadata, parse_date};
