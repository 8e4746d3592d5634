// inkstage-core/src/ports/mod.rs

pub mod store;

pub use store::{
    FetchMode, Row, SessionOptions, StoreBackend, StoreError, StoreErrorKind, StoreSession,
};
