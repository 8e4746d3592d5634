// inkstage-core/src/lib.rs

// 1. Documentation
#![allow(missing_docs)]

// 2. Memory safety
#![deny(unsafe_code)]
// 3. Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// 4. Performance
#![warn(clippy::perf)]

// --- MODULES HEXAGONAUX ---

// 1. Ports (Interfaces / Traits)
// Contrat du store transactionnel (sessions, erreurs typées)
pub mod ports;

// 2. Domain
// Record batches, quality rules, staging targets.
// Ne dépend que des Ports.
pub mod domain;

// 3. Infrastructure (Adapters)
// Connection pool, DuckDB / in-memory stores, CSV extraction, config files.
pub mod infrastructure;

// 4. Application (Use Cases)
// Staging loader and pipeline orchestration.
pub mod application;

// --- GESTION DES ERREURS GLOBALE ---
pub mod error;

// --- RE-EXPORTS (FACADE) ---
pub use error::StageError;
