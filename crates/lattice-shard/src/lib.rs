//! The per-shard single-writer engine: chunk store, bloom filter,
//! secondary indexes, and schema migrations (spec §4.9).

pub mod engine;
pub mod migrations;

pub use engine::{EngineError, ShardEngine, ShardStats};
pub use migrations::{Migration, MigrationError, MigrationRegistry};
