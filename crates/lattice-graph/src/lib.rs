//! Entity CRUD, traversal, path queries, and batch operations over a
//! shard (spec §4.10).

pub mod cursor;
pub mod entity;
pub mod orchestrator;

pub use cursor::{decode_cursor, encode_cursor};
pub use entity::{create_entity, delete_entity, get_entity, update_entity, EntityInput, EntityRecord, TYPE_PREDICATE};
pub use orchestrator::{
    batch_create, batch_execute, batch_get, execute_subrequests, path_traverse, query, reverse_traverse, traverse,
    BatchOutcome, BatchResult, Operation, OperationOutcome, PagedResult, TraverseOptions, MAX_BATCH_SIZE,
    MAX_SUBREQUESTS, MIN_SUBREQUESTS,
};
