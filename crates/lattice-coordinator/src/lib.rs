//! Cross-shard query fan-out and the shard health registry (spec §4.11).

pub mod dispatch;
pub mod registry;

pub use dispatch::{
    dispatch, DispatchMetadata, DispatchResult, QueryKind, QueryRequest, ShardClient, DEFAULT_LIMIT, DEFAULT_TIMEOUT,
    MAX_LIMIT,
};
pub use registry::{ShardHealth, ShardRecord, ShardRegistry, ShardStatus, INACTIVE_AFTER_MILLIS, UNHEALTHY_ERROR_RATE, UNHEALTHY_MIN_ERRORS};
