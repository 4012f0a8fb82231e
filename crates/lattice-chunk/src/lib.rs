//! Columnar chunk codec and buffered chunk store (spec §4.4, §4.5, §6).

pub mod codec;
pub mod store;

pub use codec::{ChunkHeader, CodecError};
pub use store::{ChunkStore, FlushPolicy, StoreError, StoreStats};
