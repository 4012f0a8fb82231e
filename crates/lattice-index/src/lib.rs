//! Secondary indexes and the bloom filter (spec §4.6, §4.7).

pub mod bloom;
pub mod fts;
pub mod geo;
pub mod position;
pub mod vector;

pub use bloom::BloomFilter;
pub use fts::{sanitize_query, FtsIndex};
pub use geo::GeoIndex;
pub use position::{object_key, PositionEntry, PositionIndex};
pub use vector::{DistanceMetric, HnswConfig, HnswIndex, VectorIndexError};
