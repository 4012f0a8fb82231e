//! The per-shard single-writer engine (spec §4.9): one chunk store, one
//! bloom filter, and one instance of each secondary-index family.

use std::collections::HashMap;
use std::path::Path;

use lattice_chunk::{ChunkStore, FlushPolicy, StoreError};
use lattice_index::{BloomFilter, DistanceMetric, FtsIndex, GeoIndex, HnswConfig, HnswIndex, PositionIndex, VectorIndexError};
use lattice_triple::Triple;
use lattice_value::{EntityId, Value};
use rusqlite::Connection;

use crate::migrations::{Migration, MigrationError, MigrationRegistry};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),
}

const BLOOM_CAPACITY: usize = 100_000;
const BLOOM_FPR: f64 = 0.01;

/// Subrequests executed via `executeSubrequests` draw from this cap, reset
/// on every wake (spec §6, §8 "quota reset per wake").
pub const MAX_SUBREQUESTS_PER_WAKE: usize = 1000;

fn registered_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        up: "CREATE TABLE IF NOT EXISTS shard_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        down: "DROP TABLE IF EXISTS shard_meta;",
    }]
}

/// Point-in-time counters for a shard, surfaced by the orchestrator and
/// the coordinator's health registry (spec §4.9, §11 supplemented
/// feature).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardStats {
    pub chunk_count: u64,
    pub persisted_triple_count: u64,
    pub buffered_triple_count: u64,
    pub quarantined_chunk_count: u64,
    pub schema_version: u32,
}

/// Owns every piece of per-shard state. Not internally synchronized: the
/// single-writer guarantee comes from the caller serializing access (spec
/// §5 "Concurrency model"), matching the cooperative scheduling model.
pub struct ShardEngine {
    chunks: ChunkStore,
    index_conn: Connection,
    migrations: MigrationRegistry,
    bloom: BloomFilter,
    position: PositionIndex,
    fts: FtsIndex,
    geo: GeoIndex,
    vectors: HashMap<String, HnswIndex>,
    rng: rand::rngs::StdRng,
    subrequests_used: usize,
}

impl ShardEngine {
    pub fn open(chunk_path: &Path, index_path: &Path) -> Result<Self, EngineError> {
        let chunks = ChunkStore::open(chunk_path, FlushPolicy::default())?;
        let index_conn = Connection::open(index_path)?;
        Self::from_parts(chunks, index_conn)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let chunks = ChunkStore::open_in_memory(FlushPolicy::default())?;
        let index_conn = Connection::open_in_memory()?;
        Self::from_parts(chunks, index_conn)
    }

    fn from_parts(chunks: ChunkStore, index_conn: Connection) -> Result<Self, EngineError> {
        let migrations = MigrationRegistry::new(registered_migrations());
        migrations.initialize_schema(&index_conn)?;

        let position = PositionIndex::open(Connection::open(index_conn.path().unwrap_or(":memory:"))?)?;
        let fts = FtsIndex::open(Connection::open(index_conn.path().unwrap_or(":memory:"))?)?;
        let geo = GeoIndex::open(Connection::open(index_conn.path().unwrap_or(":memory:"))?)?;

        Ok(Self {
            chunks,
            index_conn,
            migrations,
            bloom: BloomFilter::new(BLOOM_CAPACITY, BLOOM_FPR),
            position,
            fts,
            geo,
            vectors: HashMap::new(),
            rng: rand::SeedableRng::seed_from_u64(0),
            subrequests_used: 0,
        })
    }

    /// Startup lifecycle: ensure schema and run outstanding migrations
    /// (spec §4.9 "Lifecycle"). Rebuilding the bloom filter and indexes
    /// from chunks is a separate, explicitly invoked operation
    /// (`rebuild_from_chunks`), not part of startup.
    pub fn startup(&mut self) -> Result<(), EngineError> {
        let target = self.migrations.highest_version();
        self.migrations.migrate_to_version(&mut self.index_conn, target)?;
        Ok(())
    }

    /// Re-resolve persisted handles on wake from hibernation without
    /// re-reading the full log (spec §4.9 "on every wake"). Also resets the
    /// per-wake `executeSubrequests` quota (spec §8 "quota reset per wake").
    pub fn wake(&mut self) -> Result<(), EngineError> {
        self.subrequests_used = 0;
        Ok(())
    }

    /// Reserve `count` units of this wake's subrequest quota. Returns
    /// `false` (and reserves nothing) if `count` would push the running
    /// total past `MAX_SUBREQUESTS_PER_WAKE`.
    pub fn reserve_subrequests(&mut self, count: usize) -> bool {
        if self.subrequests_used + count > MAX_SUBREQUESTS_PER_WAKE {
            return false;
        }
        self.subrequests_used += count;
        true
    }

    pub fn subrequests_used(&self) -> usize {
        self.subrequests_used
    }

    /// Flush the chunk store so every buffered triple is durable before
    /// the shard is torn down (spec §4.9 "On shutdown").
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.chunks.force_flush()?;
        Ok(())
    }

    pub fn write_triple(&mut self, triple: Triple) -> Result<(), EngineError> {
        self.bloom.add(triple.subject.as_str());
        let key = lattice_index::object_key(&triple.object);
        self.position.insert(
            triple.subject.as_str(),
            triple.predicate.as_str(),
            &key,
            triple.timestamp,
            triple.tx_id.as_str(),
        )?;
        match &triple.object {
            Value::String(s) | Value::Url(s) => {
                self.fts.index_document(triple.subject.as_str(), triple.predicate.as_str(), s)?;
            }
            Value::GeoPoint(p) => {
                self.geo.insert(triple.subject.as_str(), triple.predicate.as_str(), *p)?;
            }
            Value::Vector(v) => {
                let index = self
                    .vectors
                    .entry(triple.predicate.as_str().to_string())
                    .or_insert_with(|| HnswIndex::new(HnswConfig::new(16), DistanceMetric::Cosine));
                index.insert(triple.subject.as_str().to_string(), v.clone(), &mut self.rng)?;
            }
            _ => {}
        }
        self.chunks.write(triple)?;
        Ok(())
    }

    pub fn might_exist(&self, subject: &EntityId) -> bool {
        self.bloom.might_exist(subject.as_str())
    }

    pub fn query_subject(&mut self, subject: &EntityId) -> Result<Vec<Triple>, EngineError> {
        Ok(self.chunks.query_subject(subject)?)
    }

    pub fn flush(&mut self) -> Result<(), EngineError> {
        Ok(self.chunks.flush()?)
    }

    /// Rebuild the bloom filter and every secondary index from the chunk
    /// store's full contents. A separately invocable offline operation
    /// (spec §4.6 "All indexes are rebuildable from chunks").
    pub fn rebuild_from_chunks(&mut self) -> Result<(), EngineError> {
        let triples = self.chunks.scan_all()?;
        self.bloom.rebuild(triples.iter().map(|t| t.subject.as_str()));
        self.position.clear()?;
        for triple in &triples {
            let key = lattice_index::object_key(&triple.object);
            self.position.insert(
                triple.subject.as_str(),
                triple.predicate.as_str(),
                &key,
                triple.timestamp,
                triple.tx_id.as_str(),
            )?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<ShardStats, EngineError> {
        let store_stats = self.chunks.stats()?;
        Ok(ShardStats {
            chunk_count: store_stats.chunk_count,
            persisted_triple_count: store_stats.persisted_triple_count,
            buffered_triple_count: store_stats.buffered_triple_count,
            quarantined_chunk_count: store_stats.quarantined_chunk_count,
            schema_version: self.migrations.highest_version(),
        })
    }

    pub fn fts(&self) -> &FtsIndex {
        &self.fts
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    pub fn vector_index(&self, predicate: &str) -> Option<&HnswIndex> {
        self.vectors.get(predicate)
    }

    pub fn position(&self) -> &PositionIndex {
        &self.position
    }
}
