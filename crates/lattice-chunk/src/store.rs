//! Buffered, rusqlite-backed chunk store (spec §4.5, §6).
//!
//! Writes accumulate in an in-memory buffer and are periodically flushed
//! into immutable chunk rows. Reads always see the buffer plus every
//! persisted chunk overlapping the requested range; there is no
//! compaction of chunks once written.

use std::path::Path;
use std::time::{Duration, Instant};

use lattice_triple::Triple;
use lattice_value::EntityId;
use rusqlite::{params, Connection, OptionalExtension};

use crate::codec::{self, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("chunk {0} is quarantined and was skipped")]
    Quarantined(i64),
}

/// Thresholds that trigger an automatic flush of the write buffer into a
/// persisted chunk. Any one threshold being met is sufficient.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub max_buffered_triples: usize,
    pub max_buffered_bytes: usize,
    pub max_buffer_age: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_buffered_triples: 1000,
            max_buffered_bytes: 1024 * 1024,
            max_buffer_age: Duration::from_secs(5),
        }
    }
}

/// Point-in-time counters describing a shard's chunk store, surfaced
/// through the per-shard stats snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub chunk_count: u64,
    pub persisted_triple_count: u64,
    pub buffered_triple_count: u64,
    pub quarantined_chunk_count: u64,
}

/// Rough estimate of a triple's footprint, used to track the buffer's
/// approximate byte size without encoding it on every write.
fn estimate_triple_bytes(t: &Triple) -> usize {
    t.subject.as_str().len() + t.predicate.as_str().len() + t.tx_id.as_str().len() + 48
}

pub struct ChunkStore {
    conn: Connection,
    buffer: Vec<Triple>,
    buffered_bytes: usize,
    buffer_opened_at: Option<Instant>,
    policy: FlushPolicy,
    quarantined: std::collections::HashSet<i64>,
}

impl ChunkStore {
    pub fn open(path: &Path, policy: FlushPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn,
            buffer: Vec::new(),
            buffered_bytes: 0,
            buffer_opened_at: None,
            policy,
            quarantined: std::collections::HashSet::new(),
        })
    }

    pub fn open_in_memory(policy: FlushPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn,
            buffer: Vec::new(),
            buffered_bytes: 0,
            buffer_opened_at: None,
            policy,
            quarantined: std::collections::HashSet::new(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                triple_count INTEGER NOT NULL,
                min_timestamp INTEGER NOT NULL,
                max_timestamp INTEGER NOT NULL,
                data BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS chunks_timestamp_range ON chunks (min_timestamp, max_timestamp);",
        )?;
        Ok(())
    }

    /// Append a triple to the write buffer, flushing first if any policy
    /// threshold is already exceeded.
    pub fn write(&mut self, triple: Triple) -> Result<(), StoreError> {
        if self.should_flush() {
            self.flush()?;
        }
        self.buffered_bytes += estimate_triple_bytes(&triple);
        if self.buffer.is_empty() {
            self.buffer_opened_at = Some(Instant::now());
        }
        self.buffer.push(triple);
        if self.should_flush() {
            self.flush()?;
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.buffer.len() >= self.policy.max_buffered_triples
            || self.buffered_bytes >= self.policy.max_buffered_bytes
            || self.buffer_opened_at.map(|t| t.elapsed() >= self.policy.max_buffer_age).unwrap_or(false)
    }

    /// Flush the buffer into a new chunk if it is non-empty; a no-op
    /// otherwise.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.force_flush()
    }

    /// Flush the buffer unconditionally, even if empty (used by shard
    /// shutdown to guarantee durability before exit).
    pub fn force_flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            self.buffer_opened_at = None;
            return Ok(());
        }
        let namespace = self.buffer[0]
            .subject
            .resolve_namespace()
            .map(|(ns, _)| ns.as_str().to_string())
            .unwrap_or_default();
        let (data, header) = codec::encode(&self.buffer);
        self.conn.execute(
            "INSERT INTO chunks (namespace, triple_count, min_timestamp, max_timestamp, data, size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                namespace,
                header.triple_count,
                header.min_timestamp,
                header.max_timestamp,
                data,
                data.len() as i64,
                lattice_triple::now_millis(),
            ],
        )?;
        tracing::debug!(triples = header.triple_count, bytes = data.len(), "flushed chunk");
        self.buffer.clear();
        self.buffered_bytes = 0;
        self.buffer_opened_at = None;
        Ok(())
    }

    /// All triples for `subject`, across the buffer and every persisted
    /// chunk whose timestamp range could contain a record for it.
    pub fn query_subject(&mut self, subject: &EntityId) -> Result<Vec<Triple>, StoreError> {
        let mut out: Vec<Triple> = self.buffer.iter().filter(|t| &t.subject == subject).cloned().collect();

        let mut stmt = self.conn.prepare("SELECT id, data FROM chunks ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?;
        for row in rows {
            let (id, data) = row?;
            if self.quarantined.contains(&id) {
                continue;
            }
            match codec::decode(&data) {
                Ok(triples) => out.extend(triples.into_iter().filter(|t| &t.subject == subject)),
                Err(err) => {
                    tracing::warn!(chunk_id = id, error = %err, "quarantining corrupt chunk");
                    self.quarantined.insert(id);
                }
            }
        }
        Ok(out)
    }

    /// All triples in every chunk (plus the buffer) whose range overlaps
    /// `[from, to]`, used by index rebuilds and full scans.
    pub fn scan_range(&mut self, from: i64, to: i64) -> Result<Vec<Triple>, StoreError> {
        let mut out: Vec<Triple> =
            self.buffer.iter().filter(|t| t.timestamp >= from && t.timestamp <= to).cloned().collect();

        let mut stmt = self.conn.prepare(
            "SELECT id, data FROM chunks WHERE max_timestamp >= ?1 AND min_timestamp <= ?2 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (id, data) = row?;
            if self.quarantined.contains(&id) {
                continue;
            }
            match codec::decode(&data) {
                Ok(triples) => {
                    out.extend(triples.into_iter().filter(|t| t.timestamp >= from && t.timestamp <= to))
                }
                Err(err) => {
                    tracing::warn!(chunk_id = id, error = %err, "quarantining corrupt chunk");
                    self.quarantined.insert(id);
                }
            }
        }
        Ok(out)
    }

    /// Every triple across the buffer and all non-quarantined chunks, used
    /// for full index rebuilds (spec §11 supplemented feature).
    pub fn scan_all(&mut self) -> Result<Vec<Triple>, StoreError> {
        self.scan_range(i64::MIN, i64::MAX)
    }

    pub fn is_quarantined(&self, chunk_id: i64) -> bool {
        self.quarantined.contains(&chunk_id)
    }

    pub fn quarantined_ids(&self) -> Vec<i64> {
        self.quarantined.iter().copied().collect()
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let (chunk_count, persisted_triple_count): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(triple_count), 0) FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((0, 0));
        Ok(StoreStats {
            chunk_count: chunk_count as u64,
            persisted_triple_count: persisted_triple_count as u64,
            buffered_triple_count: self.buffer.len() as u64,
            quarantined_chunk_count: self.quarantined.len() as u64,
        })
    }
}
