//! Shard health registry (spec §4.11 "Maintains a registry of shard
//! identifiers").

use std::collections::HashMap;

use lattice_router::ShardId;

/// Inactivity threshold: a shard with no heartbeat for longer than this is
/// considered `inactive` (spec §4.11).
pub const INACTIVE_AFTER_MILLIS: i64 = 10 * 60 * 1000;

/// A shard is `unhealthy` once it has failed at least this many queries
/// (spec §4.11 "errorCount ≥ 3").
pub const UNHEALTHY_MIN_ERRORS: u64 = 3;

/// ...and its failure rate exceeds this fraction (spec §4.11 "errorCount /
/// queryCount > 0.5").
pub const UNHEALTHY_ERROR_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Active,
    Inactive,
    Unhealthy,
}

/// Per-shard bookkeeping the registry tracks between heartbeats. `status`
/// is derived on read from `last_heartbeat`/`query_count`/`error_count`
/// rather than stored, so it is always consistent with the counters.
#[derive(Debug, Clone)]
pub struct ShardHealth {
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub query_count: u64,
    pub error_count: u64,
}

impl ShardHealth {
    fn status(&self, now: i64) -> ShardStatus {
        if now - self.last_heartbeat > INACTIVE_AFTER_MILLIS {
            return ShardStatus::Inactive;
        }
        if self.error_count >= UNHEALTHY_MIN_ERRORS && self.query_count > 0 {
            let rate = self.error_count as f64 / self.query_count as f64;
            if rate > UNHEALTHY_ERROR_RATE {
                return ShardStatus::Unhealthy;
            }
        }
        ShardStatus::Active
    }
}

/// A snapshot of one shard's registry entry, as returned by `GET /shards`
/// (spec §6).
#[derive(Debug, Clone)]
pub struct ShardRecord {
    pub shard_id: ShardId,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub status: ShardStatus,
    pub query_count: u64,
    pub error_count: u64,
}

/// Tracks every shard the coordinator knows about. Not internally
/// synchronized: callers serialize access the same way a `ShardEngine` is
/// single-writer (spec §5).
#[derive(Debug, Default)]
pub struct ShardRegistry {
    shards: HashMap<ShardId, ShardHealth>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self { shards: HashMap::new() }
    }

    pub fn register(&mut self, shard_id: ShardId, now: i64) {
        self.shards.entry(shard_id).or_insert_with(|| ShardHealth {
            registered_at: now,
            last_heartbeat: now,
            query_count: 0,
            error_count: 0,
        });
    }

    pub fn deregister(&mut self, shard_id: &ShardId) {
        self.shards.remove(shard_id);
    }

    pub fn heartbeat(&mut self, shard_id: &ShardId, now: i64) {
        if let Some(health) = self.shards.get_mut(shard_id) {
            health.last_heartbeat = now;
        }
    }

    pub fn record_query(&mut self, shard_id: &ShardId, succeeded: bool) {
        if let Some(health) = self.shards.get_mut(shard_id) {
            health.query_count += 1;
            if !succeeded {
                health.error_count += 1;
            }
        }
    }

    pub fn status_of(&self, shard_id: &ShardId, now: i64) -> Option<ShardStatus> {
        self.shards.get(shard_id).map(|h| h.status(now))
    }

    /// Every registered shard whose derived status is `Active`, in
    /// registration order is not guaranteed (backed by a `HashMap`).
    pub fn active_shards(&self, now: i64) -> Vec<ShardId> {
        self.shards
            .iter()
            .filter(|(_, h)| h.status(now) == ShardStatus::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn snapshot(&self, now: i64) -> Vec<ShardRecord> {
        self.shards
            .iter()
            .map(|(id, h)| ShardRecord {
                shard_id: id.clone(),
                registered_at: h.registered_at,
                last_heartbeat: h.last_heartbeat,
                status: h.status(now),
                query_count: h.query_count,
                error_count: h.error_count,
            })
            .collect()
    }

    pub fn contains(&self, shard_id: &ShardId) -> bool {
        self.shards.contains_key(shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ShardId {
        ShardId::from(s.to_string())
    }

    #[test]
    fn freshly_registered_shard_is_active() {
        let mut reg = ShardRegistry::new();
        reg.register(id("shard-1"), 1_000);
        assert_eq!(reg.status_of(&id("shard-1"), 1_000), Some(ShardStatus::Active));
    }

    #[test]
    fn stale_heartbeat_marks_shard_inactive() {
        let mut reg = ShardRegistry::new();
        reg.register(id("shard-1"), 0);
        let now = INACTIVE_AFTER_MILLIS + 1;
        assert_eq!(reg.status_of(&id("shard-1"), now), Some(ShardStatus::Inactive));
    }

    #[test]
    fn high_error_rate_marks_shard_unhealthy() {
        let mut reg = ShardRegistry::new();
        reg.register(id("shard-1"), 0);
        for succeeded in [true, false, false, false] {
            reg.record_query(&id("shard-1"), succeeded);
        }
        assert_eq!(reg.status_of(&id("shard-1"), 0), Some(ShardStatus::Unhealthy));
    }

    #[test]
    fn few_errors_below_threshold_stay_active() {
        let mut reg = ShardRegistry::new();
        reg.register(id("shard-1"), 0);
        for succeeded in [true, true, false] {
            reg.record_query(&id("shard-1"), succeeded);
        }
        assert_eq!(reg.status_of(&id("shard-1"), 0), Some(ShardStatus::Active));
    }

    #[test]
    fn deregistered_shard_is_forgotten() {
        let mut reg = ShardRegistry::new();
        reg.register(id("shard-1"), 0);
        reg.deregister(&id("shard-1"));
        assert_eq!(reg.status_of(&id("shard-1"), 0), None);
        assert!(!reg.contains(&id("shard-1")));
    }

    #[test]
    fn active_shards_excludes_inactive_and_unhealthy() {
        let mut reg = ShardRegistry::new();
        reg.register(id("fresh"), 0);
        reg.register(id("stale"), 0);
        reg.heartbeat(&id("stale"), -(INACTIVE_AFTER_MILLIS + 1));
        let active = reg.active_shards(0);
        assert_eq!(active, vec![id("fresh")]);
    }
}
