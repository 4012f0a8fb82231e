//! Deterministic namespace-to-shard routing (spec §4.8).

use lattice_value::{EntityId, IdentifierError, Namespace};

/// Opaque shard identifier, always of the form `shard-<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(String);

impl ShardId {
    /// Construct a `ShardId` from a caller-supplied string, e.g. one learned
    /// via `POST /shards/register` rather than derived by routing.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of routing an entity: its resolved namespace plus the shard that
/// owns that namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub namespace: Namespace,
    pub shard_id: ShardId,
}

/// Stable hash-based router. Every namespace maps to exactly one of
/// `shard_count` shards, independent of process restarts or call order.
#[derive(Debug, Clone)]
pub struct Router {
    shard_count: u32,
}

impl Router {
    pub fn new(shard_count: u32) -> Self {
        assert!(shard_count > 0, "a router needs at least one shard");
        Self { shard_count }
    }

    /// Resolve a (possibly short-form) identifier to an absolute entity id.
    /// Short-form identifiers (anything without a `scheme://`) are joined
    /// onto the default namespace.
    pub fn resolve_identifier(&self, raw: &str) -> Result<EntityId, IdentifierError> {
        if raw.contains("://") {
            EntityId::new(raw)
        } else {
            EntityId::from_parts(&Namespace::default_namespace(), raw)
        }
    }

    /// `route(entityId) -> {namespace, shardId}` (spec §4.8).
    pub fn route(&self, entity_id: &EntityId) -> Result<RouteTarget, IdentifierError> {
        let (namespace, _local_id) = entity_id.resolve_namespace()?;
        let shard_id = self.shard_id_for(&namespace);
        Ok(RouteTarget { namespace, shard_id })
    }

    /// The shard a namespace is deterministically assigned to.
    pub fn shard_id_for(&self, namespace: &Namespace) -> ShardId {
        let hash = xxhash_rust::xxh3::xxh3_64(namespace.as_str().as_bytes());
        let bucket = hash % self.shard_count as u64;
        ShardId(format!("shard-{bucket:x}"))
    }
}
