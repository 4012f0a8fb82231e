//! Fan-out dispatch and result aggregation (spec §4.11 "Dispatch" /
//! "Aggregation").

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use lattice_error::{CoreError, ErrorKind};
use lattice_graph::EntityRecord;
use lattice_router::ShardId;

use crate::registry::ShardRegistry;

/// Default per-shard call timeout (spec §4.11 "default 5 s").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default/maximum aggregated result count (spec §4.11 "limit ≤ 1000
/// (default 100)").
pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

/// One logical query dispatched to a shard, mirroring the `POST /query`
/// body shape (spec §6): `{type, ...}`.
#[derive(Debug, Clone)]
pub enum QueryKind {
    Lookup { id: String },
    Traverse { id: String, predicate: String },
    Filter { predicate: String, value: String },
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub kind: QueryKind,
    pub limit: Option<usize>,
}

/// A shard-local connection the coordinator can dispatch queries over.
/// Implemented by whatever transport embeds a `ShardEngine` + `lattice-graph`
/// orchestration layer; the coordinator itself is transport-agnostic.
pub trait ShardClient: Send + Sync {
    fn query(&self, request: QueryRequest) -> BoxFuture<'_, Result<Vec<EntityRecord>, CoreError>>;
}

#[derive(Debug, Clone, Default)]
pub struct DispatchMetadata {
    pub shards_queried: usize,
    pub shards_responded: usize,
    pub shards_failed: usize,
    pub total_results: usize,
    pub deduped_results: usize,
    pub duration_millis: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub entities: Vec<EntityRecord>,
    pub metadata: DispatchMetadata,
}

/// Fans a query out to `shard_ids` in parallel, each bounded by `timeout`,
/// then unions and deduplicates the responses by `$id` (spec §4.11).
/// Per-shard outcomes are recorded against `registry` but never retried.
pub async fn dispatch(
    registry: &mut ShardRegistry,
    clients: &[(ShardId, Arc<dyn ShardClient>)],
    request: QueryRequest,
    timeout: Duration,
    limit: usize,
) -> Result<DispatchResult, CoreError> {
    if clients.is_empty() {
        return Err(CoreError::new(ErrorKind::ValidationError, "dispatch requires at least one shard"));
    }
    let started = std::time::Instant::now();
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit.min(MAX_LIMIT) };

    let calls = clients.iter().map(|(shard_id, client)| {
        let request = request.clone();
        let shard_id = shard_id.clone();
        async move {
            let outcome = tokio::time::timeout(timeout, client.query(request)).await;
            let result = match outcome {
                Ok(inner) => inner,
                Err(_) => Err(CoreError::new(ErrorKind::Timeout, format!("shard '{shard_id}' timed out"))),
            };
            (shard_id, result)
        }
    });
    let outcomes = futures::future::join_all(calls).await;

    let shards_queried = outcomes.len();
    let mut shards_responded = 0;
    let mut shards_failed = 0;
    let mut total_results = 0;
    let mut seen_ids = HashSet::new();
    let mut entities = Vec::new();

    for (shard_id, outcome) in outcomes {
        match outcome {
            Ok(records) => {
                shards_responded += 1;
                registry.record_query(&shard_id, true);
                total_results += records.len();
                for record in records {
                    if seen_ids.insert(record.id.clone()) {
                        entities.push(record);
                    }
                }
            }
            Err(error) => {
                shards_failed += 1;
                registry.record_query(&shard_id, false);
                tracing::warn!(shard = %shard_id, error = %error.message, "shard query failed");
            }
        }
    }

    let deduped_results = entities.len();
    entities.truncate(limit);

    Ok(DispatchResult {
        entities,
        metadata: DispatchMetadata {
            shards_queried,
            shards_responded,
            shards_failed,
            total_results,
            deduped_results,
            duration_millis: started.elapsed().as_millis() as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_value::EntityId;
    use std::collections::HashMap;

    fn record(id: &str) -> EntityRecord {
        EntityRecord {
            id: EntityId::new(id).unwrap(),
            entity_type: "Thing".into(),
            namespace: "https://example.com".into(),
            local_id: id.to_string(),
            properties: HashMap::new(),
        }
    }

    struct FakeClient {
        results: Vec<EntityRecord>,
        fail: bool,
        delay: Duration,
    }

    impl ShardClient for FakeClient {
        fn query(&self, _request: QueryRequest) -> BoxFuture<'_, Result<Vec<EntityRecord>, CoreError>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    Err(CoreError::new(ErrorKind::Internal, "boom"))
                } else {
                    Ok(self.results.clone())
                }
            })
        }
    }

    fn lookup() -> QueryRequest {
        QueryRequest { kind: QueryKind::Lookup { id: "https://example.com/x".into() }, limit: None }
    }

    #[tokio::test]
    async fn unions_and_dedupes_across_shards() {
        let mut registry = ShardRegistry::new();
        registry.register(ShardId::new("a"), 0);
        registry.register(ShardId::new("b"), 0);
        let clients: Vec<(ShardId, Arc<dyn ShardClient>)> = vec![
            (ShardId::new("a"), Arc::new(FakeClient { results: vec![record("https://e/1"), record("https://e/2")], fail: false, delay: Duration::ZERO })),
            (ShardId::new("b"), Arc::new(FakeClient { results: vec![record("https://e/2"), record("https://e/3")], fail: false, delay: Duration::ZERO })),
        ];
        let result = dispatch(&mut registry, &clients, lookup(), DEFAULT_TIMEOUT, 0).await.unwrap();
        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.metadata.total_results, 4);
        assert_eq!(result.metadata.deduped_results, 3);
        assert_eq!(result.metadata.shards_responded, 2);
        assert_eq!(result.metadata.shards_failed, 0);
    }

    #[tokio::test]
    async fn failed_shard_is_recorded_but_does_not_abort_dispatch() {
        let mut registry = ShardRegistry::new();
        registry.register(ShardId::new("a"), 0);
        registry.register(ShardId::new("b"), 0);
        let clients: Vec<(ShardId, Arc<dyn ShardClient>)> = vec![
            (ShardId::new("a"), Arc::new(FakeClient { results: vec![record("https://e/1")], fail: false, delay: Duration::ZERO })),
            (ShardId::new("b"), Arc::new(FakeClient { results: vec![], fail: true, delay: Duration::ZERO })),
        ];
        let result = dispatch(&mut registry, &clients, lookup(), DEFAULT_TIMEOUT, 0).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.metadata.shards_failed, 1);
        assert_eq!(registry.status_of(&ShardId::new("b"), 0), Some(crate::registry::ShardStatus::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_shard_is_treated_as_failed_after_timeout() {
        let mut registry = ShardRegistry::new();
        registry.register(ShardId::new("slow"), 0);
        let clients: Vec<(ShardId, Arc<dyn ShardClient>)> = vec![(
            ShardId::new("slow"),
            Arc::new(FakeClient { results: vec![record("https://e/1")], fail: false, delay: Duration::from_secs(10) }),
        )];
        let dispatched = dispatch(&mut registry, &clients, lookup(), Duration::from_millis(50), 0);
        tokio::pin!(dispatched);
        tokio::time::advance(Duration::from_secs(1)).await;
        let result = dispatched.await.unwrap();
        assert_eq!(result.entities.len(), 0);
        assert_eq!(result.metadata.shards_failed, 1);
    }

    #[tokio::test]
    async fn limit_truncates_after_dedup_count_is_recorded() {
        let mut registry = ShardRegistry::new();
        registry.register(ShardId::new("a"), 0);
        let many: Vec<EntityRecord> = (0..10).map(|i| record(&format!("https://e/{i}"))).collect();
        let clients: Vec<(ShardId, Arc<dyn ShardClient>)> =
            vec![(ShardId::new("a"), Arc::new(FakeClient { results: many, fail: false, delay: Duration::ZERO }))];
        let result = dispatch(&mut registry, &clients, lookup(), DEFAULT_TIMEOUT, 3).await.unwrap();
        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.metadata.deduped_results, 10);
    }
}
