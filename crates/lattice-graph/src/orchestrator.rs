//! Traversal, path queries, and batch operations (spec §4.10).

use std::collections::{HashMap, HashSet};

use lattice_error::{CoreError, ErrorKind};
use lattice_shard::ShardEngine;
use lattice_triple::latest;
use lattice_value::{EntityId, Predicate, Value};

use crate::cursor::{decode_cursor, encode_cursor};
use crate::entity::{create_entity, delete_entity, get_entity, update_entity, EntityInput, EntityRecord};

pub const MAX_BATCH_SIZE: usize = 1000;

/// Bounds on `executeSubrequests`' batch size (spec §7 "subrequests ∉
/// [1,1000]").
pub const MIN_SUBREQUESTS: usize = 1;
pub const MAX_SUBREQUESTS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct TraverseOptions {
    pub max_depth: usize,
    pub limit: usize,
    pub cursor: Option<String>,
}

impl TraverseOptions {
    pub fn one_hop() -> Self {
        Self { max_depth: 1, limit: 100, cursor: None }
    }
}

#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

fn referenced_ids(value: &Value) -> Vec<EntityId> {
    match value {
        Value::Ref(id) => vec![id.clone()],
        Value::RefArray(ids) => ids.clone(),
        _ => Vec::new(),
    }
}

/// One hop forward via `predicate`, repeated up to `opts.max_depth` times,
/// deduplicating visited nodes so a cycle terminates instead of looping
/// forever (spec §4.10 "traverse", §8 scenario 3).
pub fn traverse(
    engine: &mut ShardEngine,
    start: &EntityId,
    predicate: &str,
    opts: &TraverseOptions,
    snapshot: i64,
) -> Result<PagedResult<EntityId>, CoreError> {
    let predicate = Predicate::new(predicate).map_err(|e| CoreError::new(ErrorKind::InvalidIdentifier, e.to_string()))?;
    let max_depth = opts.max_depth.max(1);

    let mut visited: HashSet<EntityId> = HashSet::new();
    visited.insert(start.clone());
    let mut frontier = vec![start.clone()];
    let mut reached: Vec<EntityId> = Vec::new();

    for _ in 0..max_depth {
        let mut next_frontier = Vec::new();
        for node in &frontier {
            let triples = engine.query_subject(node).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
            let Some(t) = latest(&triples, node, &predicate, snapshot) else { continue };
            for target in referenced_ids(&t.object) {
                if visited.insert(target.clone()) {
                    reached.push(target.clone());
                    next_frontier.push(target);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    Ok(paginate(reached, opts.cursor.as_deref(), opts.limit))
}

/// Symmetric to `traverse`: finds entities whose `predicate` points at
/// `target`, using the shard's position index (spec §4.10
/// "reverseTraverse").
pub fn reverse_traverse(
    engine: &mut ShardEngine,
    target: &EntityId,
    predicate: &str,
    opts: &TraverseOptions,
) -> Result<PagedResult<EntityId>, CoreError> {
    let entries = engine
        .position()
        .triples_with_object(target.as_str())
        .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

    let mut seen = HashSet::new();
    let mut subjects = Vec::new();
    for entry in entries.into_iter().filter(|e| e.predicate == predicate) {
        if let Ok(id) = EntityId::new(entry.subject) {
            if seen.insert(id.clone()) {
                subjects.push(id);
            }
        }
    }
    Ok(paginate(subjects, opts.cursor.as_deref(), opts.limit))
}

/// Chain of per-hop traversals along `path`, deduplicating intermediate
/// frontiers; halts at `min(path.len(), opts.max_depth)` (spec §4.10
/// "pathTraverse").
pub fn path_traverse(
    engine: &mut ShardEngine,
    start: &EntityId,
    path: &[String],
    opts: &TraverseOptions,
    snapshot: i64,
) -> Result<PagedResult<EntityId>, CoreError> {
    let max_depth = opts.max_depth.max(1).min(path.len());
    let mut frontier: HashSet<EntityId> = [start.clone()].into_iter().collect();

    for predicate in path.iter().take(max_depth) {
        let predicate = Predicate::new(predicate).map_err(|e| CoreError::new(ErrorKind::InvalidIdentifier, e.to_string()))?;
        let mut next_frontier = HashSet::new();
        for node in &frontier {
            let triples = engine.query_subject(node).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
            let Some(t) = latest(&triples, node, &predicate, snapshot) else { continue };
            for target in referenced_ids(&t.object) {
                next_frontier.insert(target);
            }
        }
        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
    }

    let mut results: Vec<EntityId> = frontier.into_iter().collect();
    results.sort();
    Ok(paginate(results, opts.cursor.as_deref(), opts.limit))
}

/// Path-expression dialect `entity.pred1.pred2…` (spec §4.10 "query",
/// GLOSSARY "Path expression"). The first segment is the starting entity
/// identifier; the rest are single-hop predicates planned as a sequence of
/// `traverse` calls.
pub fn query(
    engine: &mut ShardEngine,
    query_string: &str,
    opts: &TraverseOptions,
    snapshot: i64,
) -> Result<PagedResult<EntityId>, CoreError> {
    let mut segments = query_string.split('.');
    let start_raw = segments
        .next()
        .ok_or_else(|| CoreError::new(ErrorKind::ValidationError, "query string must not be empty"))?;
    let start = EntityId::new(start_raw).map_err(|e| CoreError::new(ErrorKind::InvalidIdentifier, e.to_string()))?;
    let path: Vec<String> = segments.map(str::to_string).collect();
    if path.is_empty() {
        return Err(CoreError::new(ErrorKind::ValidationError, "query string must contain at least one predicate"));
    }
    path_traverse(engine, &start, &path, opts, snapshot)
}

fn paginate<T>(mut items: Vec<T>, cursor: Option<&str>, limit: usize) -> PagedResult<T> {
    let limit = if limit == 0 { 100 } else { limit };
    let offset = decode_cursor(cursor);
    if offset >= items.len() {
        return PagedResult { items: Vec::new(), cursor: None, has_more: false };
    }
    let remaining = items.split_off(offset);
    let has_more = remaining.len() > limit;
    let mut page = remaining;
    page.truncate(limit);
    let next_cursor = has_more.then(|| encode_cursor(offset + limit));
    PagedResult { items: page, cursor: next_cursor, has_more }
}

/// The outcome of one item within a batch: success carries the produced
/// value, failure carries a `CoreError` (spec §4.10 "batchGet / batchCreate
/// / batchExecute").
#[derive(Debug)]
pub enum BatchOutcome<T> {
    Ok(T),
    Err(CoreError),
}

#[derive(Debug)]
pub struct BatchResult<T> {
    pub results: Vec<BatchOutcome<T>>,
    pub success_count: usize,
    pub error_count: usize,
}

fn check_batch_size(len: usize) -> Result<(), CoreError> {
    if len > MAX_BATCH_SIZE {
        return Err(CoreError::new(ErrorKind::BatchSizeExceeded, format!("batch of {len} exceeds max of {MAX_BATCH_SIZE}")));
    }
    Ok(())
}

pub fn batch_get(
    engine: &mut ShardEngine,
    ids: &[EntityId],
    snapshot: i64,
) -> Result<BatchResult<Option<EntityRecord>>, CoreError> {
    check_batch_size(ids.len())?;
    let mut results = Vec::with_capacity(ids.len());
    let mut success_count = 0;
    let mut error_count = 0;
    for id in ids {
        match get_entity(engine, id, snapshot) {
            Ok(entity) => {
                success_count += 1;
                results.push(BatchOutcome::Ok(entity));
            }
            Err(e) => {
                error_count += 1;
                results.push(BatchOutcome::Err(e));
            }
        }
    }
    Ok(BatchResult { results, success_count, error_count })
}

pub fn batch_create(
    engine: &mut ShardEngine,
    inputs: Vec<EntityInput>,
    snapshot: i64,
    rng: &mut impl rand::RngCore,
) -> Result<BatchResult<EntityRecord>, CoreError> {
    check_batch_size(inputs.len())?;
    let mut results = Vec::with_capacity(inputs.len());
    let mut success_count = 0;
    let mut error_count = 0;
    for input in inputs {
        match create_entity(engine, input, snapshot, rng) {
            Ok(entity) => {
                success_count += 1;
                results.push(BatchOutcome::Ok(entity));
            }
            Err(e) => {
                error_count += 1;
                results.push(BatchOutcome::Err(e));
            }
        }
    }
    Ok(BatchResult { results, success_count, error_count })
}

/// One entry of a heterogeneous `batchExecute`/`executeSubrequests` call
/// (spec §4.10 "batchExecute", §6 "executeSubrequests").
#[derive(Debug, Clone)]
pub enum Operation {
    Get(EntityId),
    Create(EntityInput),
    Update(EntityId, HashMap<String, Value>),
    Delete(EntityId),
}

/// The success value of one `Operation`. `Get`/`Create`/`Update` all carry
/// an (optional, for `Get`) `EntityRecord`; `Delete` carries nothing.
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Entity(Option<EntityRecord>),
    Deleted,
}

/// Executes a heterogeneous batch of entity operations, one at a time, in
/// order (spec §4.10 "batchExecute"). Same success/error tally contract as
/// `batch_get`/`batch_create`: one entry's failure never aborts the rest.
pub fn batch_execute(
    engine: &mut ShardEngine,
    operations: Vec<Operation>,
    snapshot: i64,
    rng: &mut impl rand::RngCore,
) -> Result<BatchResult<OperationOutcome>, CoreError> {
    check_batch_size(operations.len())?;
    let mut results = Vec::with_capacity(operations.len());
    let mut success_count = 0;
    let mut error_count = 0;
    for operation in operations {
        let outcome = match operation {
            Operation::Get(id) => get_entity(engine, &id, snapshot).map(OperationOutcome::Entity),
            Operation::Create(input) => {
                create_entity(engine, input, snapshot, rng).map(|e| OperationOutcome::Entity(Some(e)))
            }
            Operation::Update(id, properties) => {
                update_entity(engine, &id, properties, snapshot, rng).map(|e| OperationOutcome::Entity(Some(e)))
            }
            Operation::Delete(id) => delete_entity(engine, &id, snapshot, rng).map(|_| OperationOutcome::Deleted),
        };
        match outcome {
            Ok(outcome) => {
                success_count += 1;
                results.push(BatchOutcome::Ok(outcome));
            }
            Err(e) => {
                error_count += 1;
                results.push(BatchOutcome::Err(e));
            }
        }
    }
    Ok(BatchResult { results, success_count, error_count })
}

/// The `executeSubrequests` utility (spec §6 "caller contract"). Distinct
/// from `batch_execute` in one respect: it draws from the shard's per-wake
/// subrequest quota (`ShardEngine::reserve_subrequests`), which resets on
/// every wake from hibernation (spec §8 scenario 6) rather than being a
/// flat per-call cap.
pub fn execute_subrequests(
    engine: &mut ShardEngine,
    operations: Vec<Operation>,
    snapshot: i64,
    rng: &mut impl rand::RngCore,
) -> Result<BatchResult<OperationOutcome>, CoreError> {
    let count = operations.len();
    if count < MIN_SUBREQUESTS || count > MAX_SUBREQUESTS {
        return Err(CoreError::new(
            ErrorKind::ValidationError,
            format!("subrequests count {count} is out of range [{MIN_SUBREQUESTS},{MAX_SUBREQUESTS}]"),
        ));
    }
    if !engine.reserve_subrequests(count) {
        tracing::warn!(count, used = engine.subrequests_used(), "executeSubrequests quota exceeded for this wake");
        return Err(CoreError::new(
            ErrorKind::ValidationError,
            format!("executeSubrequests would exceed the {MAX_SUBREQUESTS}-subrequest per-wake quota"),
        ));
    }
    batch_execute(engine, operations, snapshot, rng)
}
