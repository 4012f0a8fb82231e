//! Entity assembly and CRUD operations (spec §4.10).

use std::collections::HashMap;

use lattice_error::{CoreError, ErrorKind};
use lattice_shard::ShardEngine;
use lattice_triple::{self as triple_ops, now_millis, Triple};
use lattice_value::{EntityId, Predicate, TransactionId, Value};
use rand::RngCore;

pub const TYPE_PREDICATE: &str = "$type";

/// An assembled entity: `{ $id, $type, _namespace, _localId, ...predicates }`
/// (spec §4.10 "getEntity").
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub entity_type: String,
    pub namespace: String,
    pub local_id: String,
    pub properties: HashMap<String, Value>,
}

/// The caller-supplied shape for `createEntity`/`updateEntity`.
#[derive(Debug, Clone)]
pub struct EntityInput {
    pub id: Option<EntityId>,
    pub entity_type: Option<String>,
    pub properties: HashMap<String, Value>,
}

fn next_tx_id(rng: &mut impl RngCore) -> TransactionId {
    TransactionId::generate(now_millis() as u64, rng)
}

/// Assemble a live entity from the shard, or `None` if it has no live
/// records (spec §4.10 "getEntity").
pub fn get_entity(engine: &mut ShardEngine, id: &EntityId, snapshot: i64) -> Result<Option<EntityRecord>, CoreError> {
    let triples =
        engine.query_subject(id).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
    let live = triple_ops::live_predicates(&triples, id, snapshot);
    if live.is_empty() {
        return Ok(None);
    }

    let (namespace, local_id) =
        id.resolve_namespace().map_err(|e| CoreError::new(ErrorKind::InvalidIdentifier, e.to_string()))?;

    let mut properties = HashMap::new();
    let mut entity_type = String::new();
    for predicate in &live {
        let Some(latest) = triple_ops::latest(&triples, id, predicate, snapshot) else { continue };
        if predicate.as_str() == TYPE_PREDICATE {
            entity_type = latest.object.as_str().unwrap_or_default().to_string();
        } else {
            properties.insert(predicate.as_str().to_string(), latest.object.clone());
        }
    }

    Ok(Some(EntityRecord {
        id: id.clone(),
        entity_type,
        namespace: namespace.as_str().to_string(),
        local_id,
        properties,
    }))
}

/// Fails if `$id`/`$type` are missing, or if `id` already exists (spec
/// §4.10 "createEntity").
pub fn create_entity(
    engine: &mut ShardEngine,
    input: EntityInput,
    snapshot: i64,
    rng: &mut impl RngCore,
) -> Result<EntityRecord, CoreError> {
    let id = input.id.ok_or_else(|| CoreError::new(ErrorKind::ValidationError, "createEntity requires $id"))?;
    let entity_type = input
        .entity_type
        .ok_or_else(|| CoreError::new(ErrorKind::ValidationError, "createEntity requires $type"))?;

    if get_entity(engine, &id, snapshot)?.is_some() {
        return Err(CoreError::new(ErrorKind::DuplicateEntity, format!("entity '{id}' already exists")));
    }

    let tx_id = next_tx_id(rng);
    let timestamp = now_millis();
    write_predicate(engine, &id, TYPE_PREDICATE, Value::String(entity_type.clone()), timestamp, &tx_id)?;
    for (predicate, value) in &input.properties {
        write_predicate(engine, &id, predicate, value.clone(), timestamp, &tx_id)?;
    }
    engine.flush().map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

    get_entity(engine, &id, timestamp)?.ok_or_else(|| CoreError::new(ErrorKind::Internal, "entity vanished after create"))
}

/// Fails if `id` is absent; merges `props` (spec §4.10 "updateEntity").
pub fn update_entity(
    engine: &mut ShardEngine,
    id: &EntityId,
    properties: HashMap<String, Value>,
    snapshot: i64,
    rng: &mut impl RngCore,
) -> Result<EntityRecord, CoreError> {
    if get_entity(engine, id, snapshot)?.is_none() {
        return Err(CoreError::new(ErrorKind::EntityNotFound, format!("entity '{id}' does not exist")));
    }

    let tx_id = next_tx_id(rng);
    let timestamp = now_millis();
    for (predicate, value) in &properties {
        write_predicate(engine, id, predicate, value.clone(), timestamp, &tx_id)?;
    }
    engine.flush().map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

    get_entity(engine, id, timestamp)?.ok_or_else(|| CoreError::new(ErrorKind::Internal, "entity vanished after update"))
}

/// Fails if `id` is absent; emits a tombstone per live predicate under one
/// `txId` (spec §4.10 "deleteEntity").
pub fn delete_entity(
    engine: &mut ShardEngine,
    id: &EntityId,
    snapshot: i64,
    rng: &mut impl RngCore,
) -> Result<(), CoreError> {
    let triples =
        engine.query_subject(id).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
    if triple_ops::live_predicates(&triples, id, snapshot).is_empty() {
        return Err(CoreError::new(ErrorKind::EntityNotFound, format!("entity '{id}' does not exist")));
    }

    let tx_id = next_tx_id(rng);
    let timestamp = now_millis();
    let tombstones = triple_ops::delete_entity_tombstones(&triples, id, timestamp, &tx_id, snapshot);
    for tombstone in tombstones {
        engine.write_triple(tombstone).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
    }
    engine.flush().map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
    Ok(())
}

fn write_predicate(
    engine: &mut ShardEngine,
    id: &EntityId,
    predicate: &str,
    value: Value,
    timestamp: i64,
    tx_id: &TransactionId,
) -> Result<(), CoreError> {
    let predicate = Predicate::new(predicate).map_err(|e| CoreError::new(ErrorKind::InvalidIdentifier, e.to_string()))?;
    let triple = Triple::new(id.clone(), predicate, value, timestamp, tx_id.clone())
        .map_err(|e| CoreError::new(ErrorKind::InvalidValue, e.to_string()))?;
    engine.write_triple(triple).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))
}
