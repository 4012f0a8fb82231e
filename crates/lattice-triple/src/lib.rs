//! Triple records and MVCC operations (spec §3, §4.3).

use std::time::{SystemTime, UNIX_EPOCH};

use lattice_value::{EntityId, Predicate, TransactionId, Value, ValueError};
use serde::{Deserialize, Serialize};

/// `(subject, predicate, typed-object)` plus MVCC metadata. Records are
/// immutable; updates and deletes append new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: EntityId,
    pub predicate: Predicate,
    pub object: Value,
    /// Monotonic (per shard) milliseconds since epoch.
    pub timestamp: i64,
    pub tx_id: TransactionId,
}

impl Triple {
    pub fn new(
        subject: EntityId,
        predicate: Predicate,
        object: Value,
        timestamp: i64,
        tx_id: TransactionId,
    ) -> Result<Self, ValueError> {
        object.validate()?;
        Ok(Self { subject, predicate, object, timestamp, tx_id })
    }

    /// A tombstone is a record whose object is `NULL`.
    pub fn tombstone(
        subject: EntityId,
        predicate: Predicate,
        timestamp: i64,
        tx_id: TransactionId,
    ) -> Self {
        Self { subject, predicate, object: Value::Null, timestamp, tx_id }
    }

    pub fn is_tombstone(&self) -> bool {
        self.object.is_tombstone()
    }
}

/// Wall-clock milliseconds since epoch, used as the default MVCC snapshot
/// bound when a caller does not supply one explicitly.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as i64
}

/// Emit a tombstone for every predicate of `subject` that is currently
/// live as of `snapshot`, all stamped with the same `tx_id`/`timestamp`
/// (spec §4.3 "Delete (entity)").
pub fn delete_entity_tombstones(
    triples: &[Triple],
    subject: &EntityId,
    timestamp: i64,
    tx_id: &TransactionId,
    snapshot: i64,
) -> Vec<Triple> {
    live_predicates(triples, subject, snapshot)
        .into_iter()
        .map(|predicate| Triple::tombstone(subject.clone(), predicate, timestamp, tx_id.clone()))
        .collect()
}

/// All predicates of `subject` whose latest version (as of `snapshot`) is
/// not a tombstone.
pub fn live_predicates(triples: &[Triple], subject: &EntityId, snapshot: i64) -> Vec<Predicate> {
    let mut predicates: Vec<Predicate> = triples
        .iter()
        .filter(|t| &t.subject == subject)
        .map(|t| t.predicate.clone())
        .collect();
    predicates.sort();
    predicates.dedup();
    predicates
        .into_iter()
        .filter(|p| is_live(triples, subject, p, snapshot))
        .collect()
}

/// The record with the greatest `timestamp <= snapshot` for `(subject,
/// predicate)`, tie-broken by the lexicographically greatest `tx_id` (spec
/// §4.3 "Latest lookup").
pub fn latest<'a>(
    triples: &'a [Triple],
    subject: &EntityId,
    predicate: &Predicate,
    snapshot: i64,
) -> Option<&'a Triple> {
    triples
        .iter()
        .filter(|t| &t.subject == subject && &t.predicate == predicate && t.timestamp <= snapshot)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.tx_id.cmp(&b.tx_id)))
}

/// A `(subject, predicate)` is live iff its latest version (as of
/// `snapshot`) is non-tombstone.
pub fn is_live(triples: &[Triple], subject: &EntityId, predicate: &Predicate, snapshot: i64) -> bool {
    matches!(latest(triples, subject, predicate, snapshot), Some(t) if !t.is_tombstone())
}

/// An entity exists iff it has any live `(subject, *)` record.
pub fn entity_exists(triples: &[Triple], subject: &EntityId, snapshot: i64) -> bool {
    !live_predicates(triples, subject, snapshot).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_value::Predicate as P;

    fn subj() -> EntityId {
        EntityId::new("https://example.com/user/1").unwrap()
    }
    fn tx(n: u8) -> TransactionId {
        // Deterministic, strictly increasing 26-char ULID-alphabet ids for tests.
        TransactionId::new(format!("000000000000000000000000{:02}", n).chars().take(26).collect::<String>()).unwrap()
    }
    fn pred(s: &str) -> P {
        P::new(s).unwrap()
    }

    #[test]
    fn latest_lookup_picks_greatest_timestamp_at_or_before_snapshot() {
        let s = subj();
        let name = pred("name");
        let triples = vec![
            Triple::new(s.clone(), name.clone(), Value::String("A".into()), 100, tx(1)).unwrap(),
            Triple::new(s.clone(), name.clone(), Value::String("B".into()), 200, tx(2)).unwrap(),
        ];
        assert_eq!(latest(&triples, &s, &name, 150).unwrap().object, Value::String("A".into()));
        assert_eq!(latest(&triples, &s, &name, 200).unwrap().object, Value::String("B".into()));
        assert!(latest(&triples, &s, &name, 50).is_none());
    }

    #[test]
    fn latest_lookup_tie_breaks_by_tx_id() {
        let s = subj();
        let name = pred("name");
        let triples = vec![
            Triple::new(s.clone(), name.clone(), Value::String("A".into()), 100, tx(5)).unwrap(),
            Triple::new(s.clone(), name.clone(), Value::String("B".into()), 100, tx(9)).unwrap(),
        ];
        assert_eq!(latest(&triples, &s, &name, 100).unwrap().object, Value::String("B".into()));
    }

    #[test]
    fn mvcc_monotonicity_over_a_growing_history() {
        let s = subj();
        let name = pred("name");
        let mut triples = Vec::new();
        let mut last_ts = i64::MIN;
        for (i, ts) in [10, 20, 30].into_iter().enumerate() {
            triples.push(Triple::new(s.clone(), name.clone(), Value::Int64(i as i64), ts, tx(i as u8)).unwrap());
            let snap_latest = latest(&triples, &s, &name, ts).unwrap();
            assert!(snap_latest.timestamp >= last_ts);
            last_ts = snap_latest.timestamp;
        }
    }

    #[test]
    fn is_live_false_after_tombstone() {
        let s = subj();
        let name = pred("name");
        let triples = vec![
            Triple::new(s.clone(), name.clone(), Value::String("A".into()), 100, tx(1)).unwrap(),
            Triple::tombstone(s.clone(), name.clone(), 200, tx(2)),
        ];
        assert!(is_live(&triples, &s, &name, 100));
        assert!(!is_live(&triples, &s, &name, 200));
    }

    #[test]
    fn delete_entity_emits_one_tombstone_per_live_predicate() {
        let s = subj();
        let triples = vec![
            Triple::new(s.clone(), pred("name"), Value::String("A".into()), 100, tx(1)).unwrap(),
            Triple::new(s.clone(), pred("age"), Value::Int32(30), 100, tx(1)).unwrap(),
            Triple::tombstone(s.clone(), pred("gone"), 100, tx(1)),
        ];
        let deletion_tx = tx(9);
        let tombstones = delete_entity_tombstones(&triples, &s, 500, &deletion_tx, 500);
        assert_eq!(tombstones.len(), 2);
        assert!(tombstones.iter().all(|t| t.is_tombstone() && t.tx_id == deletion_tx));
        let mut names: Vec<_> = tombstones.iter().map(|t| t.predicate.as_str().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["age", "name"]);
    }

    #[test]
    fn entity_exists_requires_a_live_record() {
        let s = subj();
        assert!(!entity_exists(&[], &s, 100));
        let triples = vec![Triple::new(s.clone(), pred("name"), Value::String("A".into()), 100, tx(1)).unwrap()];
        assert!(entity_exists(&triples, &s, 100));
    }

    #[test]
    fn create_delete_create_cycle_succeeds() {
        let s = subj();
        let mut triples = vec![Triple::new(s.clone(), pred("name"), Value::String("A".into()), 100, tx(1)).unwrap()];
        assert!(entity_exists(&triples, &s, 100));
        triples.extend(delete_entity_tombstones(&triples.clone(), &s, 200, &tx(2), 200));
        assert!(!entity_exists(&triples, &s, 200));
        triples.push(Triple::new(s.clone(), pred("name"), Value::String("A2".into()), 300, tx(3)).unwrap());
        assert!(entity_exists(&triples, &s, 300));
    }
}
