//! Position index: SPO / POS / OSP lookups over `(subject, predicate,
//! o_key, timestamp, tx_id)` (spec §4.6).

use lattice_value::Value;
use rusqlite::{params, Connection};

/// Derive the object's indexed key: for REF, the target entity id; for
/// STRING, the interned string; for numerics, a sortable textual encoding
/// of the scalar. Every other variant falls back to its debug form so it
/// can still be located by `triples_with_object`, even though position
/// lookups on non-scalar objects are a secondary use case.
pub fn object_key(value: &Value) -> String {
    match value {
        Value::Ref(id) => id.as_str().to_string(),
        Value::String(s) => s.clone(),
        Value::Url(s) => s.clone(),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => n.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Timestamp(ms) => ms.to_string(),
        Value::Date(d) => d.clone(),
        other => format!("{other:?}"),
    }
}

pub struct PositionIndex {
    conn: Connection,
}

impl PositionIndex {
    pub fn open(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pos_index (
                subject TEXT NOT NULL,
                predicate TEXT NOT NULL,
                o_key TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                tx_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS pos_index_spo ON pos_index (subject, predicate, o_key);
            CREATE INDEX IF NOT EXISTS pos_index_pos ON pos_index (predicate, o_key, subject);
            CREATE INDEX IF NOT EXISTS pos_index_osp ON pos_index (o_key, subject, predicate);",
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, subject: &str, predicate: &str, o_key: &str, timestamp: i64, tx_id: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO pos_index (subject, predicate, o_key, timestamp, tx_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![subject, predicate, o_key, timestamp, tx_id],
        )?;
        Ok(())
    }

    pub fn triples_with_subject(&self, subject: &str) -> rusqlite::Result<Vec<PositionEntry>> {
        self.select("SELECT subject, predicate, o_key, timestamp, tx_id FROM pos_index WHERE subject = ?1", subject)
    }

    pub fn triples_with_predicate(&self, predicate: &str) -> rusqlite::Result<Vec<PositionEntry>> {
        self.select(
            "SELECT subject, predicate, o_key, timestamp, tx_id FROM pos_index WHERE predicate = ?1",
            predicate,
        )
    }

    pub fn triples_with_object(&self, o_key: &str) -> rusqlite::Result<Vec<PositionEntry>> {
        self.select("SELECT subject, predicate, o_key, timestamp, tx_id FROM pos_index WHERE o_key = ?1", o_key)
    }

    fn select(&self, sql: &str, param: &str) -> rusqlite::Result<Vec<PositionEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![param], |row| {
            Ok(PositionEntry {
                subject: row.get(0)?,
                predicate: row.get(1)?,
                o_key: row.get(2)?,
                timestamp: row.get(3)?,
                tx_id: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn clear(&self) -> rusqlite::Result<()> {
        self.conn.execute("DELETE FROM pos_index", [])?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionEntry {
    pub subject: String,
    pub predicate: String,
    pub o_key: String,
    pub timestamp: i64,
    pub tx_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_value::EntityId;

    #[test]
    fn object_key_derives_from_variant() {
        assert_eq!(object_key(&Value::String("hi".into())), "hi");
        assert_eq!(object_key(&Value::Int32(42)), "42");
        assert_eq!(object_key(&Value::Ref(EntityId::new("https://e/1").unwrap())), "https://e/1");
    }

    #[test]
    fn lookups_by_each_leading_column() {
        let conn = Connection::open_in_memory().unwrap();
        let index = PositionIndex::open(conn).unwrap();
        index.insert("https://e/1", "friends", "https://e/2", 100, "tx1").unwrap();
        index.insert("https://e/3", "friends", "https://e/2", 200, "tx2").unwrap();

        assert_eq!(index.triples_with_subject("https://e/1").unwrap().len(), 1);
        assert_eq!(index.triples_with_predicate("friends").unwrap().len(), 2);
        assert_eq!(index.triples_with_object("https://e/2").unwrap().len(), 2);
    }

    #[test]
    fn clear_removes_all_entries() {
        let conn = Connection::open_in_memory().unwrap();
        let index = PositionIndex::open(conn).unwrap();
        index.insert("https://e/1", "p", "o", 1, "tx").unwrap();
        index.clear().unwrap();
        assert!(index.triples_with_subject("https://e/1").unwrap().is_empty());
    }
}
