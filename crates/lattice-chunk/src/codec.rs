//! Columnar binary chunk encoding (spec §4.4).
//!
//! Layout: a fixed header, followed by five length-prefixed columns in a
//! fixed order (`subject`, `predicate`, `object`, `timestamp`, `tx_id`).
//! `subject` and `predicate` are dictionary-encoded (distinct values are
//! written once, followed by a per-row index into the dictionary) since
//! both tend to repeat heavily within a chunk.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lattice_triple::Triple;
use lattice_value::{EntityId, Predicate, TransactionId, Value};

const MAGIC: &[u8; 4] = b"LTCK";
const VERSION: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated chunk: {0}")]
    Truncated(String),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported chunk version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed column: {0}")]
    MalformedColumn(String),
    #[error(transparent)]
    Value(#[from] lattice_value::ValueError),
    #[error(transparent)]
    Identifier(#[from] lattice_value::IdentifierError),
}

/// Header metadata recovered from (or about to be written into) a chunk,
/// independent of decoding the full triple payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub triple_count: u32,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

/// Encode a non-empty, insertion-ordered batch of triples into one chunk
/// blob. The caller is responsible for computing `min_ts`/`max_ts` from the
/// batch beforehand if needed; this also returns the header actually
/// written so callers don't have to recompute it.
pub fn encode(triples: &[Triple]) -> (Vec<u8>, ChunkHeader) {
    let min_ts = triples.iter().map(|t| t.timestamp).min().unwrap_or(0);
    let max_ts = triples.iter().map(|t| t.timestamp).max().unwrap_or(0);
    let header = ChunkHeader { triple_count: triples.len() as u32, min_timestamp: min_ts, max_timestamp: max_ts };

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.write_u16::<LittleEndian>(VERSION).unwrap();
    out.write_u32::<LittleEndian>(header.triple_count).unwrap();
    out.write_i64::<LittleEndian>(header.min_timestamp).unwrap();
    out.write_i64::<LittleEndian>(header.max_timestamp).unwrap();

    write_column(&mut out, &encode_dictionary_column(triples.iter().map(|t| t.subject.as_str())));
    write_column(&mut out, &encode_dictionary_column(triples.iter().map(|t| t.predicate.as_str())));
    write_column(&mut out, &encode_object_column(triples));
    write_column(&mut out, &encode_timestamp_column(triples));
    write_column(&mut out, &encode_tx_id_column(triples));

    (out, header)
}

/// Decode a chunk blob back into triples, in insertion order.
pub fn decode(bytes: &[u8]) -> Result<Vec<Triple>, CodecError> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|e| CodecError::Truncated(e.to_string()))?;
    if &magic != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = cursor.read_u16::<LittleEndian>().map_err(|e| CodecError::Truncated(e.to_string()))?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let triple_count = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::Truncated(e.to_string()))?;
    let _min_ts = cursor.read_i64::<LittleEndian>().map_err(|e| CodecError::Truncated(e.to_string()))?;
    let _max_ts = cursor.read_i64::<LittleEndian>().map_err(|e| CodecError::Truncated(e.to_string()))?;

    let subject_col = read_column(&mut cursor)?;
    let predicate_col = read_column(&mut cursor)?;
    let object_col = read_column(&mut cursor)?;
    let timestamp_col = read_column(&mut cursor)?;
    let tx_id_col = read_column(&mut cursor)?;

    let subjects = decode_dictionary_column(&subject_col, triple_count)?;
    let predicates = decode_dictionary_column(&predicate_col, triple_count)?;
    let objects = decode_object_column(&object_col, triple_count)?;
    let timestamps = decode_timestamp_column(&timestamp_col, triple_count)?;
    let tx_ids = decode_tx_id_column(&tx_id_col, triple_count)?;

    let mut triples = Vec::with_capacity(triple_count as usize);
    for i in 0..triple_count as usize {
        triples.push(Triple {
            subject: EntityId::new(subjects[i].clone())?,
            predicate: Predicate::new(predicates[i].clone())?,
            object: objects[i].clone(),
            timestamp: timestamps[i],
            tx_id: TransactionId::new(tx_ids[i].clone())?,
        });
    }
    Ok(triples)
}

fn write_column(out: &mut Vec<u8>, column: &[u8]) {
    out.write_u32::<LittleEndian>(column.len() as u32).unwrap();
    out.extend_from_slice(column);
}

fn read_column(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let len = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::Truncated(e.to_string()))? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|e| CodecError::Truncated(e.to_string()))?;
    Ok(buf)
}

fn encode_dictionary_column<'a>(values: impl Iterator<Item = &'a str>) -> Vec<u8> {
    let mut dict: Vec<&str> = Vec::new();
    let mut index_of: HashMap<&str, u32> = HashMap::new();
    let mut indices: Vec<u32> = Vec::new();

    for v in values {
        let idx = *index_of.entry(v).or_insert_with(|| {
            dict.push(v);
            (dict.len() - 1) as u32
        });
        indices.push(idx);
    }

    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(dict.len() as u32).unwrap();
    for entry in &dict {
        out.write_u32::<LittleEndian>(entry.len() as u32).unwrap();
        out.extend_from_slice(entry.as_bytes());
    }
    for idx in &indices {
        out.write_u32::<LittleEndian>(*idx).unwrap();
    }
    out
}

fn decode_dictionary_column(bytes: &[u8], row_count: u32) -> Result<Vec<String>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let dict_len = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::MalformedColumn(e.to_string()))?;
    let mut dict = Vec::with_capacity(dict_len as usize);
    for _ in 0..dict_len {
        let len = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::MalformedColumn(e.to_string()))? as usize;
        let mut buf = vec![0u8; len];
        cursor.read_exact(&mut buf).map_err(|e| CodecError::MalformedColumn(e.to_string()))?;
        dict.push(String::from_utf8(buf).map_err(|e| CodecError::MalformedColumn(e.to_string()))?);
    }
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let idx = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::MalformedColumn(e.to_string()))? as usize;
        let value = dict.get(idx).ok_or_else(|| CodecError::MalformedColumn("dictionary index out of range".into()))?;
        out.push(value.clone());
    }
    Ok(out)
}

fn encode_object_column(triples: &[Triple]) -> Vec<u8> {
    let mut out = Vec::new();
    for t in triples {
        let encoded = t.object.encode();
        out.write_u32::<LittleEndian>(encoded.len() as u32).unwrap();
        out.extend_from_slice(&encoded);
    }
    out
}

fn decode_object_column(bytes: &[u8], row_count: u32) -> Result<Vec<Value>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let len = cursor.read_u32::<LittleEndian>().map_err(|e| CodecError::MalformedColumn(e.to_string()))? as usize;
        let mut buf = vec![0u8; len];
        cursor.read_exact(&mut buf).map_err(|e| CodecError::MalformedColumn(e.to_string()))?;
        out.push(Value::decode(&buf)?);
    }
    Ok(out)
}

fn encode_timestamp_column(triples: &[Triple]) -> Vec<u8> {
    let mut out = Vec::with_capacity(triples.len() * 8);
    for t in triples {
        out.write_i64::<LittleEndian>(t.timestamp).unwrap();
    }
    out
}

fn decode_timestamp_column(bytes: &[u8], row_count: u32) -> Result<Vec<i64>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        out.push(cursor.read_i64::<LittleEndian>().map_err(|e| CodecError::MalformedColumn(e.to_string()))?);
    }
    Ok(out)
}

fn encode_tx_id_column(triples: &[Triple]) -> Vec<u8> {
    let mut out = Vec::new();
    for t in triples {
        let bytes = t.tx_id.as_str().as_bytes();
        debug_assert_eq!(bytes.len(), 26);
        out.extend_from_slice(bytes);
    }
    out
}

fn decode_tx_id_column(bytes: &[u8], row_count: u32) -> Result<Vec<String>, CodecError> {
    const TX_ID_LEN: usize = 26;
    if bytes.len() != row_count as usize * TX_ID_LEN {
        return Err(CodecError::MalformedColumn("tx_id column has unexpected length".into()));
    }
    let mut out = Vec::with_capacity(row_count as usize);
    for chunk in bytes.chunks_exact(TX_ID_LEN) {
        out.push(String::from_utf8(chunk.to_vec()).map_err(|e| CodecError::MalformedColumn(e.to_string()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_value::Predicate as P;

    fn tx(n: u8) -> TransactionId {
        TransactionId::new(format!("000000000000000000000000{:02}", n)).unwrap()
    }

    fn triple(s: &str, p: &str, v: Value, ts: i64, tx: &TransactionId) -> Triple {
        Triple::new(
            EntityId::new(s).unwrap(),
            P::new(p).unwrap(),
            v,
            ts,
            tx.clone(),
        )
        .unwrap()
    }

    #[test]
    fn round_trips_and_preserves_order() {
        let tx_a = tx(1);
        let tx_b = tx(2);
        let triples = vec![
            triple("https://e/1", "name", Value::String("Alice".into()), 100, &tx_a),
            triple("https://e/1", "age", Value::Int32(30), 100, &tx_a),
            triple("https://e/2", "name", Value::String("Bob".into()), 150, &tx_b),
        ];
        let (encoded, header) = encode(&triples);
        assert_eq!(header.triple_count, 3);
        assert_eq!(header.min_timestamp, 100);
        assert_eq!(header.max_timestamp, 150);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, triples);
    }

    #[test]
    fn encoded_size_scales_with_dictionary_reuse() {
        // 100 triples sharing one subject/predicate should be much smaller
        // than 100 distinct strings would produce, because of dictionary
        // encoding — a sanity check on the columnar layout, not an exact bound.
        let shared_tx = tx(1);
        let triples: Vec<Triple> = (0..100)
            .map(|i| triple("https://e/1", "tag", Value::Int32(i), i as i64, &shared_tx))
            .collect();
        let (encoded, _) = encode(&triples);
        assert!(encoded.len() < 100 * 64);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let err = decode(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let triples = vec![triple("https://e/1", "name", Value::Null, 1, &tx(1))];
        let (encoded, _) = encode(&triples);
        let err = decode(&encoded[..encoded.len() - 5]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedColumn(_) | CodecError::Truncated(_)));
    }

    #[test]
    fn empty_batch_encodes_and_decodes() {
        let (encoded, header) = encode(&[]);
        assert_eq!(header.triple_count, 0);
        assert_eq!(decode(&encoded).unwrap(), vec![]);
    }
}
