//! The 18-variant typed value model (spec §3 / §4.1).

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::geo::{GeoLineString, GeoPoint, GeoPolygon};
use crate::ids::EntityId;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ValueError {
    #[error("invalid {variant} value: {reason}")]
    InvalidValue { variant: &'static str, reason: &'static str },
    #[error("malformed encoding: {0}")]
    Decode(String),
}

impl ValueError {
    pub fn code(&self) -> &'static str {
        "InvalidValue"
    }
}

/// Discriminant tags used by the self-describing wire encoding. Stable
/// across versions: never renumber, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Binary = 6,
    Timestamp = 7,
    Date = 8,
    Duration = 9,
    Ref = 10,
    RefArray = 11,
    Json = 12,
    GeoPoint = 13,
    GeoPolygon = 14,
    GeoLineString = 15,
    Url = 16,
    Vector = 17,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Self, ValueError> {
        Ok(match b {
            0 => Tag::Null,
            1 => Tag::Bool,
            2 => Tag::Int32,
            3 => Tag::Int64,
            4 => Tag::Float64,
            5 => Tag::String,
            6 => Tag::Binary,
            7 => Tag::Timestamp,
            8 => Tag::Date,
            9 => Tag::Duration,
            10 => Tag::Ref,
            11 => Tag::RefArray,
            12 => Tag::Json,
            13 => Tag::GeoPoint,
            14 => Tag::GeoPolygon,
            15 => Tag::GeoLineString,
            16 => Tag::Url,
            17 => Tag::Vector,
            other => return Err(ValueError::Decode(format!("unknown value tag {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Binary(Vec<u8>),
    /// Milliseconds since epoch, non-negative.
    Timestamp(i64),
    /// ISO-8601 calendar date, "YYYY-MM-DD".
    Date(String),
    /// ISO-8601 duration string, e.g. "P3Y6M4DT12H30M5S".
    Duration(String),
    Ref(EntityId),
    RefArray(Vec<EntityId>),
    Json(serde_json::Value),
    GeoPoint(GeoPoint),
    GeoPolygon(GeoPolygon),
    GeoLineString(GeoLineString),
    Url(String),
    Vector(Vec<f32>),
}

impl Value {
    /// `make(variant, payload) -> Value | Error` from spec §4.1: validates
    /// and returns an already-constructed `Value`, the same value this
    /// function was called with.
    pub fn make(self) -> Result<Value, ValueError> {
        self.validate()?;
        Ok(self)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        match self {
            Value::Null | Value::Bool(_) | Value::Int32(_) | Value::Int64(_) => Ok(()),
            Value::Float64(f) => {
                if f.is_nan() {
                    Err(ValueError::InvalidValue { variant: "FLOAT64", reason: "NaN is not permitted" })
                } else {
                    Ok(())
                }
            }
            Value::String(_) | Value::Binary(_) => Ok(()),
            Value::Timestamp(ms) => {
                if *ms < 0 {
                    Err(ValueError::InvalidValue {
                        variant: "TIMESTAMP",
                        reason: "must be non-negative milliseconds since epoch",
                    })
                } else {
                    Ok(())
                }
            }
            Value::Date(s) => validate_date(s),
            Value::Duration(s) => validate_duration(s),
            Value::Ref(_) => Ok(()), // EntityId is validated by construction.
            Value::RefArray(_) => Ok(()),
            Value::Json(_) => Ok(()),
            Value::GeoPoint(p) => p.validate(),
            Value::GeoPolygon(p) => p.validate(),
            Value::GeoLineString(l) => l.validate(),
            Value::Url(s) => {
                url::Url::parse(s)
                    .map(|_| ())
                    .map_err(|_| ValueError::InvalidValue { variant: "URL", reason: "not a valid absolute URL" })
            }
            Value::Vector(v) => {
                if v.iter().any(|f| !f.is_finite()) {
                    Err(ValueError::InvalidValue { variant: "VECTOR", reason: "all components must be finite" })
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Value::Bool(b) => Some(*b), _ => None }
    }
    pub fn as_int32(&self) -> Option<i32> {
        match self { Value::Int32(n) => Some(*n), _ => None }
    }
    pub fn as_int64(&self) -> Option<i64> {
        match self { Value::Int64(n) => Some(*n), _ => None }
    }
    pub fn as_float64(&self) -> Option<f64> {
        match self { Value::Float64(n) => Some(*n), _ => None }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self { Value::Binary(b) => Some(b), _ => None }
    }
    pub fn as_timestamp(&self) -> Option<i64> {
        match self { Value::Timestamp(t) => Some(*t), _ => None }
    }
    pub fn as_ref_entity(&self) -> Option<&EntityId> {
        match self { Value::Ref(e) => Some(e), _ => None }
    }
    pub fn as_ref_array(&self) -> Option<&[EntityId]> {
        match self { Value::RefArray(v) => Some(v), _ => None }
    }
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self { Value::Vector(v) => Some(v), _ => None }
    }
    pub fn as_geo_point(&self) -> Option<&GeoPoint> {
        match self { Value::GeoPoint(p) => Some(p), _ => None }
    }

    /// Encode this value to its self-describing binary wire form: a
    /// one-byte tag followed by the variant's payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf).expect("encoding to a Vec never fails");
        buf
    }

    fn encode_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            Value::Null => w.write_u8(Tag::Null as u8),
            Value::Bool(b) => {
                w.write_u8(Tag::Bool as u8)?;
                w.write_u8(if *b { 1 } else { 0 })
            }
            Value::Int32(n) => {
                w.write_u8(Tag::Int32 as u8)?;
                w.write_i32::<LittleEndian>(*n)
            }
            Value::Int64(n) => {
                w.write_u8(Tag::Int64 as u8)?;
                w.write_i64::<LittleEndian>(*n)
            }
            Value::Float64(f) => {
                w.write_u8(Tag::Float64 as u8)?;
                w.write_f64::<LittleEndian>(*f)
            }
            Value::String(s) => {
                w.write_u8(Tag::String as u8)?;
                write_string(w, s)
            }
            Value::Binary(b) => {
                w.write_u8(Tag::Binary as u8)?;
                write_bytes(w, b)
            }
            Value::Timestamp(ms) => {
                w.write_u8(Tag::Timestamp as u8)?;
                w.write_i64::<LittleEndian>(*ms)
            }
            Value::Date(s) => {
                w.write_u8(Tag::Date as u8)?;
                write_string(w, s)
            }
            Value::Duration(s) => {
                w.write_u8(Tag::Duration as u8)?;
                write_string(w, s)
            }
            Value::Ref(e) => {
                w.write_u8(Tag::Ref as u8)?;
                write_string(w, e.as_str())
            }
            Value::RefArray(refs) => {
                w.write_u8(Tag::RefArray as u8)?;
                w.write_u32::<LittleEndian>(refs.len() as u32)?;
                for r in refs {
                    write_string(w, r.as_str())?;
                }
                Ok(())
            }
            Value::Json(v) => {
                w.write_u8(Tag::Json as u8)?;
                let bytes = serde_json::to_vec(v).expect("serde_json::Value always serializes");
                write_bytes(w, &bytes)
            }
            Value::GeoPoint(p) => {
                w.write_u8(Tag::GeoPoint as u8)?;
                w.write_f64::<LittleEndian>(p.lat)?;
                w.write_f64::<LittleEndian>(p.lng)
            }
            Value::GeoPolygon(poly) => {
                w.write_u8(Tag::GeoPolygon as u8)?;
                write_ring(w, &poly.exterior)?;
                w.write_u32::<LittleEndian>(poly.holes.len() as u32)?;
                for hole in &poly.holes {
                    write_ring(w, hole)?;
                }
                Ok(())
            }
            Value::GeoLineString(line) => {
                w.write_u8(Tag::GeoLineString as u8)?;
                write_ring(w, &line.points)
            }
            Value::Url(s) => {
                w.write_u8(Tag::Url as u8)?;
                write_string(w, s)
            }
            Value::Vector(v) => {
                w.write_u8(Tag::Vector as u8)?;
                w.write_u32::<LittleEndian>(v.len() as u32)?;
                for f in v {
                    w.write_f32::<LittleEndian>(*f)?;
                }
                Ok(())
            }
        }
    }

    /// Decode a value previously produced by `encode`. `decode(encode(v)) ==
    /// v` for every valid `v` (spec §8 invariant 1).
    pub fn decode(bytes: &[u8]) -> Result<Value, ValueError> {
        let mut cursor = Cursor::new(bytes);
        let tag = Tag::from_u8(cursor.read_u8().map_err(eof)?)?;
        let value = match tag {
            Tag::Null => Value::Null,
            Tag::Bool => Value::Bool(cursor.read_u8().map_err(eof)? != 0),
            Tag::Int32 => Value::Int32(cursor.read_i32::<LittleEndian>().map_err(eof)?),
            Tag::Int64 => Value::Int64(cursor.read_i64::<LittleEndian>().map_err(eof)?),
            Tag::Float64 => Value::Float64(cursor.read_f64::<LittleEndian>().map_err(eof)?),
            Tag::String => Value::String(read_string(&mut cursor)?),
            Tag::Binary => Value::Binary(read_bytes(&mut cursor)?),
            Tag::Timestamp => Value::Timestamp(cursor.read_i64::<LittleEndian>().map_err(eof)?),
            Tag::Date => Value::Date(read_string(&mut cursor)?),
            Tag::Duration => Value::Duration(read_string(&mut cursor)?),
            Tag::Ref => {
                let s = read_string(&mut cursor)?;
                Value::Ref(EntityId::new(s).map_err(|e| ValueError::Decode(e.to_string()))?)
            }
            Tag::RefArray => {
                let count = cursor.read_u32::<LittleEndian>().map_err(eof)?;
                let mut refs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let s = read_string(&mut cursor)?;
                    refs.push(EntityId::new(s).map_err(|e| ValueError::Decode(e.to_string()))?);
                }
                Value::RefArray(refs)
            }
            Tag::Json => {
                let bytes = read_bytes(&mut cursor)?;
                Value::Json(serde_json::from_slice(&bytes).map_err(|e| ValueError::Decode(e.to_string()))?)
            }
            Tag::GeoPoint => {
                let lat = cursor.read_f64::<LittleEndian>().map_err(eof)?;
                let lng = cursor.read_f64::<LittleEndian>().map_err(eof)?;
                Value::GeoPoint(GeoPoint { lat, lng })
            }
            Tag::GeoPolygon => {
                let exterior = read_ring(&mut cursor)?;
                let hole_count = cursor.read_u32::<LittleEndian>().map_err(eof)?;
                let mut holes = Vec::with_capacity(hole_count as usize);
                for _ in 0..hole_count {
                    holes.push(read_ring(&mut cursor)?);
                }
                Value::GeoPolygon(GeoPolygon { exterior, holes })
            }
            Tag::GeoLineString => Value::GeoLineString(GeoLineString { points: read_ring(&mut cursor)? }),
            Tag::Url => Value::Url(read_string(&mut cursor)?),
            Tag::Vector => {
                let count = cursor.read_u32::<LittleEndian>().map_err(eof)?;
                let mut v = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    v.push(cursor.read_f32::<LittleEndian>().map_err(eof)?);
                }
                Value::Vector(v)
            }
        };
        Ok(value)
    }
}

fn eof(e: std::io::Error) -> ValueError {
    ValueError::Decode(format!("unexpected end of buffer: {e}"))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    write_bytes(w, s.as_bytes())
}

fn write_bytes<W: Write>(w: &mut W, b: &[u8]) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(b.len() as u32)?;
    w.write_all(b)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ValueError> {
    let len = cursor.read_u32::<LittleEndian>().map_err(eof)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(eof)?;
    Ok(buf)
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ValueError> {
    let bytes = read_bytes(cursor)?;
    String::from_utf8(bytes).map_err(|e| ValueError::Decode(e.to_string()))
}

fn write_ring<W: Write>(w: &mut W, ring: &[GeoPoint]) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(ring.len() as u32)?;
    for p in ring {
        w.write_f64::<LittleEndian>(p.lat)?;
        w.write_f64::<LittleEndian>(p.lng)?;
    }
    Ok(())
}

fn read_ring(cursor: &mut Cursor<&[u8]>) -> Result<Vec<GeoPoint>, ValueError> {
    let count = cursor.read_u32::<LittleEndian>().map_err(eof)?;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let lat = cursor.read_f64::<LittleEndian>().map_err(eof)?;
        let lng = cursor.read_f64::<LittleEndian>().map_err(eof)?;
        points.push(GeoPoint { lat, lng });
    }
    Ok(points)
}

fn validate_date(s: &str) -> Result<(), ValueError> {
    static FORMAT: &[time::format_description::FormatItem<'static>] =
        time::macros::format_description!("[year]-[month]-[day]");
    time::Date::parse(s, FORMAT)
        .map(|_| ())
        .map_err(|_| ValueError::InvalidValue { variant: "DATE", reason: "must be an ISO-8601 date YYYY-MM-DD" })
}

fn validate_duration(s: &str) -> Result<(), ValueError> {
    // ISO-8601 duration: P(nY)(nM)(nW)(nD)(T(nH)(nM)(nS)), at least one
    // component, date part and time part not both empty.
    let re = regex::Regex::new(
        r"^P(?:\d+Y)?(?:\d+M)?(?:\d+W)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$",
    )
    .expect("static regex is valid");
    let bad_shape = s == "P" || s == "PT" || !re.is_match(s);
    if bad_shape {
        return Err(ValueError::InvalidValue {
            variant: "DURATION",
            reason: "must be a non-empty ISO-8601 duration string",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn round_trip_every_variant() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int32(-42),
            Value::Int64(9_007_199_254_740_993), // beyond 2^53
            Value::Float64(3.5),
            Value::String("hello".to_string()),
            Value::Binary(vec![1, 2, 3, 255]),
            Value::Timestamp(1_700_000_000_000),
            Value::Date("2024-03-05".to_string()),
            Value::Duration("P3Y6M4DT12H30M5S".to_string()),
            Value::Ref(entity("https://example.com/user/1")),
            Value::RefArray(vec![entity("https://example.com/user/1"), entity("https://example.com/user/2")]),
            Value::Json(serde_json::json!({"a": [1, 2, "x"]})),
            Value::GeoPoint(GeoPoint { lat: 37.7749, lng: -122.4194 }),
            Value::GeoPolygon(GeoPolygon {
                exterior: vec![
                    GeoPoint { lat: 0.0, lng: 0.0 },
                    GeoPoint { lat: 0.0, lng: 1.0 },
                    GeoPoint { lat: 1.0, lng: 1.0 },
                    GeoPoint { lat: 0.0, lng: 0.0 },
                ],
                holes: vec![],
            }),
            Value::GeoLineString(GeoLineString {
                points: vec![GeoPoint { lat: 0.0, lng: 0.0 }, GeoPoint { lat: 1.0, lng: 1.0 }],
            }),
            Value::Url("https://example.com/path?q=1".to_string()),
            Value::Vector(vec![1.0, 2.5, -3.25]),
            Value::Vector(vec![]),
        ];

        for v in values {
            assert!(v.is_valid(), "expected {v:?} to be valid");
            let encoded = v.encode();
            let decoded = Value::decode(&encoded).expect("decode should succeed");
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn float_rejects_nan() {
        assert!(Value::Float64(f64::NAN).validate().is_err());
        assert!(Value::Float64(f64::INFINITY).validate().is_ok());
    }

    #[test]
    fn timestamp_rejects_negative() {
        assert!(Value::Timestamp(-1).validate().is_err());
        assert!(Value::Timestamp(0).validate().is_ok());
    }

    #[test]
    fn timestamp_preserves_max_safe_integer_boundary() {
        let max_safe: i64 = 9_007_199_254_740_991; // 2^53 - 1
        let v = Value::Timestamp(max_safe);
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
        let beyond = Value::Timestamp(max_safe + 2);
        // 64-bit integer arithmetic does not lose precision here, unlike an
        // f64-based encoding would.
        assert_eq!(Value::decode(&beyond.encode()).unwrap().as_timestamp().unwrap(), max_safe + 2);
    }

    #[test]
    fn duration_validates_iso8601_shape() {
        assert!(Value::Duration("P3Y6M4DT12H30M5S".to_string()).validate().is_ok());
        assert!(Value::Duration("P1D".to_string()).validate().is_ok());
        assert!(Value::Duration("PT1H".to_string()).validate().is_ok());
        assert!(Value::Duration("P".to_string()).validate().is_err());
        assert!(Value::Duration("garbage".to_string()).validate().is_err());
    }

    #[test]
    fn date_validates_calendar_date() {
        assert!(Value::Date("2024-03-05".to_string()).validate().is_ok());
        assert!(Value::Date("2024-13-01".to_string()).validate().is_err());
        assert!(Value::Date("not-a-date".to_string()).validate().is_err());
    }

    #[test]
    fn vector_rejects_non_finite_and_allows_empty() {
        assert!(Value::Vector(vec![1.0, f64::NAN as f32]).validate().is_err());
        assert!(Value::Vector(vec![]).validate().is_ok());
    }

    #[test]
    fn url_requires_absolute_url() {
        assert!(Value::Url("https://example.com".to_string()).validate().is_ok());
        assert!(Value::Url("not a url".to_string()).validate().is_err());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = Value::decode(&[200]).unwrap_err();
        assert!(matches!(err, ValueError::Decode(_)));
    }

    #[test]
    fn is_tombstone_matches_null_only() {
        assert!(Value::Null.is_tombstone());
        assert!(!Value::Bool(false).is_tombstone());
    }
}
