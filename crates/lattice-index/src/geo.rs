//! Geohash encoding and the geo secondary index (spec §4.6).

use lattice_value::{haversine_meters, GeoPoint};
use rusqlite::{params, Connection};

const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const MAX_PRECISION: usize = 12;

/// Encode `(lat, lng)` into a Crockford-like base32 geohash of `precision`
/// characters (spec §4.6a). Longer precision implies a smaller, more
/// precise cell.
pub fn encode(point: GeoPoint, precision: usize) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);
    let mut lat_range = (-90.0, 90.0);
    let mut lng_range = (-180.0, 180.0);
    let mut out = Vec::with_capacity(precision);
    let mut even_bit = true;
    let mut bit = 0u8;
    let mut bits_so_far = 0u32;

    while out.len() < precision {
        if even_bit {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if point.lng >= mid {
                bit = (bit << 1) | 1;
                lng_range.0 = mid;
            } else {
                bit <<= 1;
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if point.lat >= mid {
                bit = (bit << 1) | 1;
                lat_range.0 = mid;
            } else {
                bit <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;
        bits_so_far += 1;
        if bits_so_far == 5 {
            out.push(ALPHABET[bit as usize]);
            bits_so_far = 0;
            bit = 0;
        }
    }
    String::from_utf8(out).expect("alphabet is ASCII")
}

/// Decode a geohash back to its cell centroid. Error is bounded by half the
/// cell's diagonal; longer codes (more precision) always produce an error
/// no greater than shorter codes (spec §8 invariant 7).
pub fn decode(geohash: &str) -> Option<GeoPoint> {
    let mut lat_range = (-90.0, 90.0);
    let mut lng_range = (-180.0, 180.0);
    let mut even_bit = true;

    for c in geohash.chars() {
        let idx = ALPHABET.iter().position(|&a| a == c as u8)?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1;
            if even_bit {
                let mid = (lng_range.0 + lng_range.1) / 2.0;
                if bit == 1 {
                    lng_range.0 = mid;
                } else {
                    lng_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            even_bit = !even_bit;
        }
    }
    Some(GeoPoint { lat: (lat_range.0 + lat_range.1) / 2.0, lng: (lng_range.0 + lng_range.1) / 2.0 })
}

/// The 8 geohashes adjacent to `geohash` at the same precision, used to
/// cover a cell's border when a query radius straddles it.
pub fn neighbors(geohash: &str) -> Vec<String> {
    let Some(center) = decode(geohash) else { return Vec::new() };
    let precision = geohash.chars().count();
    // Step size approximated from the cell's own bounding box, derived by
    // re-encoding a point offset by half a cell width/height.
    let probe = |dlat: f64, dlng: f64| -> Option<String> {
        let lat = (center.lat + dlat).clamp(-90.0, 90.0);
        let mut lng = center.lng + dlng;
        if lng > 180.0 {
            lng -= 360.0;
        } else if lng < -180.0 {
            lng += 360.0;
        }
        let candidate = encode(GeoPoint { lat, lng }, precision);
        (candidate != geohash).then_some(candidate)
    };

    let cell_span = cell_span_degrees(precision);
    let mut out = Vec::new();
    for dlat in [-1.0, 0.0, 1.0] {
        for dlng in [-1.0, 0.0, 1.0] {
            if dlat == 0.0 && dlng == 0.0 {
                continue;
            }
            if let Some(n) = probe(dlat * cell_span.0, dlng * cell_span.1) {
                if !out.contains(&n) {
                    out.push(n);
                }
            }
        }
    }
    out
}

fn cell_span_degrees(precision: usize) -> (f64, f64) {
    // Each 5-bit character alternates ~2.5 lng/lat bit allocations; derive
    // the approximate cell width/height by halving the global range
    // `precision` times proportionally to bits spent on each axis.
    let total_bits = precision * 5;
    let lng_bits = (total_bits + 1) / 2;
    let lat_bits = total_bits / 2;
    (180.0 / 2f64.powi(lat_bits as i32), 360.0 / 2f64.powi(lng_bits as i32))
}

/// Geo entries keyed by predicate, persisted in `geo_index`. Range queries
/// expand the query center to the covering geohash cell plus its eight
/// neighbors, then filter candidates by exact haversine distance (spec
/// §4.6a).
pub struct GeoIndex {
    conn: Connection,
}

const QUERY_PRECISION: usize = 6;

impl GeoIndex {
    pub fn open(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS geo_index (
                subject TEXT NOT NULL,
                predicate TEXT NOT NULL,
                geohash TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                PRIMARY KEY (subject, predicate)
            );
            CREATE INDEX IF NOT EXISTS geo_index_geohash ON geo_index (predicate, geohash);",
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, subject: &str, predicate: &str, point: GeoPoint) -> rusqlite::Result<()> {
        let geohash = encode(point, MAX_PRECISION);
        self.conn.execute(
            "INSERT INTO geo_index (subject, predicate, geohash, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(subject, predicate) DO UPDATE SET geohash = excluded.geohash, lat = excluded.lat, lng = excluded.lng",
            params![subject, predicate, geohash, point.lat, point.lng],
        )?;
        Ok(())
    }

    /// Every `(subject, distance_meters)` within `radius_meters` of
    /// `center`, restricted to `predicate`, sorted by ascending distance.
    pub fn query_near(
        &self,
        predicate: &str,
        center: GeoPoint,
        radius_meters: f64,
    ) -> rusqlite::Result<Vec<(String, f64)>> {
        let center_cell = encode(center, QUERY_PRECISION);
        let mut cells = neighbors(&center_cell);
        cells.push(center_cell);

        let mut out = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT subject, lat, lng FROM geo_index WHERE predicate = ?1 AND geohash LIKE ?2")?;
        for cell in &cells {
            let like_pattern = format!("{cell}%");
            let rows = stmt.query_map(params![predicate, like_pattern], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
            })?;
            for row in rows {
                let (subject, lat, lng) = row?;
                let distance = haversine_meters(center, GeoPoint { lat, lng });
                if distance <= radius_meters {
                    out.push((subject, distance));
                }
            }
        }
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        out.dedup_by(|a, b| a.0 == b.0);
        Ok(out)
    }
}
