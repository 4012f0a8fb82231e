//! Geo payload types shared by `Value::GeoPoint/GeoPolygon/GeoLineString`
//! and the geo secondary index.

use serde::{Deserialize, Serialize};

use crate::ValueError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValueError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValueError::InvalidValue {
                variant: "GEO_POINT",
                reason: "lat must be finite and within [-90, 90]",
            });
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(ValueError::InvalidValue {
                variant: "GEO_POINT",
                reason: "lng must be finite and within [-180, 180]",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLineString {
    pub points: Vec<GeoPoint>,
}

impl GeoLineString {
    pub fn new(points: Vec<GeoPoint>) -> Result<Self, ValueError> {
        let line = Self { points };
        line.validate()?;
        Ok(line)
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        if self.points.len() < 2 {
            return Err(ValueError::InvalidValue {
                variant: "GEO_LINESTRING",
                reason: "must have at least 2 points",
            });
        }
        for p in &self.points {
            p.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub exterior: Vec<GeoPoint>,
    pub holes: Vec<Vec<GeoPoint>>,
}

impl GeoPolygon {
    pub fn new(exterior: Vec<GeoPoint>, holes: Vec<Vec<GeoPoint>>) -> Result<Self, ValueError> {
        let polygon = Self { exterior, holes };
        polygon.validate()?;
        Ok(polygon)
    }

    pub fn validate(&self) -> Result<(), ValueError> {
        validate_ring(&self.exterior, "exterior")?;
        for hole in &self.holes {
            validate_ring(hole, "hole")?;
        }
        Ok(())
    }
}

fn validate_ring(ring: &[GeoPoint], which: &'static str) -> Result<(), ValueError> {
    if ring.len() < 4 {
        return Err(ValueError::InvalidValue {
            variant: "GEO_POLYGON",
            reason: if which == "exterior" {
                "exterior ring must have at least 4 points"
            } else {
                "hole ring must have at least 4 points"
            },
        });
    }
    let first = ring.first().unwrap();
    let last = ring.last().unwrap();
    if first.lat != last.lat || first.lng != last.lng {
        return Err(ValueError::InvalidValue {
            variant: "GEO_POLYGON",
            reason: "ring must be closed (first point == last point)",
        });
    }
    for p in ring {
        p.validate()?;
    }
    Ok(())
}

/// Mean-radius haversine distance in meters between two points on the
/// WGS-84 sphere (mean radius 6371 km). Antimeridian- and pole-safe: the
/// shortest great-circle arc is always used.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    // Clamp for numerical safety near antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_validates_range() {
        assert!(GeoPoint::new(37.7749, -122.4194).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 181.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn polygon_requires_closed_ring_of_at_least_four() {
        let sq = |o: f64| {
            vec![
                GeoPoint::new(0.0 + o, 0.0 + o).unwrap(),
                GeoPoint::new(0.0 + o, 1.0 + o).unwrap(),
                GeoPoint::new(1.0 + o, 1.0 + o).unwrap(),
                GeoPoint::new(0.0 + o, 0.0 + o).unwrap(),
            ]
        };
        assert!(GeoPolygon::new(sq(0.0), vec![]).is_ok());
        let open = vec![
            GeoPoint::new(0.0, 0.0).unwrap(),
            GeoPoint::new(0.0, 1.0).unwrap(),
            GeoPoint::new(1.0, 1.0).unwrap(),
        ];
        assert!(GeoPolygon::new(open, vec![]).is_err());
    }

    #[test]
    fn haversine_is_symmetric_and_zero_for_same_point() {
        let sf = GeoPoint::new(37.7749, -122.4194).unwrap();
        let la = GeoPoint::new(34.0522, -118.2437).unwrap();
        assert_eq!(haversine_meters(sf, sf), 0.0);
        assert!((haversine_meters(sf, la) - haversine_meters(la, sf)).abs() < 1e-6);
        // SF-LA is roughly 560km.
        let d = haversine_meters(sf, la);
        assert!(d > 500_000.0 && d < 650_000.0);
    }

    #[test]
    fn haversine_antimeridian_is_short_not_equatorial() {
        let a = GeoPoint::new(0.0, 179.9).unwrap();
        let b = GeoPoint::new(0.0, -179.9).unwrap();
        let d = haversine_meters(a, b);
        // Should be a short hop across the antimeridian, not ~half the equator.
        assert!(d < 50_000.0);
    }

    #[test]
    fn haversine_poles_converge() {
        let north_a = GeoPoint::new(90.0, 10.0).unwrap();
        let north_b = GeoPoint::new(90.0, -170.0).unwrap();
        assert_eq!(haversine_meters(north_a, north_b), 0.0);
    }
}
