//! Typed value model and branded identifiers (spec §2, §3, §4.1, §4.2).

pub mod geo;
pub mod ids;
mod value;

pub use geo::{haversine_meters, GeoLineString, GeoPoint, GeoPolygon};
pub use ids::{EntityId, IdentifierError, Namespace, Predicate, TransactionId};
pub use value::{Value, ValueError};
