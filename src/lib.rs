//! Emitter memory and position fusion.
//!
//! Radio emitters (WiFi access points, cell towers) are remembered together
//! with the area they have been heard in. When a set of emitters is visible
//! again, their remembered coverage is fused into a position estimate, and a
//! trusted GPS fix (when present) grows that memory.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod coverage;
pub mod emitter;
pub mod error;
pub mod fusion;
pub mod identity;
pub mod store;
pub mod types;

use geo::{HaversineDistance, Point};

pub use cache::{Cache, CacheSyncReport};
pub use config::{CacheConfig, EngineConfig, Smoothing};
pub use coordinator::{Coordinator, CycleProcessor, LocationSink, ScanRequest, WorkItem};
pub use coverage::BoundingBox;
pub use emitter::{Blacklist, BlacklistRule, EmitterStatus, RfCharacteristics, RfEmitter};
pub use error::{LocatorError, Result, StoreError};
pub use identity::{EmitterType, RfIdentification};
pub use store::{EmitterRecord, EmitterStore, FileStore};
pub use types::{Location, LocationExtras, Observation, Provider, RadioKind};

/// Meters per degree of latitude
pub const DEG_TO_METER: f64 = 111_225.0;
pub const METER_TO_DEG: f64 = 1.0 / DEG_TO_METER;

/// Floor for cos(latitude) wherever longitude spans are divided by it
pub const MIN_COS: f64 = 0.01;

/// Signal strength range shared by every emitter type
pub const MINIMUM_ASU: i32 = 1;
pub const MAXIMUM_ASU: i32 = 31;

/// Positions closer than this to (0, 0) are treated as bogus
pub const NULL_ISLAND_DISTANCE: f64 = 1000.0;

/// Great-circle distance in meters between two (lat, lon) pairs
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // geo points are (x = lon, y = lat)
    Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2))
}

/// True when the position is far enough from (0, 0) to be believable
pub fn not_null_island(lat: f64, lon: f64) -> bool {
    distance_m(0.0, 0.0, lat, lon) > NULL_ISLAND_DISTANCE
}

/// cos(latitude) floored at `MIN_COS`
pub fn cos_lat(lat_deg: f64) -> f64 {
    lat_deg.to_radians().cos().max(MIN_COS)
}
