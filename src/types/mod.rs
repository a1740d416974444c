use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, Result};
use crate::identity::{EmitterType, RfIdentification};
use crate::{MAXIMUM_ASU, MINIMUM_ASU};

/// Where a location came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gps,
    /// Coverage center of a single emitter
    Emitter,
    /// Output of the weighted average (optionally smoothed)
    #[default]
    Fused,
}

/// Radio family of a scan, each throttled on its own schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioKind {
    Wlan,
    Mobile,
}

/// Metadata carried alongside a location
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationExtras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_type: Option<EmitterType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<u32>,
    /// Number of sources behind a fused location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averaged_of: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub accuracy: f64,
    pub time_ms: i64,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub extras: LocationExtras,
}

impl Location {
    /// Validated constructor; NaN, out-of-range coordinates and negative
    /// accuracy are rejected.
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, time_ms: i64, provider: Provider) -> Result<Self> {
        let location = Location {
            latitude,
            longitude,
            accuracy,
            time_ms,
            provider,
            altitude: None,
            speed: None,
            bearing: None,
            extras: LocationExtras::default(),
        };
        location.validate()?;
        Ok(location)
    }

    /// GPS fix shorthand
    pub fn gps(latitude: f64, longitude: f64, accuracy: f64, time_ms: i64) -> Result<Self> {
        Self::new(latitude, longitude, accuracy, time_ms, Provider::Gps)
    }

    pub fn validate(&self) -> Result<()> {
        let ok = self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy >= 0.0;
        if ok {
            Ok(())
        } else {
            Err(LocatorError::InvalidCoordinates {
                lat: self.latitude,
                lon: self.longitude,
                accuracy: self.accuracy,
            })
        }
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &Location) -> f64 {
        crate::distance_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    pub fn not_null_island(&self) -> bool {
        crate::not_null_island(self.latitude, self.longitude)
    }
}

/// One emitter heard in one scan
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    ident: RfIdentification,
    asu: i32,
    note: String,
    time_ms: i64,
}

impl Observation {
    pub fn new(ident: RfIdentification, asu: i32, time_ms: i64) -> Self {
        Observation {
            ident,
            asu: clamp_asu(asu),
            note: String::new(),
            time_ms,
        }
    }

    /// Attach a free-text label (the SSID for WLAN)
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// LTE reports ASU on a 0..=97 scale
    pub fn from_lte_asu(ident: RfIdentification, lte_asu: i32, time_ms: i64) -> Self {
        Self::new(ident, lte_asu.clamp(0, 97) * MAXIMUM_ASU / 97, time_ms)
    }

    pub fn ident(&self) -> &RfIdentification {
        &self.ident
    }

    pub fn asu(&self) -> i32 {
        self.asu
    }

    pub fn set_asu(&mut self, asu: i32) {
        self.asu = clamp_asu(asu);
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }
}

fn clamp_asu(asu: i32) -> i32 {
    asu.clamp(MINIMUM_ASU, MAXIMUM_ASU)
}
