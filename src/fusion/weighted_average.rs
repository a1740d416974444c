use crate::types::{Location, LocationExtras, Provider};
use crate::{cos_lat, DEG_TO_METER, METER_TO_DEG, MINIMUM_ASU};

/// Smallest accuracy ever claimed for a fused position, meters
pub const MINIMUM_BELIEVABLE_ACCURACY: f64 = 15.0;

/// Incremental weighted mean of one axis with its standard deviation
///
/// Pooled σ = sqrt(Σ(w²σ²) / Σw²)
#[derive(Clone, Debug, Default)]
struct AxisEstimate {
    w_sum: f64,
    w_sum2: f64,
    mean: f64,
    sd_accum: f64,
}

impl AxisEstimate {
    fn add(&mut self, x: f64, sd: f64, weight: f64) {
        self.w_sum += weight;
        self.w_sum2 += weight * weight;
        self.mean += (weight / self.w_sum) * (x - self.mean);
        self.sd_accum += weight * weight * sd * sd;
    }

    fn std_dev(&self) -> f64 {
        (self.sd_accum / self.w_sum2).sqrt()
    }
}

/// Signal-weighted average of emitter locations
///
/// Each source is weighted by `asu / accuracy`; its accuracy is taken as a
/// two-sigma radius.
#[derive(Clone, Debug, Default)]
pub struct WeightedAverage {
    lat: AxisEstimate,
    lon: AxisEstimate,
    count: u64,
    time_ms: i64,
    /// Kept while only one source has been added
    single: Option<Location>,
}

impl WeightedAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, loc: &Location) {
        let asu = loc.extras.asu.unwrap_or(MINIMUM_ASU).max(MINIMUM_ASU) as f64;
        // Guard a zero accuracy; emitter locations are floored at their minimum range
        let accuracy = loc.accuracy.max(1.0);
        let weight = asu / accuracy;

        let sd = accuracy * METER_TO_DEG / 2.0;
        self.lat.add(loc.latitude, sd, weight);
        self.lon.add(loc.longitude, sd * cos_lat(loc.latitude), weight);

        self.single = if self.count == 0 { Some(loc.clone()) } else { None };
        self.count += 1;
        self.time_ms = self.time_ms.max(loc.time_ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Fused position, `None` before any source was added
    pub fn result(&self) -> Option<Location> {
        if self.count == 0 {
            return None;
        }

        let (latitude, longitude, accuracy) = match &self.single {
            // One source: its own center and radius
            Some(only) => (only.latitude, only.longitude, only.accuracy),
            None => {
                let lat = self.lat.mean;
                let sd_lat_m = self.lat.std_dev() * DEG_TO_METER;
                let sd_lon_m = self.lon.std_dev() * DEG_TO_METER * cos_lat(lat);
                (lat, self.lon.mean, sd_lat_m.hypot(sd_lon_m))
            }
        };

        Some(Location {
            latitude,
            longitude,
            accuracy: accuracy.max(MINIMUM_BELIEVABLE_ACCURACY),
            time_ms: self.time_ms,
            provider: Provider::Fused,
            altitude: None,
            speed: None,
            bearing: None,
            extras: LocationExtras {
                averaged_of: Some(self.count),
                ..LocationExtras::default()
            },
        })
    }
}

/// Weighted average of a set of locations
pub fn compute_position<'a>(locations: impl IntoIterator<Item = &'a Location>) -> Option<Location> {
    let mut avg = WeightedAverage::new();
    for loc in locations {
        avg.add(loc);
    }
    avg.result()
}
