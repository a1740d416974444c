//! Constant-velocity Kalman smoothing of fused positions.
//!
//! Latitude and longitude (and altitude when present) are tracked by
//! independent two-state filters `[position, velocity]` driven by white
//! acceleration noise. Prediction advances in fixed 150 ms steps.

use nalgebra::{Matrix1x2, Matrix2, SMatrix, SVector, Vector2};

use crate::types::{Location, LocationExtras, Provider};
use crate::{cos_lat, DEG_TO_METER, METER_TO_DEG};

pub type State2 = SVector<f64, 2>;
pub type Cov2 = SMatrix<f64, 2, 2>;

const TIME_STEP_MS: i64 = 150;
const ALTITUDE_NOISE: f64 = 10.0;
/// m/s, below this the previous bearing is kept
const MOVING_THRESHOLD: f64 = 0.7;
/// Meters
const MIN_ACCURACY: f64 = 3.0;

/// One-dimensional position/velocity filter
#[derive(Clone, Debug)]
pub struct Kalman1Dim {
    x: State2,
    p: Cov2,
    f: Matrix2<f64>,
    q: Cov2,
    h: Matrix1x2<f64>,
    pred_time_ms: i64,
}

impl Kalman1Dim {
    /// # Arguments
    /// * `process_noise` - Acceleration noise in state units per s²
    /// * `time_ms` - Time of the initial state
    pub fn new(process_noise: f64, time_ms: i64) -> Self {
        let dt = TIME_STEP_MS as f64 / 1000.0;
        let n2 = process_noise * process_noise;
        let q = Cov2::new(
            n2 * dt.powi(4) / 4.0,
            n2 * dt.powi(3) / 2.0,
            n2 * dt.powi(3) / 2.0,
            n2 * dt * dt,
        );

        Kalman1Dim {
            x: State2::zeros(),
            p: q,
            f: Matrix2::new(1.0, dt, 0.0, 1.0),
            q,
            h: Matrix1x2::new(1.0, 0.0),
            pred_time_ms: time_ms,
        }
    }

    /// Reset to a known position and velocity
    pub fn set_state(&mut self, position: f64, velocity: f64, noise: f64) {
        self.x = Vector2::new(position, velocity);
        let n2 = noise * noise;
        self.p = Cov2::from_diagonal(&Vector2::new(n2, n2));
    }

    /// Advance in whole steps up to `time_ms`
    pub fn predict(&mut self, time_ms: i64) {
        while time_ms - self.pred_time_ms > TIME_STEP_MS {
            self.pred_time_ms += TIME_STEP_MS;
            self.x = self.f * self.x;
            self.p = self.f * self.p * self.f.transpose() + self.q;
        }
    }

    /// Fold in a position measurement with standard deviation `noise`
    pub fn update(&mut self, position: f64, noise: f64) {
        let y = position - (self.h * self.x)[0];
        let s = (self.h * self.p * self.h.transpose())[0] + noise * noise;
        if s <= 0.0 {
            return;
        }
        let k: Vector2<f64> = self.p * self.h.transpose() / s;

        self.x += k * y;
        self.p = (Matrix2::identity() - k * self.h) * self.p;
    }

    pub fn position(&self) -> f64 {
        self.x[0]
    }

    /// State units per second
    pub fn velocity(&self) -> f64 {
        self.x[1]
    }

    /// One-sigma position uncertainty
    pub fn accuracy(&self) -> f64 {
        self.p[(0, 0)].max(0.0).sqrt()
    }
}

/// Smoother over successive fused locations
#[derive(Clone, Debug)]
pub struct KalmanSmoother {
    lat: Kalman1Dim,
    lon: Kalman1Dim,
    alt: Option<Kalman1Dim>,
    bearing: f64,
    samples: u64,
    last_update_ms: i64,
}

impl KalmanSmoother {
    /// Start tracking at `location`
    ///
    /// # Arguments
    /// * `coordinate_noise_m` - Horizontal acceleration noise, meters per s²
    pub fn new(location: &Location, coordinate_noise_m: f64) -> Self {
        let noise_deg = coordinate_noise_m * METER_TO_DEG;
        let time_ms = location.time_ms;

        let mut lat = Kalman1Dim::new(noise_deg, time_ms);
        lat.set_state(location.latitude, 0.0, location.accuracy * METER_TO_DEG);

        let mut lon = Kalman1Dim::new(noise_deg, time_ms);
        lon.set_state(location.longitude, 0.0, lon_noise(location));

        let alt = location.altitude.map(|altitude| {
            let mut alt = Kalman1Dim::new(ALTITUDE_NOISE, time_ms);
            alt.set_state(altitude, 0.0, location.accuracy);
            alt
        });

        KalmanSmoother {
            lat,
            lon,
            alt,
            bearing: 0.0,
            samples: 1,
            last_update_ms: time_ms,
        }
    }

    pub fn update(&mut self, location: &Location) {
        self.predict(location.time_ms);
        self.last_update_ms = location.time_ms;
        self.samples += 1;

        self.lat.update(location.latitude, location.accuracy * METER_TO_DEG);
        self.lon.update(location.longitude, lon_noise(location));

        if let Some(altitude) = location.altitude {
            match self.alt.as_mut() {
                Some(alt) => alt.update(altitude, location.accuracy),
                None => {
                    let mut alt = Kalman1Dim::new(ALTITUDE_NOISE, location.time_ms);
                    alt.set_state(altitude, 0.0, location.accuracy);
                    self.alt = Some(alt);
                }
            }
        }
    }

    fn predict(&mut self, time_ms: i64) {
        self.lat.predict(time_ms);
        self.lon.predict(time_ms);
        if let Some(alt) = self.alt.as_mut() {
            alt.predict(time_ms);
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn last_update_ms(&self) -> i64 {
        self.last_update_ms
    }

    /// Smoothed location predicted forward to `now_ms`
    ///
    /// Accuracy grows with every prediction step past the last update;
    /// read at [`last_update_ms`](Self::last_update_ms) for the filtered value.
    pub fn location(&mut self, now_ms: i64) -> Location {
        self.predict(now_ms);

        let latitude = self.lat.position();
        let north = self.lat.velocity() * DEG_TO_METER;
        let east = self.lon.velocity() * DEG_TO_METER * cos_lat(latitude);
        let speed = north.hypot(east);
        if speed > MOVING_THRESHOLD {
            // Compass bearing, clockwise from north
            self.bearing = east.atan2(north).to_degrees().rem_euclid(360.0);
        }

        Location {
            latitude,
            longitude: self.lon.position(),
            accuracy: (self.lat.accuracy() * DEG_TO_METER).max(MIN_ACCURACY),
            time_ms: now_ms,
            provider: Provider::Fused,
            altitude: self.alt.as_ref().map(Kalman1Dim::position),
            speed: Some(speed),
            bearing: Some(self.bearing),
            extras: LocationExtras {
                averaged_of: Some(self.samples),
                ..LocationExtras::default()
            },
        }
    }
}

fn lon_noise(location: &Location) -> f64 {
    location.accuracy * cos_lat(location.latitude) * METER_TO_DEG
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn fused(lat: f64, lon: f64, acc: f64, time_ms: i64) -> Location {
        Location::new(lat, lon, acc, time_ms, Provider::Fused).unwrap()
    }

    #[test]
    fn test_predict_in_fixed_steps() {
        let mut k = Kalman1Dim::new(1.0, 0);
        k.set_state(0.0, 2.0, 1.0);
        // 1000 ms -> six full 150 ms steps (900 ms), the remainder waits
        k.predict(1_000);
        assert_relative_eq!(k.position(), 2.0 * 0.9, epsilon = 1e-12);
        assert_relative_eq!(k.velocity(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_update_moves_toward_measurement() {
        let mut k = Kalman1Dim::new(1.0, 0);
        k.set_state(0.0, 0.0, 10.0);
        k.update(10.0, 1.0);
        assert!(k.position() > 9.0 && k.position() < 10.0);
        assert!(k.accuracy() < 1.0);
    }

    #[test]
    fn test_stationary_fixes_converge() {
        let first = fused(48.0, 11.0, 30.0, 0);
        let mut smoother = KalmanSmoother::new(&first, 6.0);
        for i in 1..20 {
            smoother.update(&fused(48.0, 11.0, 30.0, i * 2_700));
        }
        let at_update = smoother.last_update_ms();
        assert_eq!(at_update, 19 * 2_700);
        let out = smoother.location(at_update);
        assert_abs_diff_eq!(out.latitude, 48.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.longitude, 11.0, epsilon = 1e-6);
        assert!(out.accuracy < 30.0, "accuracy {}", out.accuracy);
        assert!(out.accuracy >= MIN_ACCURACY);
        assert_eq!(out.extras.averaged_of, Some(20));
        assert_eq!(out.bearing, Some(0.0));

        // Predicting a period ahead only widens the estimate
        let ahead = smoother.location(at_update + 2_700);
        assert!(ahead.accuracy > out.accuracy);
        assert_abs_diff_eq!(ahead.latitude, 48.0, epsilon = 1e-6);
    }

    #[test]
    fn test_moving_north_gives_north_bearing() {
        let mut smoother = KalmanSmoother::new(&fused(48.0, 11.0, 10.0, 0), 6.0);
        // ~10 m/s north
        for i in 1..30i64 {
            let lat = 48.0 + (i as f64 * 27.0) * METER_TO_DEG;
            smoother.update(&fused(lat, 11.0, 10.0, i * 2_700));
        }
        let out = smoother.location(30 * 2_700);
        assert!(out.speed.unwrap() > 5.0);
        let bearing = out.bearing.unwrap();
        assert!(bearing < 10.0 || bearing > 350.0, "bearing {}", bearing);
    }

    #[test]
    fn test_altitude_tracked_when_present() {
        let mut first = fused(48.0, 11.0, 20.0, 0);
        first.altitude = Some(520.0);
        let mut smoother = KalmanSmoother::new(&first, 6.0);
        let out = smoother.location(1_000);
        assert_relative_eq!(out.altitude.unwrap(), 520.0, epsilon = 1e-9);

        let mut plain = KalmanSmoother::new(&fused(48.0, 11.0, 20.0, 0), 6.0);
        assert!(plain.location(1_000).altitude.is_none());
    }
}
