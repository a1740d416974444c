pub mod culling;
pub mod kalman;
pub mod weighted_average;

pub use culling::cull_outliers;
pub use kalman::{Kalman1Dim, KalmanSmoother};
pub use weighted_average::{compute_position, WeightedAverage, MINIMUM_BELIEVABLE_ACCURACY};

use crate::types::Location;

/// Cull outliers, then average what is left
pub fn fuse(locations: &[Location]) -> Option<Location> {
    let kept = cull_outliers(locations)?;
    compute_position(&kept)
}
