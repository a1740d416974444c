use serde::{Deserialize, Serialize};

use crate::{cos_lat, DEG_TO_METER, METER_TO_DEG};

/// Believed coverage area of an emitter
///
/// Edges are in degrees, derived radii in meters. An empty box has its edges
/// inverted so that the first `update` always grows it.
///
/// # Invariants
/// - center is the midpoint of the edges
/// - `radius_ew` is measured at the center latitude (cosine floored at `MIN_COS`)
/// - `radius = hypot(radius_ns, radius_ew)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
    center_lat: f64,
    center_lon: f64,
    radius: f64,
    radius_ns: f64,
    radius_ew: f64,
}

impl BoundingBox {
    /// Empty box with no coverage
    pub fn empty() -> Self {
        BoundingBox {
            north: -91.0,
            south: 91.0,
            east: -181.0,
            west: 181.0,
            center_lat: 0.0,
            center_lon: 0.0,
            radius: 0.0,
            radius_ns: 0.0,
            radius_ew: 0.0,
        }
    }

    /// Box around a point with the same radius in both axes
    pub fn around(lat: f64, lon: f64, radius_m: f64) -> Self {
        let mut bb = Self::empty();
        bb.update_from_center_radius(lat, lon, radius_m, radius_m);
        bb
    }

    /// Box rebuilt from a stored center and per-axis radii
    pub fn from_center_radii(lat: f64, lon: f64, radius_ns: f64, radius_ew: f64) -> Self {
        let mut bb = Self::empty();
        bb.update_from_center_radius(lat, lon, radius_ns, radius_ew);
        bb
    }

    /// Grow the box to include a point
    ///
    /// # Returns
    /// `true` when any edge moved
    pub fn update(&mut self, lat: f64, lon: f64) -> bool {
        let mut grew = false;
        if lat > self.north {
            self.north = lat;
            grew = true;
        }
        if lat < self.south {
            self.south = lat;
            grew = true;
        }
        if lon > self.east {
            self.east = lon;
            grew = true;
        }
        if lon < self.west {
            self.west = lon;
            grew = true;
        }

        if grew {
            self.center_lat = (self.north + self.south) / 2.0;
            self.center_lon = (self.east + self.west) / 2.0;
            self.radius_ns = (self.north - self.center_lat) * DEG_TO_METER;
            self.radius_ew = (self.east - self.center_lon) * DEG_TO_METER / cos_lat(self.center_lat);
            self.radius = self.radius_ns.hypot(self.radius_ew);
        }
        grew
    }

    /// Grow the box to include a rectangle given by center and radii in meters
    ///
    /// Both opposite corners are always applied.
    pub fn update_from_center_radius(&mut self, lat: f64, lon: f64, radius_ns: f64, radius_ew: f64) -> bool {
        let d_lat = radius_ns * METER_TO_DEG;
        let d_lon = radius_ew * METER_TO_DEG * lat.to_radians().cos();

        let grew_nw = self.update(lat + d_lat, lon - d_lon);
        let grew_se = self.update(lat - d_lat, lon + d_lon);
        grew_nw || grew_se
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn center_lat(&self) -> f64 {
        self.center_lat
    }

    pub fn center_lon(&self) -> f64 {
        self.center_lon
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn radius_ns(&self) -> f64 {
        self.radius_ns
    }

    pub fn radius_ew(&self) -> f64 {
        self.radius_ew
    }

    /// Closed containment test against the edges
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    pub fn is_empty(&self) -> bool {
        self.north < self.south
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}
