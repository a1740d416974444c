use crate::identity::EmitterType;

pub const MINIMUM_TRUST: i64 = 0;
/// Trust needed before an emitter's coverage is used for positioning
pub const REQUIRED_TRUST: i64 = 48;
pub const MAXIMUM_TRUST: i64 = 100;

/// Fixed per-type tuning constants. Distances are in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RfCharacteristics {
    /// GPS accuracy needed before a fix may grow coverage
    pub reqd_gps_accuracy: f64,
    /// Smallest believable coverage radius
    pub minimum_range: f64,
    pub typical_range: f64,
    /// Coverage radius beyond which the emitter is assumed to have moved
    pub move_detect_distance: f64,
    pub discovery_trust: i64,
    pub incr_trust: i64,
    pub decr_trust: i64,
    /// Emitters of this type needed before a position is believed
    pub min_count: u32,
}

// 2.4 and 5 GHz share numbers. Indoor range is ~46 m and outdoor ~90 m, but
// very long detections happen in rural areas, hence the move distance.
const WLAN: RfCharacteristics = RfCharacteristics {
    reqd_gps_accuracy: 20.0,
    minimum_range: 35.0,
    typical_range: 65.0,
    move_detect_distance: 300.0,
    discovery_trust: 0,
    incr_trust: REQUIRED_TRUST / 3,
    decr_trust: 1,
    min_count: 2,
};

// Towers cover large areas in open terrain
const MOBILE: RfCharacteristics = RfCharacteristics {
    reqd_gps_accuracy: 100.0,
    minimum_range: 500.0,
    typical_range: 2_000.0,
    move_detect_distance: 100_000.0,
    discovery_trust: MAXIMUM_TRUST,
    incr_trust: MAXIMUM_TRUST,
    decr_trust: 0,
    min_count: 1,
};

// Values that keep an unknown type from ever contributing
const INVALID: RfCharacteristics = RfCharacteristics {
    reqd_gps_accuracy: 2.0,
    minimum_range: 50.0,
    typical_range: 50.0,
    move_detect_distance: 100.0,
    discovery_trust: 0,
    incr_trust: 0,
    decr_trust: 1,
    min_count: 99,
};

impl RfCharacteristics {
    pub fn of(rf_type: EmitterType) -> &'static RfCharacteristics {
        match rf_type {
            EmitterType::Wlan24Ghz | EmitterType::Wlan5Ghz => &WLAN,
            EmitterType::Mobile => &MOBILE,
            EmitterType::Invalid => &INVALID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wlan_bands_share_characteristics() {
        assert_eq!(
            RfCharacteristics::of(EmitterType::Wlan24Ghz),
            RfCharacteristics::of(EmitterType::Wlan5Ghz)
        );
        assert_eq!(RfCharacteristics::of(EmitterType::Wlan24Ghz).incr_trust, 16);
    }

    #[test]
    fn test_mobile_is_trusted_on_discovery() {
        let c = RfCharacteristics::of(EmitterType::Mobile);
        assert!(c.discovery_trust >= REQUIRED_TRUST);
        assert_eq!(c.decr_trust, 0);
        assert_eq!(c.min_count, 1);
    }

    #[test]
    fn test_invalid_never_gains_trust() {
        let c = RfCharacteristics::of(EmitterType::Invalid);
        assert_eq!(c.incr_trust, 0);
        assert_eq!(c.min_count, 99);
    }
}
