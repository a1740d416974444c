pub mod blacklist;
pub mod characteristics;

pub use blacklist::{Blacklist, BlacklistRule};
pub use characteristics::{RfCharacteristics, MAXIMUM_TRUST, MINIMUM_TRUST, REQUIRED_TRUST};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::coverage::BoundingBox;
use crate::error::StoreError;
use crate::identity::RfIdentification;
use crate::store::{EmitterRecord, EmitterStore, StoreResult};
use crate::types::{Location, LocationExtras, Observation, Provider};

/// Persistence state of an emitter relative to the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterStatus {
    /// Not in the store, no coverage yet
    Unknown,
    /// Has coverage, not yet in the store
    New,
    /// In the store with unsaved changes
    Changed,
    /// In the store, unchanged
    Cached,
    /// Known to move; never used and removed from the store
    Blacklisted,
}

impl EmitterStatus {
    /// Legal state transitions. Anything else is ignored.
    pub fn can_become(self, next: EmitterStatus) -> bool {
        use EmitterStatus::*;
        match self {
            Unknown => matches!(next, Blacklisted | Cached | New),
            New => matches!(next, Blacklisted | Cached),
            Cached | Changed => matches!(next, Blacklisted | Cached | Changed),
            Blacklisted => false,
        }
    }
}

/// Everything known about one emitter: trust, coverage and persistence state
///
/// Instances live in the [`Cache`](crate::cache::Cache) working set and are
/// written back to the store in batches.
#[derive(Clone, Debug)]
pub struct RfEmitter {
    ident: RfIdentification,
    characteristics: &'static RfCharacteristics,
    trust: i64,
    coverage: Option<BoundingBox>,
    note: String,
    status: EmitterStatus,
    last_observation: Option<Observation>,
    age: u32,
    blacklist: Arc<Blacklist>,
}

impl RfEmitter {
    /// Fresh emitter, not yet in the store
    pub fn new(ident: RfIdentification, blacklist: Arc<Blacklist>) -> Self {
        let characteristics = RfCharacteristics::of(ident.rf_type());
        RfEmitter {
            ident,
            characteristics,
            trust: characteristics.discovery_trust,
            coverage: None,
            note: String::new(),
            status: EmitterStatus::Unknown,
            last_observation: None,
            age: 0,
            blacklist,
        }
    }

    /// Emitter loaded from a stored row
    pub fn from_record(
        ident: RfIdentification,
        record: &EmitterRecord,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        let mut emitter = Self::new(ident, blacklist);
        emitter.update_info(record);
        emitter
    }

    pub fn ident(&self) -> &RfIdentification {
        &self.ident
    }

    pub fn unique_id(&self) -> &str {
        self.ident.unique_id()
    }

    pub fn characteristics(&self) -> &'static RfCharacteristics {
        self.characteristics
    }

    pub fn trust(&self) -> i64 {
        self.trust
    }

    pub fn status(&self) -> EmitterStatus {
        self.status
    }

    pub fn coverage(&self) -> Option<&BoundingBox> {
        self.coverage.as_ref()
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn reset_age(&mut self) {
        self.age = 0;
    }

    pub fn increment_age(&mut self) {
        self.age = self.age.saturating_add(1);
    }

    /// Coverage radius in meters, 0 without coverage
    pub fn radius(&self) -> f64 {
        self.coverage.as_ref().map_or(0.0, BoundingBox::radius)
    }

    fn change_status(&mut self, next: EmitterStatus, reason: &str) -> bool {
        if self.status == next || !self.status.can_become(next) {
            return false;
        }
        debug!(
            "{} status {:?} -> {:?} ({})",
            self.ident, self.status, next, reason
        );
        self.status = next;
        true
    }

    fn can_update(&self) -> bool {
        !matches!(
            self.status,
            EmitterStatus::Unknown | EmitterStatus::Blacklisted
        )
    }

    /// Record the latest observation. Its note goes through [`set_note`](Self::set_note).
    pub fn set_last_observation(&mut self, observation: Observation) {
        let note = observation.note().to_string();
        self.last_observation = Some(observation);
        self.set_note(&note);
    }

    /// Store a new note. A note matching the blacklist blacklists the emitter
    /// regardless of its current state.
    pub fn set_note(&mut self, note: &str) {
        if self.note == note {
            return;
        }
        self.note = note.to_string();
        self.check_blacklist("set_note");
    }

    /// Blacklist the emitter if its current note matches a rule
    fn check_blacklist(&mut self, reason: &str) {
        if let Some(rule) = self.blacklist.find_match(&self.ident, &self.note) {
            info!("{} blacklisted by {:?} (note '{}')", self.ident, rule, self.note);
            self.change_status(EmitterStatus::Blacklisted, reason);
        }
    }

    pub fn increment_trust(&mut self) {
        if !self.can_update() {
            return;
        }
        let next = (self.trust + self.characteristics.incr_trust).clamp(MINIMUM_TRUST, MAXIMUM_TRUST);
        if next != self.trust {
            self.trust = next;
            self.change_status(EmitterStatus::Changed, "increment_trust");
        }
    }

    pub fn decrement_trust(&mut self) {
        if !self.can_update() {
            return;
        }
        let next = (self.trust - self.characteristics.decr_trust).clamp(MINIMUM_TRUST, MAXIMUM_TRUST);
        if next != self.trust {
            self.trust = next;
            self.change_status(EmitterStatus::Changed, "decrement_trust");
        }
    }

    /// Grow coverage from a trusted GPS fix
    ///
    /// # Arguments
    /// * `gps` - Trusted fix, ignored when absent, invalid (NaN or out of
    ///   range), or less accurate than this emitter type requires
    ///
    /// A fix that stretches coverage to `move_detect_distance` or more means
    /// the emitter has moved: coverage restarts at the fix and trust drops to
    /// the discovery value.
    pub fn update_location(&mut self, gps: Option<&Location>) {
        if self.status == EmitterStatus::Blacklisted {
            return;
        }
        let fix = match gps {
            Some(fix) if fix.validate().is_ok() && fix.accuracy <= self.characteristics.reqd_gps_accuracy => fix,
            _ => return,
        };

        if self.coverage.is_none() {
            self.coverage = Some(BoundingBox::around(fix.latitude, fix.longitude, 0.0));
            self.change_status(EmitterStatus::New, "first fix");
            return;
        }

        let Some(coverage) = self.coverage.as_mut() else {
            return;
        };
        if !coverage.update(fix.latitude, fix.longitude) {
            return;
        }

        if coverage.radius() >= self.characteristics.move_detect_distance {
            info!(
                "{} moved: coverage radius {:.0} m >= {:.0} m",
                self.ident,
                coverage.radius(),
                self.characteristics.move_detect_distance
            );
            *coverage = BoundingBox::around(fix.latitude, fix.longitude, 0.0);
            self.trust = self.characteristics.discovery_trust;
            self.change_status(EmitterStatus::Changed, "moved");
        } else {
            self.change_status(EmitterStatus::Changed, "coverage grew");
        }
    }

    /// Position estimate from this emitter's coverage, if it may be used
    ///
    /// # Returns
    /// `None` unless the emitter has been observed, is trusted, is not
    /// blacklisted, has coverage, and its center is away from null island.
    pub fn location(&self) -> Option<Location> {
        let observation = self.last_observation.as_ref()?;
        if self.trust < REQUIRED_TRUST || self.status == EmitterStatus::Blacklisted {
            return None;
        }
        let coverage = self.coverage.as_ref()?;
        if !crate::not_null_island(coverage.center_lat(), coverage.center_lon()) {
            return None;
        }

        Some(Location {
            latitude: coverage.center_lat(),
            longitude: coverage.center_lon(),
            accuracy: coverage.radius().max(self.characteristics.minimum_range),
            time_ms: observation.time_ms(),
            provider: Provider::Emitter,
            altitude: None,
            speed: None,
            bearing: None,
            extras: LocationExtras {
                rf_id: Some(self.ident.rf_id().to_string()),
                rf_type: Some(self.ident.rf_type()),
                asu: Some(observation.asu()),
                min_count: Some(self.characteristics.min_count),
                averaged_of: None,
            },
        })
    }

    pub fn sync_needed(&self) -> bool {
        match self.status {
            EmitterStatus::New | EmitterStatus::Changed => true,
            EmitterStatus::Blacklisted => self.coverage.is_some(),
            EmitterStatus::Unknown | EmitterStatus::Cached => false,
        }
    }

    /// Write pending changes to the store
    ///
    /// On error the status is left as it was so the next sync retries.
    pub fn sync<S: EmitterStore + ?Sized>(&mut self, store: &mut S) -> StoreResult<()> {
        match self.status {
            EmitterStatus::Unknown | EmitterStatus::Cached => {}
            EmitterStatus::Blacklisted => {
                if self.coverage.is_some() {
                    store.delete(&self.ident)?;
                    self.coverage = None;
                    debug!("{} blacklisted, dropped from store", self.ident);
                }
            }
            EmitterStatus::New => {
                if let Some(record) = self.to_record() {
                    match store.insert(&record) {
                        Err(StoreError::DuplicateKey(_)) => store.update(&record)?,
                        other => other?,
                    }
                }
                self.change_status(EmitterStatus::Cached, "inserted");
            }
            EmitterStatus::Changed => {
                if self.trust <= MINIMUM_TRUST {
                    debug!("{} trust exhausted, dropped from store", self.ident);
                    store.delete(&self.ident)?;
                } else if let Some(record) = self.to_record() {
                    store.update(&record)?;
                }
                self.change_status(EmitterStatus::Cached, "updated");
            }
        }
        Ok(())
    }

    /// Take trust, note and (when missing) coverage from a stored row
    ///
    /// The stored note is checked against the current blacklist, so rules
    /// added after the row was written still apply.
    pub fn update_info(&mut self, record: &EmitterRecord) {
        if self.coverage.is_none() {
            self.coverage = Some(record.coverage());
        }
        self.trust = record.trust.clamp(MINIMUM_TRUST, MAXIMUM_TRUST);
        self.note = record.note.clone();
        self.change_status(EmitterStatus::Cached, "loaded");
        self.check_blacklist("stored note");
    }

    /// Store row for this emitter, `None` without coverage
    pub fn to_record(&self) -> Option<EmitterRecord> {
        let coverage = self.coverage.as_ref()?;
        Some(EmitterRecord {
            unique_id: self.ident.unique_id().to_string(),
            rf_id: self.ident.rf_id().to_string(),
            rf_type: self.ident.rf_type(),
            trust: self.trust,
            latitude: coverage.center_lat(),
            longitude: coverage.center_lon(),
            radius_ns: coverage.radius_ns(),
            radius_ew: coverage.radius_ew(),
            note: self.note.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EmitterType;
    use crate::store::FileStore;
    use crate::DEG_TO_METER;
    use approx::assert_relative_eq;

    fn wlan_emitter() -> RfEmitter {
        let id = RfIdentification::new("00:11:22:33:44:55", EmitterType::Wlan24Ghz).unwrap();
        RfEmitter::new(id, Arc::new(Blacklist::default()))
    }

    fn tower() -> RfEmitter {
        let id = RfIdentification::new("GSM/262/1/100/200", EmitterType::Mobile).unwrap();
        RfEmitter::new(id, Arc::new(Blacklist::default()))
    }

    fn fix(lat: f64, lon: f64, acc: f64) -> Location {
        Location::gps(lat, lon, acc, 1_000).unwrap()
    }

    fn observe(e: &mut RfEmitter, note: &str) {
        let obs = Observation::new(e.ident().clone(), 20, 5_000).with_note(note);
        e.set_last_observation(obs);
    }

    #[test]
    fn test_transition_table() {
        use EmitterStatus::*;
        assert!(Unknown.can_become(New));
        assert!(!Unknown.can_become(Changed));
        assert!(!New.can_become(Changed));
        assert!(Cached.can_become(Changed));
        for s in [Unknown, New, Changed, Cached] {
            assert!(!Blacklisted.can_become(s));
        }
    }

    #[test]
    fn test_first_fix_seeds_coverage() {
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 10.0)));
        assert_eq!(e.status(), EmitterStatus::New);
        let bb = e.coverage().unwrap();
        assert_eq!(bb.center_lat(), 48.0);
        assert_eq!(bb.radius(), 0.0);
    }

    #[test]
    fn test_inaccurate_or_missing_fix_ignored() {
        let mut e = wlan_emitter();
        e.update_location(None);
        e.update_location(Some(&fix(48.0, 11.0, 25.0)));
        assert!(e.coverage().is_none());
        assert_eq!(e.status(), EmitterStatus::Unknown);
    }

    #[test]
    fn test_move_detection_resets_coverage_and_trust() {
        let mut e = wlan_emitter();
        let record = EmitterRecord {
            unique_id: e.unique_id().to_string(),
            rf_id: e.ident().rf_id().to_string(),
            rf_type: EmitterType::Wlan24Ghz,
            trust: 80,
            latitude: 48.0,
            longitude: 11.0,
            radius_ns: 0.0,
            radius_ew: 0.0,
            note: String::new(),
        };
        e.update_info(&record);
        assert_eq!(e.status(), EmitterStatus::Cached);

        // Small growth keeps trust
        e.update_location(Some(&fix(48.0005, 11.0, 5.0)));
        assert_eq!(e.status(), EmitterStatus::Changed);
        assert_eq!(e.trust(), 80);

        // 700 m north stretches the half-span past 300 m
        let far = 48.0 + 700.0 / DEG_TO_METER;
        e.update_location(Some(&fix(far, 11.0, 5.0)));
        assert_eq!(e.trust(), 0);
        let bb = e.coverage().unwrap();
        assert_eq!(bb.radius(), 0.0);
        assert_relative_eq!(bb.center_lat(), far, epsilon = 1e-12);
        assert_eq!(e.status(), EmitterStatus::Changed);
    }

    #[test]
    fn test_trust_bounds() {
        let mut e = tower();
        e.update_location(Some(&fix(48.0, 11.0, 50.0)));
        for _ in 0..10 {
            e.increment_trust();
        }
        assert_eq!(e.trust(), MAXIMUM_TRUST);

        let mut w = wlan_emitter();
        w.update_location(Some(&fix(48.0, 11.0, 5.0)));
        for _ in 0..10 {
            w.increment_trust();
        }
        assert_eq!(w.trust(), MAXIMUM_TRUST);
        for _ in 0..500 {
            w.decrement_trust();
        }
        assert_eq!(w.trust(), MINIMUM_TRUST);
    }

    #[test]
    fn test_unknown_emitter_trust_frozen() {
        let mut e = wlan_emitter();
        e.increment_trust();
        assert_eq!(e.trust(), 0);
        assert_eq!(e.status(), EmitterStatus::Unknown);
    }

    #[test]
    fn test_blacklisted_is_terminal() {
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        observe(&mut e, "Jane's iPhone");
        assert_eq!(e.status(), EmitterStatus::Blacklisted);

        e.update_location(Some(&fix(48.001, 11.0, 5.0)));
        e.increment_trust();
        observe(&mut e, "HomeNet");
        assert_eq!(e.status(), EmitterStatus::Blacklisted);
        assert!(e.location().is_none());
        assert!(e.sync_needed());
    }

    #[test]
    fn test_location_requires_trust_and_observation() {
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        assert!(e.location().is_none());

        observe(&mut e, "HomeNet");
        e.increment_trust();
        e.increment_trust();
        assert!(e.location().is_none(), "trust 32 is below 48");
        e.increment_trust();

        let loc = e.location().unwrap();
        assert_eq!(loc.accuracy, 35.0);
        assert_eq!(loc.time_ms, 5_000);
        assert_eq!(loc.provider, Provider::Emitter);
        assert_eq!(loc.extras.asu, Some(20));
        assert_eq!(loc.extras.min_count, Some(2));
        assert_eq!(loc.extras.rf_type, Some(EmitterType::Wlan24Ghz));
    }

    #[test]
    fn test_null_island_location_suppressed() {
        let mut e = tower();
        e.update_location(Some(&fix(0.001, 0.001, 50.0)));
        observe(&mut e, "");
        assert!(e.trust() >= REQUIRED_TRUST);
        assert!(e.location().is_none());
    }

    #[test]
    fn test_sync_lifecycle() {
        let mut store = FileStore::in_memory();
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        assert!(e.sync_needed());

        e.sync(&mut store).unwrap();
        assert_eq!(e.status(), EmitterStatus::Cached);
        assert!(store.get(e.ident()).unwrap().is_some());

        e.update_location(Some(&fix(48.0002, 11.0, 5.0)));
        e.increment_trust();
        e.sync(&mut store).unwrap();
        let row = store.get(e.ident()).unwrap().unwrap();
        assert_eq!(row.trust, 16);
        assert!(row.radius_ns > 0.0);

        observe(&mut e, "AndroidAP");
        e.sync(&mut store).unwrap();
        assert!(store.get(e.ident()).unwrap().is_none());
        assert!(e.coverage().is_none());
        assert!(!e.sync_needed());
    }

    #[test]
    fn test_stored_note_checked_against_current_rules() {
        let mut store = FileStore::in_memory();
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        observe(&mut e, "Baltic FerryNet");
        e.sync(&mut store).unwrap();
        let record = store.get(e.ident()).unwrap().unwrap();

        // A rule added after the row was written
        let mut blacklist = Blacklist::default();
        blacklist.push(BlacklistRule::Contains("ferrynet".to_string()));
        let mut loaded = RfEmitter::from_record(e.ident().clone(), &record, Arc::new(blacklist));
        assert_eq!(loaded.status(), EmitterStatus::Blacklisted);

        observe(&mut loaded, "Baltic FerryNet");
        loaded.increment_trust();
        assert!(loaded.location().is_none());
        assert!(loaded.sync_needed());
        loaded.sync(&mut store).unwrap();
        assert!(store.get(e.ident()).unwrap().is_none());
    }

    #[test]
    fn test_nan_fix_ignored() {
        let mut e = wlan_emitter();
        let mut bad = fix(48.0, 11.0, 5.0);
        bad.latitude = f64::NAN;
        e.update_location(Some(&bad));
        assert!(e.coverage().is_none());
        assert_eq!(e.status(), EmitterStatus::Unknown);
        assert!(!e.sync_needed());

        // Existing coverage is not disturbed either
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        bad.longitude = f64::INFINITY;
        e.update_location(Some(&bad));
        let bb = e.coverage().unwrap();
        assert_eq!(bb.center_lat(), 48.0);
        assert_eq!(bb.center_lon(), 11.0);
    }

    #[test]
    fn test_exhausted_trust_dropped_on_sync() {
        let mut store = FileStore::in_memory();
        let mut e = wlan_emitter();
        e.update_location(Some(&fix(48.0, 11.0, 5.0)));
        e.increment_trust();
        e.sync(&mut store).unwrap();

        for _ in 0..16 {
            e.decrement_trust();
        }
        assert_eq!(e.trust(), 0);
        e.sync(&mut store).unwrap();
        assert!(store.get(e.ident()).unwrap().is_none());
        assert_eq!(e.status(), EmitterStatus::Cached);
    }
}
