use crossbeam::channel::{self, Sender};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::cache::Cache;
use crate::config::{EngineConfig, Smoothing};
use crate::coverage::BoundingBox;
use crate::emitter::RfCharacteristics;
use crate::error::{LocatorError, Result};
use crate::fusion::{self, KalmanSmoother};
use crate::identity::{EmitterType, RfIdentification};
use crate::store::{EmitterStore, FileStore};
use crate::types::{Location, Observation, Provider, RadioKind};

// ─── Output ──────────────────────────────────────────────────────────────────

/// Receiver of fused positions, one per completed reporting interval at most
pub trait LocationSink: Send {
    fn report(&mut self, location: Location);
}

impl LocationSink for Sender<Location> {
    fn report(&mut self, location: Location) {
        if self.send(location).is_err() {
            debug!("Location receiver dropped");
        }
    }
}

impl LocationSink for Vec<Location> {
    fn report(&mut self, location: Location) {
        self.push(location);
    }
}

// ─── Work items ──────────────────────────────────────────────────────────────

/// One batch of scan results with the trusted fix current when it was queued
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub observations: Vec<Observation>,
    pub gps: Option<Location>,
    pub time_ms: i64,
}

// ─── Scan throttle ───────────────────────────────────────────────────────────

/// Which scans the host should start now
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub wlan: bool,
    pub mobile: bool,
}

impl ScanRequest {
    pub fn any(&self) -> bool {
        self.wlan || self.mobile
    }
}

/// Per-radio scan rate limiter
#[derive(Clone, Debug)]
pub struct ScanThrottle {
    wlan_interval_ms: i64,
    mobile_interval_ms: i64,
    next_wlan_ms: i64,
    next_mobile_ms: i64,
    wlan_in_progress: bool,
}

impl ScanThrottle {
    pub fn new(config: &EngineConfig) -> Self {
        ScanThrottle {
            wlan_interval_ms: config.wlan_scan_interval_ms(),
            mobile_interval_ms: config.mobile_scan_interval_ms(),
            next_wlan_ms: 0,
            next_mobile_ms: 0,
            wlan_in_progress: false,
        }
    }

    /// Grant the scans that are due and schedule the next ones
    pub fn request(&mut self, now_ms: i64) -> ScanRequest {
        let mut request = ScanRequest::default();
        if !self.wlan_in_progress && now_ms >= self.next_wlan_ms {
            self.next_wlan_ms = now_ms + self.wlan_interval_ms;
            self.wlan_in_progress = true;
            request.wlan = true;
        }
        if now_ms >= self.next_mobile_ms {
            self.next_mobile_ms = now_ms + self.mobile_interval_ms;
            request.mobile = true;
        }
        request
    }

    /// A scan of this kind delivered results or failed
    pub fn finish(&mut self, kind: RadioKind) {
        if kind == RadioKind::Wlan {
            self.wlan_in_progress = false;
        }
    }

    pub fn wlan_in_progress(&self) -> bool {
        self.wlan_in_progress
    }
}

// ─── Cycle processing ────────────────────────────────────────────────────────

/// Worker-side state: everything the background thread mutates
///
/// # Cycle
/// 1. Each observation is recorded on its emitter, and the item's GPS fix
///    (if any) grows that emitter's coverage
/// 2. When an item's time reaches the next report time, the period closes:
///    seen emitters are fused and reported, their trust goes up, emitters
///    expected around the fused position (and the fix) but not seen lose
///    trust, and the cache is synced
pub struct CycleProcessor<S: EmitterStore> {
    cache: Arc<Cache<S>>,
    seen: HashSet<RfIdentification>,
    next_report_ms: i64,
    reporting_interval_ms: i64,
    sink: Box<dyn LocationSink>,
    smoothing: Smoothing,
    smoother: Option<KalmanSmoother>,
}

impl<S: EmitterStore> CycleProcessor<S> {
    pub fn new(cache: Arc<Cache<S>>, config: &EngineConfig, sink: Box<dyn LocationSink>) -> Self {
        CycleProcessor {
            cache,
            seen: HashSet::new(),
            next_report_ms: 0,
            reporting_interval_ms: config.reporting_interval_ms,
            sink,
            smoothing: config.smoothing.clone(),
            smoother: None,
        }
    }

    pub fn cache(&self) -> &Arc<Cache<S>> {
        &self.cache
    }

    pub fn seen(&self) -> &HashSet<RfIdentification> {
        &self.seen
    }

    /// Handle one work item
    ///
    /// # Returns
    /// The fused position when this item closed a period and one was computed
    pub fn process(&mut self, item: WorkItem) -> Option<Location> {
        let gps = item.gps.as_ref();

        for observation in item.observations {
            let id = observation.ident().clone();
            let applied = self.cache.with_emitter(&id, |emitter| {
                emitter.set_last_observation(observation);
                emitter.update_location(gps);
            });
            match applied {
                Some(()) => {
                    self.seen.insert(id);
                }
                None => warn!("Skipping observation of {}", id),
            }
        }

        if item.time_ms >= self.next_report_ms {
            self.next_report_ms = item.time_ms + self.reporting_interval_ms;
            return self.end_of_period(gps);
        }
        None
    }

    fn end_of_period(&mut self, gps: Option<&Location>) -> Option<Location> {
        let locations: Vec<Location> = self
            .seen
            .iter()
            .filter_map(|id| self.cache.with_emitter(id, |e| e.location()).flatten())
            .collect();

        let fused = fusion::fuse(&locations);
        match &fused {
            Some(position) if position.not_null_island() => self.report(position.clone()),
            Some(_) => debug!("Fused position near null island, not reported"),
            None => debug!("No position from {} usable emitters", locations.len()),
        }

        for id in &self.seen {
            self.cache.with_emitter(id, |e| e.increment_trust());
        }

        if let Some(position) = &fused {
            // Expected set is read from the store, so flush first
            self.cache.sync();

            let mut expected = HashSet::new();
            for center in std::iter::once(position).chain(gps) {
                for rf_type in EmitterType::ALL {
                    expected.extend(self.expected(center, rf_type));
                }
            }
            for id in expected.difference(&self.seen) {
                self.cache.with_emitter(id, |e| e.decrement_trust());
            }
        }

        let report = self.cache.sync();
        debug!(
            "Period closed: {} seen, {} written, {} evicted",
            self.seen.len(),
            report.dirty - report.failed,
            report.evicted
        );
        self.seen.clear();
        fused
    }

    /// Stored emitters of one type that should be audible around `center`
    fn expected(&self, center: &Location, rf_type: EmitterType) -> HashSet<RfIdentification> {
        let range = RfCharacteristics::of(rf_type).typical_range;
        if center.accuracy > range {
            return HashSet::new();
        }
        let bb = BoundingBox::around(center.latitude, center.longitude, range);
        self.cache.emitters_in(rf_type, &bb)
    }

    fn report(&mut self, fused: Location) {
        let location = match self.smoothing {
            Smoothing::None => fused,
            Smoothing::Kalman { coordinate_noise_m } => {
                let time_ms = fused.time_ms;
                match self.smoother.as_mut() {
                    Some(smoother) => smoother.update(&fused),
                    None => self.smoother = Some(KalmanSmoother::new(&fused, coordinate_noise_m)),
                }
                self.smoother.as_mut().map_or(fused, |smoother| smoother.location(time_ms))
            }
        };

        info!(
            "Position {:.6}, {:.6} ±{:.0} m from {} emitters",
            location.latitude,
            location.longitude,
            location.accuracy,
            location.extras.averaged_of.unwrap_or(0)
        );
        self.sink.report(location);
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

/// Front end owned by the host: accepts fixes and scan results from any
/// thread and feeds them to a single background worker
///
/// # Usage
/// ```no_run
/// use rf_locator_rs::{Coordinator, EngineConfig, Location};
///
/// let (tx, rx) = crossbeam::channel::unbounded::<Location>();
/// let mut coordinator = Coordinator::open(EngineConfig::default(), tx)?;
/// // host callbacks: on_gps_fix, request_scans, queue_observations ...
/// coordinator.close()?;
/// # Ok::<(), rf_locator_rs::LocatorError>(())
/// ```
pub struct Coordinator<S: EmitterStore + Send + 'static> {
    sender: Option<Sender<WorkItem>>,
    worker: Option<JoinHandle<()>>,
    cache: Arc<Cache<S>>,
    gps: Mutex<Option<Location>>,
    throttle: Mutex<ScanThrottle>,
}

impl Coordinator<FileStore> {
    /// Coordinator over the configured store file, or an in-memory store
    pub fn open(config: EngineConfig, sink: impl LocationSink + 'static) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => FileStore::open(path)?,
            None => FileStore::in_memory(),
        };
        Self::new(config, store, sink)
    }
}

impl<S: EmitterStore + Send + 'static> Coordinator<S> {
    pub fn new(config: EngineConfig, store: S, sink: impl LocationSink + 'static) -> Result<Self> {
        config.validate()?;

        let blacklist = Arc::new(config.blacklist.build());
        let cache = Arc::new(Cache::new(store, blacklist, config.cache.clone()));
        let mut processor = CycleProcessor::new(cache.clone(), &config, Box::new(sink));

        let (sender, receiver) = channel::unbounded::<WorkItem>();
        let worker = thread::Builder::new()
            .name("rf-locator-worker".to_string())
            .spawn(move || {
                for item in receiver {
                    processor.process(item);
                }
                debug!("Worker queue closed");
            })
            .map_err(|e| LocatorError::Worker(format!("Failed to spawn worker: {}", e)))?;

        info!(
            "Coordinator started (interval {} ms, smoothing {:?})",
            config.reporting_interval_ms, config.smoothing
        );
        Ok(Coordinator {
            sender: Some(sender),
            worker: Some(worker),
            cache,
            gps: Mutex::new(None),
            throttle: Mutex::new(ScanThrottle::new(&config)),
        })
    }

    pub fn cache(&self) -> &Arc<Cache<S>> {
        &self.cache
    }

    /// Offer a position fix
    ///
    /// Only GPS fixes away from null island are trusted. An accepted fix is
    /// attached to subsequently queued scans.
    ///
    /// # Returns
    /// The scans to start now, or `None` if the fix was rejected
    pub fn on_gps_fix(&self, fix: Location) -> Option<ScanRequest> {
        if fix.provider != Provider::Gps {
            debug!("Ignoring {:?} fix", fix.provider);
            return None;
        }
        if fix.validate().is_err() || !fix.not_null_island() {
            warn!("Rejecting GPS fix at {}, {}", fix.latitude, fix.longitude);
            return None;
        }
        let now_ms = fix.time_ms;
        *self.gps.lock().unwrap_or_else(PoisonError::into_inner) = Some(fix);
        Some(self.request_scans(now_ms))
    }

    /// Scans due at `now_ms`
    pub fn request_scans(&self, now_ms: i64) -> ScanRequest {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request(now_ms)
    }

    /// Hand one scan's observations to the worker
    pub fn queue_observations(&self, kind: RadioKind, observations: Vec<Observation>, time_ms: i64) -> Result<()> {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(kind);

        let sender = self.sender.as_ref().ok_or(LocatorError::Closed)?;
        let gps = self.gps.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let item = WorkItem {
            observations,
            gps,
            time_ms,
        };
        sender
            .send(item)
            .map_err(|_| LocatorError::Worker("worker stopped".to_string()))
    }

    /// A scan could not be completed; nothing is queued for it
    pub fn scan_failed(&self, kind: RadioKind, reason: &str) {
        warn!("{:?} scan failed: {}", kind, reason);
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(kind);
    }

    /// Drain the queue, stop the worker and flush the cache
    pub fn close(&mut self) -> Result<()> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        drop(sender);

        let joined = match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| LocatorError::Worker("worker panicked".to_string())),
            None => Ok(()),
        };
        self.cache.close();
        info!("Coordinator closed");
        joined
    }
}

impl<S: EmitterStore + Send + 'static> Drop for Coordinator<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Coordinator shutdown: {}", e);
        }
    }
}
