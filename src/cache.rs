use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::CacheConfig;
use crate::coverage::BoundingBox;
use crate::emitter::{Blacklist, RfEmitter};
use crate::identity::{EmitterType, RfIdentification};
use crate::store::EmitterStore;

/// Outcome of one [`Cache::sync`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheSyncReport {
    /// Emitters that needed writing
    pub dirty: usize,
    /// Emitters whose write failed (all of them when the commit failed)
    pub failed: usize,
    pub evicted: usize,
    /// Working set was over its ceiling and dropped
    pub cleared: bool,
}

struct CacheInner<S> {
    working_set: HashMap<String, RfEmitter>,
    /// `None` once closed
    store: Option<S>,
}

/// Write-back cache of emitters in front of a store
///
/// # Architecture
/// - Working set keyed by unique id; every access resets the entry's age
/// - Dirty entries are written in one store transaction per `sync`
/// - Entries untouched for more than `max_age` syncs are evicted; a working
///   set still larger than `max_working_set` afterwards is dropped entirely
/// - One mutex guards the map and the store
pub struct Cache<S: EmitterStore> {
    inner: Mutex<CacheInner<S>>,
    blacklist: Arc<Blacklist>,
    config: CacheConfig,
}

impl<S: EmitterStore> Cache<S> {
    pub fn new(store: S, blacklist: Arc<Blacklist>, config: CacheConfig) -> Self {
        Cache {
            inner: Mutex::new(CacheInner {
                working_set: HashMap::new(),
                store: Some(store),
            }),
            blacklist,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find an emitter in the working set, loading or creating it on a miss
    ///
    /// Returns `None` when the cache is closed or the store lookup failed.
    fn entry<'a>(&self, inner: &'a mut CacheInner<S>, ident: &RfIdentification) -> Option<&'a mut RfEmitter> {
        let key = ident.unique_id();
        if !inner.working_set.contains_key(key) {
            let store = inner.store.as_ref()?;
            let emitter = match store.get(ident) {
                Ok(Some(record)) => RfEmitter::from_record(ident.clone(), &record, self.blacklist.clone()),
                Ok(None) => RfEmitter::new(ident.clone(), self.blacklist.clone()),
                Err(e) => {
                    warn!("Loading {} failed: {}", ident, e);
                    return None;
                }
            };
            inner.working_set.insert(key.to_string(), emitter);
        }

        let emitter = inner.working_set.get_mut(key)?;
        emitter.reset_age();
        Some(emitter)
    }

    /// Snapshot of an emitter
    pub fn get(&self, ident: &RfIdentification) -> Option<RfEmitter> {
        let mut inner = self.lock();
        self.entry(&mut inner, ident).cloned()
    }

    /// Run `f` on the cached emitter under the cache lock
    pub fn with_emitter<R>(&self, ident: &RfIdentification, f: impl FnOnce(&mut RfEmitter) -> R) -> Option<R> {
        let mut inner = self.lock();
        self.entry(&mut inner, ident).map(f)
    }

    /// True if the emitter is in the working set. Does not touch its age.
    pub fn contains(&self, ident: &RfIdentification) -> bool {
        self.lock().working_set.contains_key(ident.unique_id())
    }

    pub fn len(&self) -> usize {
        self.lock().working_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().store.is_none()
    }

    /// Write dirty emitters back, then age and evict
    pub fn sync(&self) -> CacheSyncReport {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut report = CacheSyncReport::default();
        let Some(store) = inner.store.as_mut() else {
            return report;
        };

        let dirty: Vec<String> = inner
            .working_set
            .iter()
            .filter(|(_, e)| e.sync_needed())
            .map(|(key, _)| key.clone())
            .collect();
        report.dirty = dirty.len();

        if !dirty.is_empty() {
            write_back(store, &mut inner.working_set, &dirty, &mut report);
        }

        let max_age = self.config.max_age;
        inner.working_set.retain(|_, e| {
            if e.age() >= max_age && !e.sync_needed() {
                report.evicted += 1;
                false
            } else {
                e.increment_age();
                true
            }
        });

        if inner.working_set.len() > self.config.max_working_set {
            info!(
                "Working set {} over {}, clearing",
                inner.working_set.len(),
                self.config.max_working_set
            );
            inner.working_set.clear();
            report.cleared = true;
        }

        if report.dirty > 0 || report.evicted > 0 {
            debug!("Cache sync: {:?}", report);
        }
        report
    }

    /// Sync, drop the working set and release the store
    pub fn close(&self) -> Option<S> {
        self.sync();
        let mut inner = self.lock();
        inner.working_set.clear();
        inner.store.take()
    }

    /// Stored emitters of one type inside a box. Empty on error or when closed.
    pub fn emitters_in(&self, rf_type: EmitterType, bb: &BoundingBox) -> HashSet<RfIdentification> {
        let inner = self.lock();
        let Some(store) = inner.store.as_ref() else {
            return HashSet::new();
        };
        store.emitters_in(rf_type, bb).unwrap_or_else(|e| {
            warn!("Spatial query for {} failed: {}", rf_type, e);
            HashSet::new()
        })
    }

    /// Read access to the store while it is open
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.lock().store.as_ref().map(f)
    }
}

/// One transaction over the dirty emitters
///
/// A failed emitter keeps its state; a failed commit restores every dirty
/// emitter to its pre-sync state so the next sync retries them all.
fn write_back<S: EmitterStore>(
    store: &mut S,
    working_set: &mut HashMap<String, RfEmitter>,
    dirty: &[String],
    report: &mut CacheSyncReport,
) {
    let backups: Vec<(String, RfEmitter)> = dirty
        .iter()
        .filter_map(|key| working_set.get(key).map(|e| (key.clone(), e.clone())))
        .collect();

    if let Err(e) = store.begin_transaction() {
        warn!("Cannot start store transaction: {}", e);
        report.failed = dirty.len();
        return;
    }

    for key in dirty {
        let Some(emitter) = working_set.get_mut(key) else {
            continue;
        };
        if let Err(e) = emitter.sync(store) {
            warn!("Sync of {} failed: {}", emitter.ident(), e);
            report.failed += 1;
        }
    }

    if let Err(e) = store.end_transaction() {
        warn!("Store commit failed, {} emitters kept dirty: {}", dirty.len(), e);
        for (key, backup) in backups {
            working_set.insert(key, backup);
        }
        report.failed = dirty.len();
    }
}
