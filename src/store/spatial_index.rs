use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashSet;

use crate::coverage::BoundingBox;
use crate::identity::{EmitterType, RfIdentification};

/// Emitter center with its identity, as stored in the R-tree
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedEmitter {
    pub ident: RfIdentification,
    /// (lon, lat) in degrees
    pub point: [f64; 2],
}

impl IndexedEmitter {
    pub fn new(ident: RfIdentification, lat: f64, lon: f64) -> Self {
        IndexedEmitter {
            ident,
            point: [lon, lat],
        }
    }
}

impl RTreeObject for IndexedEmitter {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// R-Tree over emitter centers for bounding-box queries
///
/// # Architecture
/// - One point entry per stored emitter, keyed by unique id
/// - Queries are closed rectangles in degrees, filtered by emitter type
/// - Rebuilt with `bulk_load` when a store file is opened, then maintained
///   entry by entry as rows change
pub struct EmitterTree {
    tree: RTree<IndexedEmitter>,
}

impl EmitterTree {
    /// Create empty R-Tree
    pub fn new() -> Self {
        EmitterTree { tree: RTree::new() }
    }

    /// Build R-Tree from a batch of entries
    pub fn from_entries(entries: Vec<IndexedEmitter>) -> Self {
        EmitterTree {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn insert(&mut self, entry: IndexedEmitter) {
        self.tree.insert(entry);
    }

    /// Remove an entry
    ///
    /// # Returns
    /// `true` if the entry was present
    pub fn remove(&mut self, entry: &IndexedEmitter) -> bool {
        self.tree.remove(entry).is_some()
    }

    /// Identities of one type whose center lies inside the box
    ///
    /// # Arguments
    /// * `rf_type` - Emitter type to keep
    /// * `bb` - Query rectangle, edges inclusive
    pub fn emitters_in(&self, rf_type: EmitterType, bb: &BoundingBox) -> HashSet<RfIdentification> {
        if bb.is_empty() {
            return HashSet::new();
        }
        let envelope = AABB::from_corners([bb.west(), bb.south()], [bb.east(), bb.north()]);

        self.tree
            .locate_in_envelope(&envelope)
            .filter(|e| e.ident.rf_type() == rf_type)
            .map(|e| e.ident.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmitterTree {
    fn default() -> Self {
        Self::new()
    }
}
