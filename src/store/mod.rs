pub mod file_store;
pub mod schema;
pub mod spatial_index;

pub use file_store::FileStore;
pub use schema::SCHEMA_VERSION;
pub use spatial_index::{EmitterTree, IndexedEmitter};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::coverage::BoundingBox;
use crate::error::{Result, StoreError};
use crate::identity::{EmitterType, RfIdentification};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One persisted emitter row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmitterRecord {
    #[serde(rename = "rfHash")]
    pub unique_id: String,
    #[serde(rename = "rfID")]
    pub rf_id: String,
    #[serde(rename = "rfType")]
    pub rf_type: EmitterType,
    pub trust: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_ns: f64,
    pub radius_ew: f64,
    #[serde(default)]
    pub note: String,
}

impl EmitterRecord {
    pub fn ident(&self) -> Result<RfIdentification> {
        RfIdentification::new(self.rf_id.clone(), self.rf_type)
    }

    /// Coverage box rebuilt from center and radii
    pub fn coverage(&self) -> BoundingBox {
        BoundingBox::from_center_radii(self.latitude, self.longitude, self.radius_ns, self.radius_ew)
    }
}

/// Keyed emitter persistence with batched transactions
///
/// Keys are unique ids. Writes made between `begin_transaction` and
/// `end_transaction` become visible to other readers of the backing file only
/// once the transaction commits; writes outside a transaction commit at once.
pub trait EmitterStore {
    fn get(&self, ident: &RfIdentification) -> StoreResult<Option<EmitterRecord>>;

    /// Add a new row. Fails with `DuplicateKey` when the id is already stored.
    fn insert(&mut self, record: &EmitterRecord) -> StoreResult<()>;

    /// Replace a row, adding it when missing
    fn update(&mut self, record: &EmitterRecord) -> StoreResult<()>;

    fn delete(&mut self, ident: &RfIdentification) -> StoreResult<()>;

    /// Emitters of one type whose center lies inside the box (edges inclusive)
    fn emitters_in(&self, rf_type: EmitterType, bb: &BoundingBox) -> StoreResult<HashSet<RfIdentification>>;

    fn begin_transaction(&mut self) -> StoreResult<()>;

    /// Commit the open transaction. A transaction without writes commits nothing.
    fn end_transaction(&mut self) -> StoreResult<()>;

    fn row_count(&self) -> StoreResult<usize>;

    fn clear(&mut self) -> StoreResult<()>;
}
