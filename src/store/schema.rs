//! On-disk document layout and schema migrations.
//!
//! A store file is one JSON document `{"version": N, "emitters": [...]}`.
//!
//! | version | row key | radius columns        | notes                         |
//! |---------|---------|-----------------------|-------------------------------|
//! | 1       | `rfID`  | `radius`              | WLAN rows typed `"WLAN"`      |
//! | 2       | `rfID`  | `radius_ns`, `radius_ew` | backfilled from `radius`   |
//! | 3       | `rfHash`| `radius_ns`, `radius_ew` | `"WLAN"` mapped to 2.4 GHz |
//!
//! Older documents are migrated one step at a time and always written back at
//! [`SCHEMA_VERSION`].

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{EmitterRecord, StoreResult};
use crate::error::StoreError;
use crate::identity::{self, EmitterType};

pub const SCHEMA_VERSION: u32 = 3;

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct Document<R> {
    version: u32,
    emitters: Vec<R>,
}

#[derive(Deserialize)]
struct RowV1 {
    #[serde(rename = "rfID")]
    rf_id: String,
    #[serde(rename = "rfType")]
    rf_type: String,
    trust: i64,
    latitude: f64,
    longitude: f64,
    radius: f64,
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
struct RowV2 {
    #[serde(rename = "rfID")]
    rf_id: String,
    #[serde(rename = "rfType")]
    rf_type: String,
    trust: i64,
    latitude: f64,
    longitude: f64,
    radius_ns: f64,
    radius_ew: f64,
    #[serde(default)]
    note: String,
}

/// Current row layout. The type is read as text so unknown names load as `INVALID`.
#[derive(Deserialize)]
struct RowV3 {
    #[serde(rename = "rfHash")]
    unique_id: String,
    #[serde(rename = "rfID")]
    rf_id: String,
    #[serde(rename = "rfType")]
    rf_type: String,
    trust: i64,
    latitude: f64,
    longitude: f64,
    radius_ns: f64,
    radius_ew: f64,
    #[serde(default)]
    note: String,
}

/// Split the single radius into both axes
fn v1_to_v2(row: RowV1) -> RowV2 {
    RowV2 {
        rf_id: row.rf_id,
        rf_type: row.rf_type,
        trust: row.trust,
        latitude: row.latitude,
        longitude: row.longitude,
        radius_ns: row.radius,
        radius_ew: row.radius,
        note: row.note,
    }
}

/// Key rows by unique id and retire the band-less WLAN type
fn v2_to_v3(row: RowV2) -> RowV3 {
    let rf_type = if row.rf_type == "WLAN" {
        EmitterType::Wlan24Ghz.as_str().to_string()
    } else {
        row.rf_type
    };
    RowV3 {
        unique_id: identity::unique_id(EmitterType::type_of(&rf_type), &row.rf_id),
        rf_id: row.rf_id,
        rf_type,
        trust: row.trust,
        latitude: row.latitude,
        longitude: row.longitude,
        radius_ns: row.radius_ns,
        radius_ew: row.radius_ew,
        note: row.note,
    }
}

impl From<RowV3> for EmitterRecord {
    fn from(row: RowV3) -> Self {
        EmitterRecord {
            unique_id: row.unique_id,
            rf_id: row.rf_id,
            rf_type: EmitterType::type_of(&row.rf_type),
            trust: row.trust,
            latitude: row.latitude,
            longitude: row.longitude,
            radius_ns: row.radius_ns,
            radius_ew: row.radius_ew,
            note: row.note,
        }
    }
}

/// Decoded store contents
pub struct Decoded {
    /// Version the document was written with
    pub found_version: u32,
    pub records: HashMap<String, EmitterRecord>,
    /// Rows whose stored key did not match their identity
    pub rekeyed: usize,
}

impl Decoded {
    pub fn needs_rewrite(&self) -> bool {
        self.found_version < SCHEMA_VERSION || self.rekeyed > 0
    }
}

/// Parse a store document of any supported version into current records
pub fn decode(json: &str) -> StoreResult<Decoded> {
    let probe: VersionProbe = serde_json::from_str(json)?;

    let rows: Vec<RowV3> = match probe.version {
        1 => {
            let doc: Document<RowV1> = serde_json::from_str(json)?;
            info!("Migrating {} emitters from schema v1", doc.emitters.len());
            doc.emitters.into_iter().map(v1_to_v2).map(v2_to_v3).collect()
        }
        2 => {
            let doc: Document<RowV2> = serde_json::from_str(json)?;
            info!("Migrating {} emitters from schema v2", doc.emitters.len());
            doc.emitters.into_iter().map(v2_to_v3).collect()
        }
        SCHEMA_VERSION => {
            let doc: Document<RowV3> = serde_json::from_str(json)?;
            doc.emitters
        }
        found => {
            return Err(StoreError::UnsupportedVersion {
                found,
                supported: SCHEMA_VERSION,
            })
        }
    };

    let mut records = HashMap::with_capacity(rows.len());
    let mut rekeyed = 0;
    for row in rows {
        if row.rf_id.trim().is_empty() {
            warn!("Skipping stored emitter with empty id ({})", row.unique_id);
            continue;
        }
        let mut record = EmitterRecord::from(row);
        let key = identity::unique_id(record.rf_type, &record.rf_id);
        if record.unique_id != key {
            warn!("Stored key {} does not match {}, rekeying", record.unique_id, record.rf_id);
            record.unique_id = key;
            rekeyed += 1;
        }
        if let Some(previous) = records.insert(record.unique_id.clone(), record) {
            warn!("Duplicate stored emitter {}, keeping the later row", previous.unique_id);
        }
    }

    Ok(Decoded {
        found_version: probe.version,
        records,
        rekeyed,
    })
}

/// Serialize records as a current-version document, ordered by key
pub fn encode<'a>(records: impl IntoIterator<Item = &'a EmitterRecord>) -> StoreResult<Vec<u8>> {
    let mut emitters: Vec<&EmitterRecord> = records.into_iter().collect();
    emitters.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));

    let doc = Document {
        version: SCHEMA_VERSION,
        emitters,
    };
    Ok(serde_json::to_vec(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::unique_id;

    #[test]
    fn test_v1_migration_backfills_radii_and_type() {
        let json = r#"{"version":1,"emitters":[
            {"rfID":"00:11:22:33:44:55","rfType":"WLAN","trust":60,
             "latitude":48.1,"longitude":11.5,"radius":42.0,"note":"HomeNet"},
            {"rfID":"GSM/262/1/100/200","rfType":"MOBILE","trust":100,
             "latitude":48.2,"longitude":11.6,"radius":900.0}
        ]}"#;

        let decoded = decode(json).unwrap();
        assert!(decoded.needs_rewrite());
        assert_eq!(decoded.records.len(), 2);

        let key = unique_id(EmitterType::Wlan24Ghz, "00:11:22:33:44:55");
        let ap = &decoded.records[&key];
        assert_eq!(ap.rf_type, EmitterType::Wlan24Ghz);
        assert_eq!(ap.radius_ns, 42.0);
        assert_eq!(ap.radius_ew, 42.0);
        assert_eq!(ap.note, "HomeNet");

        let key = unique_id(EmitterType::Mobile, "GSM/262/1/100/200");
        assert_eq!(decoded.records[&key].note, "");
    }

    #[test]
    fn test_v2_migration_keys_by_hash() {
        let json = r#"{"version":2,"emitters":[
            {"rfID":"aa:bb:cc:dd:ee:ff","rfType":"WLAN_5GHZ","trust":20,
             "latitude":1.0,"longitude":2.0,"radius_ns":10.0,"radius_ew":12.0,"note":""}
        ]}"#;
        let decoded = decode(json).unwrap();
        let key = unique_id(EmitterType::Wlan5Ghz, "aa:bb:cc:dd:ee:ff");
        let rec = &decoded.records[&key];
        assert_eq!(rec.unique_id, key);
        assert_eq!(rec.radius_ew, 12.0);
    }

    #[test]
    fn test_current_version_roundtrip_is_stable() {
        let rec = EmitterRecord {
            unique_id: unique_id(EmitterType::Mobile, "LTE/262/2/3/4/5"),
            rf_id: "LTE/262/2/3/4/5".to_string(),
            rf_type: EmitterType::Mobile,
            trust: 100,
            latitude: 52.5,
            longitude: 13.4,
            radius_ns: 700.0,
            radius_ew: 650.0,
            note: String::new(),
        };
        let bytes = encode([&rec]).unwrap();
        let json = String::from_utf8(bytes).unwrap();
        assert!(json.contains("\"rfHash\""));
        assert!(json.contains("\"MOBILE\""));

        let decoded = decode(&json).unwrap();
        assert!(!decoded.needs_rewrite());
        assert_eq!(decoded.records[&rec.unique_id], rec);
    }

    #[test]
    fn test_unknown_type_loads_as_invalid() {
        let json = r#"{"version":3,"emitters":[
            {"rfHash":"x","rfID":"thing","rfType":"BLUETOOTH","trust":1,
             "latitude":1.0,"longitude":2.0,"radius_ns":1.0,"radius_ew":1.0}
        ]}"#;
        let decoded = decode(json).unwrap();
        let key = unique_id(EmitterType::Invalid, "thing");
        assert_eq!(decoded.records[&key].rf_type, EmitterType::Invalid);
    }

    #[test]
    fn test_mismatched_key_is_recomputed() {
        let json = r#"{"version":3,"emitters":[
            {"rfHash":"stale","rfID":"00:11:22:33:44:55","rfType":"WLAN_5GHZ","trust":50,
             "latitude":48.0,"longitude":11.0,"radius_ns":10.0,"radius_ew":10.0}
        ]}"#;
        let decoded = decode(json).unwrap();
        assert_eq!(decoded.rekeyed, 1);
        assert!(decoded.needs_rewrite());
        assert!(!decoded.records.contains_key("stale"));

        let key = unique_id(EmitterType::Wlan5Ghz, "00:11:22:33:44:55");
        assert_eq!(decoded.records[&key].unique_id, key);
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = decode(r#"{"version":4,"emitters":[]}"#).err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 4, supported: 3 }));
    }

    #[test]
    fn test_garbage_is_codec_error() {
        assert!(matches!(decode("not json").err().unwrap(), StoreError::Codec(_)));
    }
}
