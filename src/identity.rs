use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter, Write};

use crate::error::{LocatorError, Result};

/// Radio technology of an emitter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmitterType {
    #[serde(rename = "WLAN_24GHZ")]
    Wlan24Ghz,
    #[serde(rename = "WLAN_5GHZ")]
    Wlan5Ghz,
    #[serde(rename = "MOBILE")]
    Mobile,
    #[serde(rename = "INVALID")]
    Invalid,
}

impl EmitterType {
    pub const ALL: [EmitterType; 4] = [
        EmitterType::Wlan24Ghz,
        EmitterType::Wlan5Ghz,
        EmitterType::Mobile,
        EmitterType::Invalid,
    ];

    /// Canonical name, as hashed into the unique id and written to the store
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitterType::Wlan24Ghz => "WLAN_24GHZ",
            EmitterType::Wlan5Ghz => "WLAN_5GHZ",
            EmitterType::Mobile => "MOBILE",
            EmitterType::Invalid => "INVALID",
        }
    }

    /// Parse a stored type name. Unknown names map to `Invalid`.
    pub fn type_of(name: &str) -> Self {
        match name {
            "WLAN_24GHZ" => EmitterType::Wlan24Ghz,
            "WLAN_5GHZ" => EmitterType::Wlan5Ghz,
            "MOBILE" => EmitterType::Mobile,
            _ => EmitterType::Invalid,
        }
    }

    /// WLAN band from a scan frequency in MHz
    pub fn from_wlan_frequency(mhz: u32) -> Self {
        if mhz > 2500 {
            EmitterType::Wlan5Ghz
        } else {
            EmitterType::Wlan24Ghz
        }
    }

    pub fn is_wlan(&self) -> bool {
        matches!(self, EmitterType::Wlan24Ghz | EmitterType::Wlan5Ghz)
    }
}

impl Display for EmitterType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a single emitter: type plus native id (BSSID, cell id string)
///
/// Equality, hashing and ordering all go through `unique_id`.
#[derive(Clone, Debug)]
pub struct RfIdentification {
    rf_id: String,
    rf_type: EmitterType,
    unique_id: String,
}

impl RfIdentification {
    /// Build an identity. Empty or whitespace-only ids are rejected.
    pub fn new(rf_id: impl Into<String>, rf_type: EmitterType) -> Result<Self> {
        let rf_id = rf_id.into();
        if rf_id.trim().is_empty() {
            return Err(LocatorError::InvalidIdentity(format!(
                "empty id for {}",
                rf_type
            )));
        }
        let unique_id = unique_id(rf_type, &rf_id);
        Ok(RfIdentification {
            rf_id,
            rf_type,
            unique_id,
        })
    }

    /// WLAN identity from a raw BSSID and scan frequency
    ///
    /// BSSIDs are lowercased and `.` separators become `:`.
    pub fn wlan(bssid: &str, frequency_mhz: u32) -> Result<Self> {
        let normalized = bssid.to_lowercase().replace('.', ":");
        Self::new(normalized, EmitterType::from_wlan_frequency(frequency_mhz))
    }

    pub fn rf_id(&self) -> &str {
        &self.rf_id
    }

    pub fn rf_type(&self) -> EmitterType {
        self.rf_type
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }
}

impl PartialEq for RfIdentification {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for RfIdentification {}

impl std::hash::Hash for RfIdentification {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

impl PartialOrd for RfIdentification {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RfIdentification {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.unique_id.cmp(&other.unique_id)
    }
}

impl Display for RfIdentification {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "rfId={}, rfType={}", self.rf_id, self.rf_type)
    }
}

/// MD5 of `"<TYPE>:<id>"` as 32 lowercase hex digits
pub fn unique_id(rf_type: EmitterType, rf_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(rf_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(rf_id.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(32);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_id_known_value() {
        let id = unique_id(EmitterType::Wlan24Ghz, "00:11:22:33:44:55");
        assert_eq!(id, "ddbb7922e3d8fa4fd80c251ec33cab8c");

        let id = unique_id(EmitterType::Mobile, "GSM/310/260/1234/5678");
        assert_eq!(id, "b5ea26e5cc5e6bd92c492fbae31a1360");
    }

    #[test]
    fn test_unique_id_is_deterministic() {
        let a = RfIdentification::new("aa:bb:cc:dd:ee:ff", EmitterType::Wlan24Ghz).unwrap();
        let b = RfIdentification::new("aa:bb:cc:dd:ee:ff", EmitterType::Wlan24Ghz).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_type_is_part_of_identity() {
        let a = RfIdentification::new("aa:bb:cc:dd:ee:ff", EmitterType::Wlan24Ghz).unwrap();
        let b = RfIdentification::new("aa:bb:cc:dd:ee:ff", EmitterType::Wlan5Ghz).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_collisions_in_corpus() {
        let mut seen = HashSet::new();
        for t in EmitterType::ALL {
            for i in 0..500u32 {
                let id = format!("02:00:00:{:02x}:{:02x}:{:02x}", i >> 16, (i >> 8) & 0xff, i & 0xff);
                assert!(seen.insert(unique_id(t, &id)));
            }
            for cid in 0..200 {
                assert!(seen.insert(unique_id(t, &format!("LTE/262/1/{}/12/345", cid))));
            }
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(RfIdentification::new("", EmitterType::Mobile).is_err());
        assert!(RfIdentification::new("   ", EmitterType::Mobile).is_err());
    }

    #[test]
    fn test_type_of_falls_back_to_invalid() {
        assert_eq!(EmitterType::type_of("MOBILE"), EmitterType::Mobile);
        assert_eq!(EmitterType::type_of("WLAN_5GHZ"), EmitterType::Wlan5Ghz);
        assert_eq!(EmitterType::type_of("WLAN"), EmitterType::Invalid);
        assert_eq!(EmitterType::type_of(""), EmitterType::Invalid);
    }

    #[test]
    fn test_wlan_normalization() {
        let id = RfIdentification::wlan("AA.BB.CC.DD.EE.FF", 5180).unwrap();
        assert_eq!(id.rf_id(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.rf_type(), EmitterType::Wlan5Ghz);

        let id = RfIdentification::wlan("AA:BB:CC:DD:EE:FF", 2437).unwrap();
        assert_eq!(id.rf_type(), EmitterType::Wlan24Ghz);
    }

    #[test]
    fn test_serde_names_match_store_names() {
        let json = serde_json::to_string(&EmitterType::Wlan24Ghz).unwrap();
        assert_eq!(json, "\"WLAN_24GHZ\"");
        let parsed: EmitterType = serde_json::from_str("\"MOBILE\"").unwrap();
        assert_eq!(parsed, EmitterType::Mobile);
    }
}
