use serde::{Deserialize, Serialize};

use crate::identity::RfIdentification;

/// One SSID pattern marking an access point as mobile
///
/// All rules except `RawStartsWith` compare against the lowercased note.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "pattern", rename_all = "snake_case")]
pub enum BlacklistRule {
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Equals(String),
    /// Case-sensitive prefix on the note as broadcast
    RawStartsWith(String),
    /// SSID equals the last three octets of the BSSID (common vehicle default)
    MacSuffix,
}

impl BlacklistRule {
    fn normalized(self) -> Self {
        match self {
            BlacklistRule::Contains(p) => BlacklistRule::Contains(p.to_lowercase()),
            BlacklistRule::StartsWith(p) => BlacklistRule::StartsWith(p.to_lowercase()),
            BlacklistRule::EndsWith(p) => BlacklistRule::EndsWith(p.to_lowercase()),
            BlacklistRule::Equals(p) => BlacklistRule::Equals(p.to_lowercase()),
            other => other,
        }
    }

    fn matches(&self, lc: &str, raw: &str, mac_suffix: &str) -> bool {
        match self {
            BlacklistRule::Contains(p) => lc.contains(p.as_str()),
            BlacklistRule::StartsWith(p) => lc.starts_with(p.as_str()),
            BlacklistRule::EndsWith(p) => lc.ends_with(p.as_str()),
            BlacklistRule::Equals(p) => lc == p,
            BlacklistRule::RawStartsWith(p) => raw.starts_with(p.as_str()),
            BlacklistRule::MacSuffix => lc == mac_suffix,
        }
    }
}

/// Ordered list of SSID rules for access points that travel
/// (phones, vehicles, trains, buses)
///
/// Only WLAN emitters are checked; towers are not expected to move.
#[derive(Clone, Debug, PartialEq)]
pub struct Blacklist {
    rules: Vec<BlacklistRule>,
}

impl Blacklist {
    /// Blacklist that matches nothing
    pub fn empty() -> Self {
        Blacklist { rules: Vec::new() }
    }

    pub fn with_rules(rules: impl IntoIterator<Item = BlacklistRule>) -> Self {
        let mut list = Self::empty();
        list.extend(rules);
        list
    }

    pub fn push(&mut self, rule: BlacklistRule) {
        self.rules.push(rule.normalized());
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = BlacklistRule>) {
        for rule in rules {
            self.push(rule);
        }
    }

    pub fn rules(&self) -> &[BlacklistRule] {
        &self.rules
    }

    /// First rule matching this emitter's note, if any
    pub fn find_match(&self, ident: &RfIdentification, note: &str) -> Option<&BlacklistRule> {
        if !ident.rf_type().is_wlan() {
            return None;
        }
        let lc = note.to_lowercase();
        let mac_suffix = mac_suffix(ident.rf_id());
        self.rules.iter().find(|r| r.matches(&lc, note, &mac_suffix))
    }
}

impl Default for Blacklist {
    /// Built-in table of known mobile SSID conventions
    fn default() -> Self {
        use BlacklistRule::*;

        let contains = [
            // tethering
            "android", "ipad", "iphone", "motorola", "mobile hotspot",
            // Chrysler vehicles
            " uconnect ",
            // transit: ships, buses, trains
            "admin@ms ", "contiki-wifi", "db ic bus", "deinbus.de", "ecolines", "eurolines_wifi",
            "fernbus", "flixbus", "guest@ms ", "muenchenlinie", "postbus", "telekom_ice",
            "skanetrafiken", "oresundstag",
            // catch-alls
            "mobile", "nsb_interakti", "nvram warning",
        ];
        let starts_with = [
            "huawei-", "moto ", "lg aristo",
            // GM vehicle default, Mercedes
            "wifi hotspot ", "mb wlan ",
            // Austrian trains
            "oebb ", "westbahn ",
        ];
        // GM owners are told to rename to "<name> <model>"
        let ends_with = [
            " phone", "corvette", "silverado", "chevy", "truck", "suburban", "terrain", "sierra",
        ];
        let raw_starts_with = [
            "MOTO", "Samsung Galaxy", "CellSpot", "Verizon-", "Audi", "Chevy ", "GMC WiFi", "MyVolvo",
            "BusWiFi", "CoachAmerica", "DisneyLandResortExpress", "TaxiLinQ", "TransitWirelessWiFi",
            "YICarCam",
        ];
        let equals = [
            "amtrak", "amtrakconnect", "cdwifi", "megabus", "regiojet - zluty", "westlan",
            "wifi in de trein",
        ];

        let mut rules: Vec<BlacklistRule> = Vec::new();
        rules.extend(contains.iter().map(|p| Contains(p.to_string())));
        rules.extend(starts_with.iter().map(|p| StartsWith(p.to_string())));
        rules.extend(ends_with.iter().map(|p| EndsWith(p.to_string())));
        rules.extend(raw_starts_with.iter().map(|p| RawStartsWith(p.to_string())));
        rules.extend(equals.iter().map(|p| Equals(p.to_string())));
        rules.push(MacSuffix);

        Self::with_rules(rules)
    }
}

/// Last eight characters of a BSSID, lowercased, colons removed
fn mac_suffix(rf_id: &str) -> String {
    let chars: Vec<char> = rf_id.chars().collect();
    let start = chars.len().saturating_sub(8);
    chars[start..]
        .iter()
        .filter(|c| **c != ':')
        .collect::<String>()
        .to_lowercase()
}
