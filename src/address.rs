//! Lighthouse hardware addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a [`LighthouseAddress`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid lighthouse address '{0}': expected six hex octets like AA:BB:CC:DD:EE:FF")]
    Malformed(String),
}

/// Normalized BLE hardware address of a lighthouse, e.g. `AA:BB:CC:DD:EE:01`
///
/// Parsing accepts `:` or `-` separators in either case. The adapter path of a
/// discovered device ends with the address in underscore form
/// (`.../dev_AA_BB_CC_DD_EE_01` on BlueZ), which is what discovery matches on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LighthouseAddress(String);

impl LighthouseAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the suffix an adapter path carries for this address
    pub fn path_suffix(&self) -> String {
        self.0.replace(':', "_")
    }

    /// Checks whether an adapter-assigned device path belongs to this address.
    ///
    /// The suffix has to start on an octet boundary, so `..._1AA_BB_...` never
    /// matches `AA:BB:...`. Colon-separated ids (Windows) match as well.
    pub fn matches_path(&self, path: &str) -> bool {
        let suffix = self.path_suffix();
        let path = path.to_ascii_uppercase().replace(':', "_");
        let Some(prefix) = path.strip_suffix(suffix.as_str()) else {
            return false;
        };

        !matches!(prefix.chars().next_back(), Some(c) if c.is_ascii_hexdigit())
    }
}

impl FromStr for LighthouseAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let octets: Vec<&str> = trimmed.split([':', '-']).collect();
        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

        if !well_formed {
            return Err(AddressError::Malformed(s.to_string()));
        }

        Ok(Self(octets.join(":").to_ascii_uppercase()))
    }
}

impl TryFrom<String> for LighthouseAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LighthouseAddress> for String {
    fn from(address: LighthouseAddress) -> Self {
        address.0
    }
}

impl fmt::Display for LighthouseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> LighthouseAddress {
        s.parse().unwrap()
    }

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(addr("aa-bb-cc-dd-ee-01").as_str(), "AA:BB:CC:DD:EE:01");
        assert_eq!(addr(" Aa:bB:cc:DD:ee:0f ").as_str(), "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in ["", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:GG", "AAB:B:CC:DD:EE:01"] {
            assert!(input.parse::<LighthouseAddress>().is_err(), "{input}");
        }
    }

    #[test]
    fn derives_path_suffix() {
        assert_eq!(addr("AA:BB:CC:DD:EE:01").path_suffix(), "AA_BB_CC_DD_EE_01");
    }

    #[test]
    fn matches_bluez_object_paths() {
        let address = addr("AA:BB:CC:DD:EE:01");
        assert!(address.matches_path("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01"));
        assert!(address.matches_path("hci0/dev_aa_bb_cc_dd_ee_01"));
        assert!(address.matches_path("AA_BB_CC_DD_EE_01"));
        assert!(address.matches_path("aa:bb:cc:dd:ee:01"));
        assert!(!address.matches_path("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_02"));
        assert!(!address.matches_path("/org/bluez/hci0/dev_1AA_BB_CC_DD_EE_01"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&addr("aa:bb:cc:dd:ee:01")).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:01\"");
        assert!(serde_json::from_str::<LighthouseAddress>("\"nope\"").is_err());
    }
}
