/*!
 # Lighthouse power states

 Lighthouses accept a single byte on their power characteristic:
 `0x00` puts them to sleep and `0x01` wakes them up.
*/

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Power state written to a lighthouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    /// Standby (0x00)
    Off,
    /// Powered on (0x01)
    On,
}

impl PowerState {
    /// Returns the wire value of this state
    pub const fn encode(self) -> u8 {
        match self {
            PowerState::Off => 0x00,
            PowerState::On => 0x01,
        }
    }

    /// Returns the payload written to the power characteristic
    pub const fn characteristic_value(self) -> [u8; 1] {
        [self.encode()]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PowerState::Off => "off",
            PowerState::On => "on",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            other => Err(Error::InvalidPowerState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_byte_values() {
        assert_eq!(PowerState::Off.encode(), 0x00);
        assert_eq!(PowerState::On.encode(), 0x01);
        assert_eq!(PowerState::On.characteristic_value(), [0x01]);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("ON".parse::<PowerState>().unwrap(), PowerState::On);
        assert_eq!(" off ".parse::<PowerState>().unwrap(), PowerState::Off);
        assert!("toggle".parse::<PowerState>().is_err());
    }
}
