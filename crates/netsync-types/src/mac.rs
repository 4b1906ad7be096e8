//! MAC address type that accepts every vendor spelling.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Parsing accepts the forms commonly printed by network operating systems:
/// colon (`00:11:22:33:44:55`), hyphen (`00-11-22-33-44-55`), Cisco dotted
/// (`0011.2233.4455`) and bare hex (`001122334455`). The canonical display
/// form is upper-case colon separated.
///
/// # Examples
///
/// ```
/// use netsync_types::MacAddress;
///
/// let mac: MacAddress = "0011.2233.44aa".parse().unwrap();
/// assert_eq!(mac.to_string(), "00:11:22:33:44:AA");
///
/// let mac2: MacAddress = "00-11-22-33-44-aa".parse().unwrap();
/// assert_eq!(mac, mac2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0, 0, 0, 0, 0, 0]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is the zero address.
    ///
    /// Several platforms report `0000.0000.0000` for logical interfaces;
    /// callers treat that as "no hardware address".
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    fn from_hex_digits(digits: &str, original: &str) -> Result<Self, ParseError> {
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidMacAddress(original.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseError::InvalidMacAddress(original.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Colon/hyphen forms may drop leading zeros per octet ("0:1b:..."),
        // so they are parsed group by group instead of as a digit string.
        if let Some(sep) = [':', '-'].into_iter().find(|c| trimmed.contains(*c)) {
            let parts: Vec<&str> = trimmed.split(sep).collect();
            if parts.len() != 6 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            let mut bytes = [0u8; 6];
            for (i, part) in parts.iter().enumerate() {
                if part.is_empty() || part.len() > 2 {
                    return Err(ParseError::InvalidMacAddress(s.to_string()));
                }
                bytes[i] = u8::from_str_radix(part, 16)
                    .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
            }
            return Ok(MacAddress(bytes));
        }

        let digits: String = trimmed.chars().filter(|c| *c != '.').collect();
        MacAddress::from_hex_digits(&digits, s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_colon_format() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_parse_short_octets() {
        let mac: MacAddress = "0:1b:2:33:44:5".parse().unwrap();
        assert_eq!(mac.to_string(), "00:1B:02:33:44:05");
    }

    #[test]
    fn test_parse_cisco_dotted_format() {
        let mac: MacAddress = "aabb.ccdd.eeff".parse().unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_bare_format() {
        let mac: MacAddress = "001122334455".parse().unwrap();
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_zero() {
        let mac: MacAddress = "0000.0000.0000".parse().unwrap();
        assert!(mac.is_zero());
        assert_eq!(mac, MacAddress::ZERO);
    }

    #[test]
    fn test_string_conversion_uses_canonical_form() {
        let mac: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(String::from(mac), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_invalid_format() {
        assert!("invalid".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("gg:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("0011.2233.44".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }
}
