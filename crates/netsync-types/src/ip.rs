//! Interface addresses (address plus prefix length) with lenient parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// An address assigned to an interface, e.g. `10.0.0.1/24` or `2001:db8::1/64`.
///
/// Unlike a network prefix, the host bits are kept: the record identity of an
/// IP address in the datastore is the full `address/len` string.
///
/// Accepted input forms:
///
/// - `10.0.0.1/24`
/// - `10.0.0.1/255.255.255.0`
/// - `10.0.0.1 255.255.255.0`
/// - `10.0.0.1` (host length: /32 or /128)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpInterface {
    address: IpAddr,
    prefix_len: u8,
}

impl IpInterface {
    /// Creates a new interface address.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address family.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > max_len(&address) {
            return Err(ParseError::InvalidMask(format!(
                "prefix length {} exceeds maximum {} for {}",
                prefix_len,
                max_len(&address),
                address
            )));
        }
        Ok(IpInterface {
            address,
            prefix_len,
        })
    }

    /// Returns the host address.
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the address family as a small integer (4 or 6).
    pub const fn family(&self) -> u8 {
        match self.address {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    /// Returns true if the address is a host route (/32 or /128).
    pub const fn is_host(&self) -> bool {
        match self.address {
            IpAddr::V4(_) => self.prefix_len == 32,
            IpAddr::V6(_) => self.prefix_len == 128,
        }
    }
}

fn max_len(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Converts a netmask or prefix-length spelling into a prefix length.
///
/// Accepts `24`, `/24`, dotted masks (`255.255.255.0`) and hex masks
/// (`0xffffff00`). Non-contiguous dotted masks are rejected.
///
/// ```
/// use netsync_types::mask_to_prefix_len;
///
/// assert_eq!(mask_to_prefix_len("255.255.254.0").unwrap(), 23);
/// assert_eq!(mask_to_prefix_len("/30").unwrap(), 30);
/// ```
pub fn mask_to_prefix_len(mask: &str) -> Result<u8, ParseError> {
    let mask = mask.trim().trim_start_matches('/');

    if let Ok(len) = mask.parse::<u8>() {
        if len <= 128 {
            return Ok(len);
        }
        return Err(ParseError::InvalidMask(mask.to_string()));
    }

    let bits = if let Some(hex) = mask.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidMask(mask.to_string()))?
    } else {
        let addr: Ipv4Addr = mask
            .parse()
            .map_err(|_| ParseError::InvalidMask(mask.to_string()))?;
        u32::from(addr)
    };

    let len = bits.leading_ones();
    if bits.checked_shl(len).unwrap_or(0) != 0 {
        return Err(ParseError::InvalidMask(mask.to_string()));
    }
    Ok(len as u8)
}

impl fmt::Display for IpInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpInterface {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (addr_str, mask_str) = match trimmed.split_once(['/', ' ']) {
            Some((addr, mask)) => (addr, Some(mask.trim())),
            None => (trimmed, None),
        };

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))?;

        let prefix_len = match mask_str {
            Some(mask) => mask_to_prefix_len(mask)?,
            None => max_len(&address),
        };

        IpInterface::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpInterface {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpInterface> for String {
    fn from(ip: IpInterface) -> String {
        ip.to_string()
    }
}
