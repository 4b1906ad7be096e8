//! VLAN ID type with validation, and VLAN range lists.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// # Examples
///
/// ```
/// use netsync_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
///
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is not in the valid range (1-4094).
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Handle "Vlan100" format
        let id_str = match s.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("vlan") => &s[4..],
            _ => s,
        };

        let id: u16 = id_str.parse().map_err(|_| ParseError::InvalidVlanId(0))?;

        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// An ordered, de-duplicated set of VLANs as printed in trunk configuration.
///
/// Parses `1,10-12,20` style lists. The keyword `ALL` (any case) and the
/// full range `1-4094` both parse as [`VlanList::all`], which callers map to
/// the "tagged-all" interface mode rather than enumerating 4094 relations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VlanList {
    vlans: BTreeSet<VlanId>,
    all: bool,
}

impl VlanList {
    /// Returns the list that represents every VLAN.
    pub fn all() -> Self {
        Self {
            vlans: BTreeSet::new(),
            all: true,
        }
    }

    /// Returns true if the list represents every VLAN.
    pub fn is_all(&self) -> bool {
        self.all
    }

    /// Returns true if no VLAN is listed.
    pub fn is_empty(&self) -> bool {
        !self.all && self.vlans.is_empty()
    }

    /// Iterates the explicit VLANs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VlanId> + '_ {
        self.vlans.iter().copied()
    }
}

impl FromStr for VlanList {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(VlanList::default());
        }
        if s.eq_ignore_ascii_case("all") || s == "1-4094" {
            return Ok(VlanList::all());
        }

        let mut vlans = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: VlanId = lo.parse()?;
                    let hi: VlanId = hi.parse()?;
                    if lo > hi {
                        return Err(ParseError::InvalidVlanList(s.to_string()));
                    }
                    for id in lo.as_u16()..=hi.as_u16() {
                        vlans.insert(VlanId(id));
                    }
                }
                None => {
                    vlans.insert(part.parse()?);
                }
            }
        }

        Ok(VlanList { vlans, all: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_vlan_ids() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
    }

    #[test]
    fn test_parse_vlan_prefix() {
        let vlan: VlanId = "Vlan100".parse().unwrap();
        assert_eq!(vlan.as_u16(), 100);

        let vlan2: VlanId = "VLAN200".parse().unwrap();
        assert_eq!(vlan2.as_u16(), 200);
    }

    #[test]
    fn test_vlan_list_ranges() {
        let list: VlanList = "20, 10-12,11".parse().unwrap();
        let ids: Vec<u16> = list.iter().map(|v| v.as_u16()).collect();
        assert_eq!(ids, vec![10, 11, 12, 20]);
        assert!(!list.is_all());
    }

    #[test]
    fn test_vlan_list_all() {
        assert!("ALL".parse::<VlanList>().unwrap().is_all());
        assert!("1-4094".parse::<VlanList>().unwrap().is_all());
        assert!("none".parse::<VlanList>().unwrap().is_empty());
        assert!("".parse::<VlanList>().unwrap().is_empty());
    }

    #[test]
    fn test_vlan_list_invalid() {
        assert!("12-10".parse::<VlanList>().is_err());
        assert!("1,abc".parse::<VlanList>().is_err());
        assert!("5000".parse::<VlanList>().is_err());
    }
}
