//! Canonical interface classification.

use crate::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical interface type slug stored on interface records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    /// Logical interface (SVI, loopback, tunnel).
    Virtual,
    /// Link aggregation group.
    Lag,
    /// 1000BASE-T copper.
    #[serde(rename = "1000base-t")]
    Base1000T,
    /// 10G SFP+.
    #[serde(rename = "10gbase-x-sfpp")]
    Base10GSfpp,
    /// 25G SFP28.
    #[serde(rename = "25gbase-x-sfp28")]
    Base25GSfp28,
    /// 40G QSFP+.
    #[serde(rename = "40gbase-x-qsfpp")]
    Base40GQsfpp,
    /// 100G QSFP28.
    #[serde(rename = "100gbase-x-qsfp28")]
    Base100GQsfp28,
    /// Anything not recognised.
    #[default]
    Other,
}

impl InterfaceType {
    /// Returns the slug as stored in the datastore.
    pub const fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Virtual => "virtual",
            InterfaceType::Lag => "lag",
            InterfaceType::Base1000T => "1000base-t",
            InterfaceType::Base10GSfpp => "10gbase-x-sfpp",
            InterfaceType::Base25GSfp28 => "25gbase-x-sfp28",
            InterfaceType::Base40GQsfpp => "40gbase-x-qsfpp",
            InterfaceType::Base100GQsfp28 => "100gbase-x-qsfp28",
            InterfaceType::Other => "other",
        }
    }

    /// Classifies an interface from its name and the vendor hardware string.
    ///
    /// The name wins for logical interfaces (an aggregate reports the
    /// hardware of its members on several platforms).
    pub fn classify(name: &str, hardware: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let lag_prefixes = ["port-channel", "portchannel", "po", "ae", "bond", "bundle-ether"];
        if lag_prefixes
            .iter()
            .any(|p| name.starts_with(p) && name[p.len()..].starts_with(|c: char| c.is_ascii_digit()))
        {
            return InterfaceType::Lag;
        }
        let virtual_prefixes = ["vlan", "loopback", "lo", "tunnel", "tu", "null", "nve", "vxlan", "irb"];
        if virtual_prefixes
            .iter()
            .any(|p| name.starts_with(p) && name[p.len()..].starts_with(|c: char| c.is_ascii_digit() || c == '.'))
        {
            return InterfaceType::Virtual;
        }

        let hw = hardware.to_ascii_lowercase();
        if hw.contains("port-channel") || hw.contains("ieee 802.3ad") || hw.contains("aggregate") {
            InterfaceType::Lag
        } else if hw.contains("hundred") || hw.contains("100g") {
            InterfaceType::Base100GQsfp28
        } else if hw.contains("forty") || hw.contains("40g") {
            InterfaceType::Base40GQsfpp
        } else if hw.contains("twentyfive") || hw.contains("25g") {
            InterfaceType::Base25GSfp28
        } else if hw.contains("ten") || hw.contains("10g") {
            InterfaceType::Base10GSfpp
        } else if hw.contains("gigabit") || hw.contains("1000") || hw.contains("ethernet") {
            InterfaceType::Base1000T
        } else if hw.contains("loopback") || hw.contains("vlan") || hw.contains("tunnel") {
            InterfaceType::Virtual
        } else {
            InterfaceType::Other
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 802.1Q mode of a switched interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceMode {
    /// Single untagged VLAN.
    Access,
    /// Explicit list of tagged VLANs.
    Tagged,
    /// Trunk carrying every VLAN.
    TaggedAll,
}

impl InterfaceMode {
    /// Returns the slug as stored in the datastore.
    pub const fn as_str(&self) -> &'static str {
        match self {
            InterfaceMode::Access => "access",
            InterfaceMode::Tagged => "tagged",
            InterfaceMode::TaggedAll => "tagged-all",
        }
    }

    /// Derives the mode from a switchport mode string and its trunk list.
    ///
    /// Returns `None` for routed or unknown modes.
    pub fn from_switchport(mode: &str, trunk_vlans: &str) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "access" | "static access" => Some(InterfaceMode::Access),
            "trunk" | "tagged" | "dot1q-tunnel" => {
                let list: crate::VlanList = trunk_vlans.parse().unwrap_or_else(|_| crate::VlanList::all());
                if list.is_all() || list.is_empty() {
                    Some(InterfaceMode::TaggedAll)
                } else {
                    Some(InterfaceMode::Tagged)
                }
            }
            "tagged-all" => Some(InterfaceMode::TaggedAll),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "access" => Ok(InterfaceMode::Access),
            "tagged" | "trunk" => Ok(InterfaceMode::Tagged),
            "tagged-all" => Ok(InterfaceMode::TaggedAll),
            _ => Err(ParseError::InvalidInterfaceMode(s.to_string())),
        }
    }
}

/// Interprets a vendor link/admin status string as a boolean.
pub fn link_status(status: &str) -> bool {
    matches!(
        status.trim().to_ascii_lowercase().as_str(),
        "up" | "connected" | "true" | "enabled" | "yes" | "on"
    )
}

static INTERFACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z\-]*?)\s*(\d.*)$").expect("Invalid regex pattern"));

/// Abbreviation -> canonical prefix. Full names map to themselves so their
/// casing is normalised too.
const INTERFACE_PREFIXES: &[(&str, &str)] = &[
    ("gi", "GigabitEthernet"),
    ("gigabitethernet", "GigabitEthernet"),
    ("te", "TenGigabitEthernet"),
    ("tengigabitethernet", "TenGigabitEthernet"),
    ("twe", "TwentyFiveGigE"),
    ("twentyfivegige", "TwentyFiveGigE"),
    ("fo", "FortyGigabitEthernet"),
    ("fortygigabitethernet", "FortyGigabitEthernet"),
    ("hu", "HundredGigE"),
    ("hundredgige", "HundredGigE"),
    ("fa", "FastEthernet"),
    ("fastethernet", "FastEthernet"),
    ("et", "Ethernet"),
    ("eth", "Ethernet"),
    ("ethernet", "Ethernet"),
    ("po", "Port-Channel"),
    ("port-channel", "Port-Channel"),
    ("portchannel", "Port-Channel"),
    ("lo", "Loopback"),
    ("loopback", "Loopback"),
    ("vl", "Vlan"),
    ("vlan", "Vlan"),
    ("tu", "Tunnel"),
    ("tunnel", "Tunnel"),
    ("ma", "Management"),
    ("mgmt", "Management"),
    ("management", "Management"),
];

/// Expands an abbreviated interface name (`Gi0/1`, `po10`) to its canonical
/// long form (`GigabitEthernet0/1`, `Port-Channel10`).
///
/// Names with an unknown prefix are returned unchanged.
pub fn canonical_interface_name(name: &str) -> String {
    let trimmed = name.trim();
    let Some(caps) = INTERFACE_NAME_RE.captures(trimmed) else {
        return trimmed.to_string();
    };
    let prefix = caps[1].to_ascii_lowercase();
    match INTERFACE_PREFIXES.iter().find(|(abbr, _)| *abbr == prefix) {
        Some((_, full)) => format!("{}{}", full, &caps[2]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_by_name() {
        assert_eq!(InterfaceType::classify("Port-Channel10", ""), InterfaceType::Lag);
        assert_eq!(InterfaceType::classify("ae0", ""), InterfaceType::Lag);
        assert_eq!(InterfaceType::classify("Vlan100", "Ethernet SVI"), InterfaceType::Virtual);
        assert_eq!(InterfaceType::classify("Loopback0", ""), InterfaceType::Virtual);
    }

    #[test]
    fn test_classify_by_hardware() {
        assert_eq!(InterfaceType::classify("Ethernet1", "Ethernet"), InterfaceType::Base1000T);
        assert_eq!(
            InterfaceType::classify("Ethernet49/1", "100GBASE-CR4"),
            InterfaceType::Base100GQsfp28
        );
        assert_eq!(
            InterfaceType::classify("Te1/0/1", "Ten Gigabit Ethernet"),
            InterfaceType::Base10GSfpp
        );
        assert_eq!(InterfaceType::classify("Foo1", "mystery"), InterfaceType::Other);
    }

    #[test]
    fn test_mode_from_switchport() {
        assert_eq!(InterfaceMode::from_switchport("access", ""), Some(InterfaceMode::Access));
        assert_eq!(InterfaceMode::from_switchport("trunk", "10,20"), Some(InterfaceMode::Tagged));
        assert_eq!(InterfaceMode::from_switchport("trunk", "ALL"), Some(InterfaceMode::TaggedAll));
        assert_eq!(InterfaceMode::from_switchport("routed", ""), None);
    }

    #[test]
    fn test_link_status() {
        assert!(link_status("up"));
        assert!(link_status("Connected"));
        assert!(!link_status("down"));
        assert!(!link_status("disabled"));
    }

    #[test]
    fn test_canonical_interface_name() {
        assert_eq!(canonical_interface_name("Gi0/1"), "GigabitEthernet0/1");
        assert_eq!(canonical_interface_name("po10"), "Port-Channel10");
        assert_eq!(canonical_interface_name("Et1"), "Ethernet1");
        assert_eq!(canonical_interface_name("ethernet1/1"), "Ethernet1/1");
        assert_eq!(canonical_interface_name("Management1"), "Management1");
        assert_eq!(canonical_interface_name("xe-0/0/0"), "xe-0/0/0");
    }

    #[test]
    fn test_serde_slugs() {
        assert_eq!(InterfaceType::Base1000T.as_str(), "1000base-t");
        assert_eq!(InterfaceMode::TaggedAll.to_string(), "tagged-all");
    }
}
