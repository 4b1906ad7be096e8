//! Canonical network types shared by the extraction and reconciliation crates.
//!
//! Vendor command output describes the same facts in many spellings. These
//! types normalise them into one canonical form before records are built:
//!
//! - [`MacAddress`]: 48-bit hardware addresses in colon, hyphen, dotted or bare form
//! - [`IpInterface`]: an interface address with its prefix length
//! - [`VlanId`] and [`VlanList`]: IEEE 802.1Q identifiers and range lists
//! - [`InterfaceType`], [`InterfaceMode`]: canonical interface classification
//! - [`canonical_interface_name`]: expansion of abbreviated interface names

mod interface;
mod ip;
mod mac;
mod vlan;

pub use interface::{canonical_interface_name, link_status, InterfaceMode, InterfaceType};
pub use ip::{mask_to_prefix_len, IpInterface};
pub use mac::MacAddress;
pub use vlan::{VlanId, VlanList};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid netmask or prefix length: {0}")]
    InvalidMask(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN list: {0}")]
    InvalidVlanList(String),

    #[error("invalid interface mode: {0}")]
    InvalidInterfaceMode(String),
}
