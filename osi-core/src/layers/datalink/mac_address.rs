use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Represents a hardware address used by the
/// [`DataLinkLayer`](super::DataLinkLayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Creates a new address.
    pub const fn new(address: [u8; 6]) -> Self {
        Self(address)
    }

    /// Generates a random address, for nodes that were not configured with
    /// one.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Gets the address as a `[u8; 6]`.
    pub fn to_bytes(self) -> [u8; 6] {
        self.0
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut groups = s.split(':');
        for byte in bytes.iter_mut() {
            let group = groups
                .next()
                .ok_or_else(|| MacAddressError(s.to_string()))?;
            *byte =
                u8::from_str_radix(group, 16).map_err(|_| MacAddressError(s.to_string()))?;
        }
        if groups.next().is_some() {
            return Err(MacAddressError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(address: MacAddress) -> Self {
        address.0
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
#[error("Not a valid colon-separated hardware address: {0}")]
pub struct MacAddressError(String);
