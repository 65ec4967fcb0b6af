use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Represents a logical address used by the
/// [`NetworkLayer`](super::NetworkLayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    /// The address `0.0.0.0`.
    pub const CURRENT_NETWORK: Self = Self([0u8, 0, 0, 0]);

    /// The address `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127u8, 0, 0, 1]);

    /// The address `255.255.255.255`.
    pub const SUBNET: Self = Self([255u8, 255, 255, 255]);

    /// Creates a new address.
    pub const fn new(address: [u8; 4]) -> Self {
        Self(address)
    }

    /// Generates a random address, for nodes that were not configured with
    /// one.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Gets the address as a `u32`.
    pub fn to_u32(self) -> u32 {
        self.into()
    }

    /// Gets the address as a `[u8; 4]`.
    pub fn to_bytes(self) -> [u8; 4] {
        self.into()
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = <[u8; 4]>::from(*self);
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl FromStr for Ipv4Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 4];
        let mut octets = s.split('.');
        for byte in bytes.iter_mut() {
            let octet = octets.next().ok_or_else(|| AddressError(s.to_string()))?;
            *byte = octet.parse().map_err(|_| AddressError(s.to_string()))?;
        }
        if octets.next().is_some() {
            return Err(AddressError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl From<u32> for Ipv4Address {
    fn from(n: u32) -> Self {
        Self::from(n.to_be_bytes())
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(n: [u8; 4]) -> Self {
        Self(n)
    }
}

impl From<Ipv4Address> for u32 {
    fn from(address: Ipv4Address) -> Self {
        u32::from_be_bytes(address.0)
    }
}

impl From<Ipv4Address> for [u8; 4] {
    fn from(address: Ipv4Address) -> Self {
        address.0
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
#[error("Not a valid dotted-quad address: {0}")]
pub struct AddressError(String);
