//! IPv4 address and CIDR notation utilities.
//!
//! Provides [`Ipv4`] struct for representing IPv4 network blocks.

use crate::error::{Error, Result};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length for an IPv4 subnet mask (32 bits).
pub const MAX_LENGTH: u8 = 32;

fn too_long(len: u8) -> Error {
    Error::InvalidRange(format!("network length /{len} is too long"))
}

/// Calculate the number of usable host addresses in a VPC subnet.
///
/// The cloud reserves 5 addresses per subnet (network, router, DNS, future use, broadcast).
pub fn num_usable_hosts(len: u8) -> Result<u64> {
    if len > MAX_LENGTH - 4 {
        // /28 is the smallest subnet the cloud accepts
        Err(Error::InvalidRange(format!(
            "/{len} is smaller than the minimum subnet size /28"
        )))
    } else {
        Ok((1u64 << (MAX_LENGTH - len)) - 5)
    }
}

/// IPv4 network block in CIDR notation.
#[derive(Eq, Ord, PartialEq, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct Ipv4 {
    /// The IPv4 address.
    pub addr: Ipv4Addr,
    /// The subnet mask length (0-32).
    pub mask: u8,
}

impl Serialize for Ipv4 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ipv4 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Ipv4, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ipv4::new(&s).map_err(de::Error::custom)
    }
}

impl Ipv4 {
    /// Create a new [`Ipv4`] from a CIDR string (e.g., "10.0.0.0/24").
    pub fn new(addr_cidr: &str) -> Result<Ipv4> {
        let addr_cidr = addr_cidr.trim();
        let (addr, mask) = addr_cidr
            .split_once('/')
            .ok_or_else(|| Error::InvalidRange(format!("invalid CIDR format: {addr_cidr}")))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::InvalidRange(format!("invalid address {addr}")))?;
        let mask: u8 = mask
            .parse()
            .map_err(|_| Error::InvalidRange(format!("invalid subnet mask {mask}")))?;
        if mask > MAX_LENGTH {
            return Err(too_long(mask));
        }
        Ok(Ipv4 { addr, mask })
    }

    /// Get the highest (broadcast) address in the block.
    pub fn hi(&self) -> Ipv4Addr {
        let host_bits = !(u32::MAX.checked_shl((MAX_LENGTH - self.mask) as u32).unwrap_or(0));
        Ipv4Addr::from(u32::from(self.addr) | host_bits)
    }

    /// Get the lowest (network) address in the block.
    pub fn lo(&self) -> Ipv4Addr {
        let mask = u32::MAX.checked_shl((MAX_LENGTH - self.mask) as u32).unwrap_or(0);
        Ipv4Addr::from(u32::from(self.addr) & mask)
    }

    /// The same block with host bits cleared.
    pub fn network(&self) -> Ipv4 {
        Ipv4 {
            addr: self.lo(),
            mask: self.mask,
        }
    }

    /// True when `addr` is already the network address of the block.
    pub fn is_network(&self) -> bool {
        self.addr == self.lo()
    }

    pub fn contains_addr(&self, ip: Ipv4Addr) -> bool {
        self.lo() <= ip && ip <= self.hi()
    }

    /// True when `other` lies fully inside this block.
    pub fn contains(&self, other: &Ipv4) -> bool {
        self.mask <= other.mask && self.contains_addr(other.lo()) && self.contains_addr(other.hi())
    }

    pub fn overlaps(&self, other: &Ipv4) -> bool {
        self.lo() <= other.hi() && other.lo() <= self.hi()
    }
}

impl FromStr for Ipv4 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ipv4::new(s)
    }
}

impl std::fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_usable_hosts() {
        assert_eq!(num_usable_hosts(16).unwrap(), 65531);
        assert_eq!(num_usable_hosts(24).unwrap(), 251);
        assert_eq!(num_usable_hosts(28).unwrap(), 11);
        match num_usable_hosts(29) {
            Err(Error::InvalidRange(msg)) => assert!(msg.contains("/28")),
            other => panic!("expected a range error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_and_display() {
        let block: Ipv4 = "10.0.3.0/24".parse().unwrap();
        assert_eq!(block.addr, Ipv4Addr::new(10, 0, 3, 0));
        assert_eq!(block.mask, 24);
        assert_eq!(block.to_string(), "10.0.3.0/24");
        assert!(Ipv4::new("10.0.0.0").is_err());
        assert!(Ipv4::new("10.0.0.0/33").is_err());
        assert!(Ipv4::new("10.0.0.256/24").is_err());
    }

    #[test]
    fn test_lo_hi_edges() {
        let all = Ipv4::new("0.0.0.0/0").unwrap();
        assert_eq!(all.lo(), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(all.hi(), Ipv4Addr::new(255, 255, 255, 255));
        let host = Ipv4::new("10.1.2.3/32").unwrap();
        assert_eq!(host.lo(), host.hi());
        assert_eq!(Ipv4::new("10.2.3.4/16").unwrap().network().to_string(), "10.2.0.0/16");
    }

    #[test]
    fn test_contains_and_overlaps() {
        let parent = Ipv4::new("10.0.0.0/16").unwrap();
        let child = Ipv4::new("10.0.10.0/24").unwrap();
        let outside = Ipv4::new("10.1.0.0/24").unwrap();
        let wide = Ipv4::new("10.0.0.0/8").unwrap();

        assert!(parent.contains(&child));
        assert!(!parent.contains(&outside));
        assert!(!parent.contains(&wide));
        assert!(parent.overlaps(&wide));
        assert!(!child.overlaps(&outside));
        assert!(child.contains_addr(Ipv4Addr::new(10, 0, 10, 200)));
    }

    #[test]
    fn test_serde_as_string() {
        let block = Ipv4::new("172.16.0.0/20").unwrap();
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(json, "\"172.16.0.0/20\"");
        let back: Ipv4 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
