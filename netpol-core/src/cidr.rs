use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors returned when a CIDR string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    #[error("invalid IP address in '{0}'")]
    Address(String),
    #[error("invalid prefix length in '{0}'")]
    Prefix(String),
}

/// An IPv4 or IPv6 network in CIDR notation.
///
/// Host bits are cleared on parse, so `10.1.2.3/8` and `10.0.0.0/8` compare
/// equal. A bare address parses as a host route (`/32` or `/128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, CidrError> {
        if prefix > max_prefix(&addr) {
            return Err(CidrError::Prefix(format!("{addr}/{prefix}")));
        }
        Ok(Self {
            addr: mask(addr, prefix),
            prefix,
        })
    }

    /// `0.0.0.0/0` or `::/0`, matching the family of `like`.
    pub fn any_of_family(like: &Cidr) -> Self {
        match like.addr {
            IpAddr::V4(_) => Self {
                addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                prefix: 0,
            },
            IpAddr::V6(_) => Self {
                addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                prefix: 0,
            },
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// True when every address of `other` is inside `self`.
    pub fn contains(&self, other: &Cidr) -> bool {
        if self.addr.is_ipv4() != other.addr.is_ipv4() || self.prefix > other.prefix {
            return false;
        }
        mask(other.addr, self.prefix) == self.addr
    }

    /// True when `self` is strictly narrower than `parent` and inside it.
    pub fn is_proper_subnet_of(&self, parent: &Cidr) -> bool {
        parent.contains(self) && self.prefix > parent.prefix
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (addr_part, prefix_part) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| CidrError::Address(raw.to_string()))?;
        let prefix = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| CidrError::Prefix(raw.to_string()))?,
            None => max_prefix(&addr),
        };
        Cidr::new(addr, prefix).map_err(|_| CidrError::Prefix(raw.to_string()))
    }
}

impl Display for Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u32::MAX << (32 - u32::from(prefix)))
            };
            IpAddr::V4(Ipv4Addr::from(masked))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u128::MAX << (128 - u32::from(prefix)))
            };
            IpAddr::V6(Ipv6Addr::from(masked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cidr;

    fn cidr(raw: &str) -> Cidr {
        raw.parse().expect("valid cidr")
    }

    #[test]
    fn masks_host_bits() {
        assert_eq!(cidr("10.1.2.3/8"), cidr("10.0.0.0/8"));
        assert_eq!(cidr("10.1.2.3/8").to_string(), "10.0.0.0/8");
    }

    #[test]
    fn bare_address_is_host_route() {
        assert_eq!(cidr("192.168.1.1").prefix(), 32);
        assert_eq!(cidr("fd00::1").prefix(), 128);
    }

    #[test]
    fn containment_and_proper_subnet() {
        let parent = cidr("192.168.0.0/16");
        let child = cidr("192.168.4.0/24");
        assert!(parent.contains(&child));
        assert!(child.is_proper_subnet_of(&parent));
        assert!(!parent.is_proper_subnet_of(&parent));
        assert!(!cidr("10.0.0.0/24").is_proper_subnet_of(&parent));
    }

    #[test]
    fn families_never_contain_each_other() {
        assert!(!cidr("0.0.0.0/0").contains(&cidr("fd00::/8")));
        assert!(cidr("::/0").contains(&cidr("fd00::/8")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("not-an-ip/8".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
    }
}
