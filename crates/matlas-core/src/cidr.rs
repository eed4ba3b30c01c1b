//! IPv4 CIDR parsing, canonicalization and overlap checks.
//!
//! Atlas access lists and network containers are IPv4-only, so this stays
//! deliberately small.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR '{input}': {reason}")]
pub struct CidrParseError {
    pub input: String,
    pub reason: &'static str,
}

impl Ipv4Cidr {
    /// A single host (`/32`).
    pub fn host(addr: Ipv4Addr) -> Self {
        Self {
            network: u32::from(addr),
            prefix: 32,
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    fn last(&self) -> u32 {
        self.network | !Self::mask(self.prefix)
    }

    /// True when the two networks share at least one address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.network <= other.last() && other.network <= self.last()
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        self.prefix <= other.prefix && self.network <= other.network && other.last() <= self.last()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrParseError;

    /// Parses `a.b.c.d/n` or a bare address (treated as `/32`). Leading zeros
    /// in the prefix are accepted and host bits are masked off, so
    /// `10.0.0.0/08` and `10.1.0.0/8` both canonicalize to `10.0.0.0/8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| CidrParseError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        let (addr, prefix) = match trimmed.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .trim()
                    .parse()
                    .map_err(|_| err("prefix is not a number"))?;
                (addr.trim(), prefix)
            }
            None => (trimmed, 32),
        };
        if prefix > 32 {
            return Err(err("prefix must be between 0 and 32"));
        }
        let addr: Ipv4Addr = addr.parse().map_err(|_| err("address is not IPv4"))?;
        Ok(Self {
            network: u32::from(addr) & Self::mask(prefix),
            prefix,
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

/// Canonical text for a CIDR or address, or the trimmed input when it does
/// not parse (the validator reports the parse failure separately).
pub fn canonicalize(input: &str) -> String {
    input
        .parse::<Ipv4Cidr>()
        .map(|c| c.to_string())
        .unwrap_or_else(|_| input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_match() {
        assert_eq!(canonicalize("10.0.0.0/08"), "10.0.0.0/8");
        assert_eq!(canonicalize("10.1.2.3/8"), "10.0.0.0/8");
        assert_eq!(canonicalize("192.168.1.10"), "192.168.1.10/32");
        assert_eq!(canonicalize(" not-a-cidr "), "not-a-cidr");
    }

    #[test]
    fn overlap_detection() {
        let a: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let b: Ipv4Cidr = "10.0.128.0/24".parse().unwrap();
        let c: Ipv4Cidr = "10.1.0.0/16".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(a.contains(&b));
        assert!(!a.overlaps(&c));
        assert!(!c.contains(&a));
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/8".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn zero_prefix_covers_everything() {
        let all: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        let host = Ipv4Cidr::host(Ipv4Addr::new(8, 8, 8, 8));
        assert!(all.contains(&host));
    }
}
