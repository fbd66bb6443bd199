//! Destination address decoding
//!
//! All three header variants share the same address encoding:
//! - IPv4: 4 raw bytes
//! - Domain: 1-byte length followed by the name
//! - IPv6: 16 raw bytes (8 big-endian groups)
//!
//! Only the type codes differ, so each variant passes its own [`AddressTypes`] table.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::lookup_host;

use super::ParseError;

/// Address type codes used by one protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTypes {
    pub ipv4: u8,
    pub domain: u8,
    pub ipv6: u8,
}

/// VLESS address types: 1 = IPv4, 2 = domain, 3 = IPv6
pub const VLESS_ADDRESS_TYPES: AddressTypes = AddressTypes {
    ipv4: 1,
    domain: 2,
    ipv6: 3,
};

/// SOCKS5 address types (Trojan and Shadowsocks): 1 = IPv4, 3 = domain, 4 = IPv6
pub const SOCKS_ADDRESS_TYPES: AddressTypes = AddressTypes {
    ipv4: 1,
    domain: 3,
    ipv6: 4,
};

/// Destination host as carried in a header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// IPv4 address
    IPv4([u8; 4]),
    /// IPv6 address
    IPv6([u8; 16]),
    /// Domain name
    Domain(String),
}

impl Host {
    /// Parse operator-supplied host text, e.g. the host half of a fallback target.
    ///
    /// IP literals become typed addresses (brackets around IPv6 are accepted),
    /// anything else is treated as a domain name.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ipv4) = trimmed.parse::<Ipv4Addr>() {
            return Host::IPv4(ipv4.octets());
        }
        if let Ok(ipv6) = trimmed.parse::<Ipv6Addr>() {
            return Host::IPv6(ipv6.octets());
        }
        Host::Domain(s.to_string())
    }
}

impl fmt::Display for Host {
    /// IPv6 is rendered as eight lower-case hex groups without zero compression.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::IPv4(ip) => write!(f, "{}", Ipv4Addr::from(*ip)),
            Host::IPv6(ip) => {
                for (i, group) in Ipv6Addr::from(*ip).segments().iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:x}", group)?;
                }
                Ok(())
            }
            Host::Domain(domain) => f.write_str(domain),
        }
    }
}

/// Destination host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: Host,
    pub port: u16,
}

impl Target {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Resolve to socket address
    pub async fn to_socket_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.host {
            Host::IPv4(ip) => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*ip)), self.port)),
            Host::IPv6(ip) => Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*ip)), self.port)),
            Host::Domain(domain) => {
                let mut addrs = lookup_host((domain.as_str(), self.port)).await?;
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no addresses found for {}", domain),
                    )
                })
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Host::IPv6(_) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Bounds-checked sub-slice
fn field<'a>(
    buf: &'a [u8],
    start: usize,
    len: usize,
    name: &'static str,
) -> Result<&'a [u8], ParseError> {
    buf.get(start..start + len).ok_or(ParseError::Truncated(name))
}

/// Decode a typed address starting at `at` (the address type byte).
///
/// Returns the host and the offset of the first byte after it.
pub(crate) fn decode_host(
    buf: &[u8],
    at: usize,
    types: AddressTypes,
) -> Result<(Host, usize), ParseError> {
    let atyp = *buf.get(at).ok_or(ParseError::Truncated("address type"))?;
    let start = at + 1;

    if atyp == types.ipv4 {
        let mut ip = [0u8; 4];
        ip.copy_from_slice(field(buf, start, 4, "IPv4 address")?);
        Ok((Host::IPv4(ip), start + 4))
    } else if atyp == types.domain {
        let len = *buf.get(start).ok_or(ParseError::Truncated("domain length"))? as usize;
        let raw = field(buf, start + 1, len, "domain")?;
        if raw.is_empty() {
            return Err(ParseError::EmptyAddress);
        }
        let domain = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidDomain)?;
        Ok((Host::Domain(domain.to_string()), start + 1 + len))
    } else if atyp == types.ipv6 {
        let mut ip = [0u8; 16];
        ip.copy_from_slice(field(buf, start, 16, "IPv6 address")?);
        Ok((Host::IPv6(ip), start + 16))
    } else {
        Err(ParseError::InvalidAddressType(atyp))
    }
}

/// Read a big-endian port at `at`
pub(crate) fn read_port(buf: &[u8], at: usize) -> Result<u16, ParseError> {
    let raw = field(buf, at, 2, "port")?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}

/// Encode a host with the given type table (test-only serializer)
#[cfg(test)]
pub(crate) fn encode_host(host: &Host, types: AddressTypes, buf: &mut Vec<u8>) {
    match host {
        Host::IPv4(ip) => {
            buf.push(types.ipv4);
            buf.extend_from_slice(ip);
        }
        Host::IPv6(ip) => {
            buf.push(types.ipv6);
            buf.extend_from_slice(ip);
        }
        Host::Domain(domain) => {
            buf.push(types.domain);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
        }
    }
}
