//! Tunnel header parsing
//!
//! The first inbound chunk of a session carries one of three header layouts:
//! - VLESS: version + 16-byte user id + options + command + port + address
//! - Trojan: 56-byte credential + CRLF + command + address + port + CRLF
//! - Shadowsocks: bare address + port
//!
//! No tag byte identifies the layout, so [`sniff`] classifies the buffer by its
//! structure and [`parse_header`] dispatches to the matching parser.

mod address;
mod shadowsocks;
mod sniff;
mod trojan;
mod vless;

pub use address::{AddressTypes, Host, Target, SOCKS_ADDRESS_TYPES, VLESS_ADDRESS_TYPES};
pub use sniff::{looks_like_uuid_v4, sniff};

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Smallest buffer any variant will attempt to parse
pub const MIN_HEADER_LEN: usize = 24;

/// The only port UDP relaying is allowed to target
pub const DNS_PORT: u16 = 53;

/// Header parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("buffer too short: {len} bytes, need at least {min}")]
    BufferTooShort { len: usize, min: usize },

    #[error("invalid address type: {0}")]
    InvalidAddressType(u8),

    #[error("empty address")]
    EmptyAddress,

    #[error("invalid domain encoding")]
    InvalidDomain,

    #[error("truncated header: {0} extends past the end of the buffer")]
    Truncated(&'static str),

    #[error("missing CRLF after credential")]
    MissingDelimiter,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("UDP is only supported for DNS (port 53), got port {0}")]
    UdpNotDns(u16),
}

/// Header layout detected on the first chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Version + UUID framed header
    Vless,
    /// Credential block + CRLF + SOCKS5-style request
    Trojan,
    /// Bare SOCKS5-style address; the catch-all
    Shadowsocks,
}

impl Protocol {
    /// Parse `buf` with this variant's layout
    pub fn parse(self, buf: &[u8]) -> Result<ParsedHeader, ParseError> {
        match self {
            Protocol::Vless => vless::parse(buf),
            Protocol::Trojan => trojan::parse(buf),
            Protocol::Shadowsocks => shadowsocks::parse(buf),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vless => write!(f, "vless"),
            Protocol::Trojan => write!(f, "trojan"),
            Protocol::Shadowsocks => write!(f, "shadowsocks"),
        }
    }
}

/// Requested outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// TCP connect
    Tcp,
    /// UDP, relayed as DNS-over-HTTPS
    Udp,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Tcp => write!(f, "tcp"),
            Command::Udp => write!(f, "udp"),
        }
    }
}

/// Result of parsing a session's first chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Variant that produced this header
    pub protocol: Protocol,
    /// Destination host and port
    pub target: Target,
    /// TCP or UDP
    pub command: Command,
    /// Offset of the first payload byte in the parsed buffer
    pub payload_offset: usize,
    /// Bytes prepended to the first reply sent back to the client
    pub response_prefix: Option<[u8; 2]>,
}

impl ParsedHeader {
    /// Payload that followed the header in `chunk` (zero-copy)
    pub fn payload(&self, chunk: &Bytes) -> Bytes {
        chunk.slice(self.payload_offset.min(chunk.len())..)
    }
}

/// Sniff and parse a session's first chunk.
///
/// Buffers shorter than [`MIN_HEADER_LEN`] are rejected before sniffing. Input
/// that matches neither the Trojan nor the VLESS pattern is parsed as
/// Shadowsocks and typically fails there with an address error.
pub fn parse_header(buf: &[u8]) -> Result<ParsedHeader, ParseError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(ParseError::BufferTooShort {
            len: buf.len(),
            min: MIN_HEADER_LEN,
        });
    }

    let header = sniff(buf).parse(buf)?;

    if header.command == Command::Udp && header.target.port != DNS_PORT {
        return Err(ParseError::UdpNotDns(header.target.port));
    }

    Ok(header)
}
