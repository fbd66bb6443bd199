//! Shadowsocks request header: a bare SOCKS5-style address
//!
//! ```text
//! +------+----------+------+---------+
//! | ATYP | DST.ADDR | PORT | payload |
//! +------+----------+------+---------+
//! ```
//!
//! There is no command byte. Port 53 is relayed as DNS, everything else as TCP.

use super::address::{decode_host, read_port};
use super::{
    Command, ParseError, ParsedHeader, Protocol, Target, DNS_PORT, MIN_HEADER_LEN,
    SOCKS_ADDRESS_TYPES,
};

pub(super) fn parse(buf: &[u8]) -> Result<ParsedHeader, ParseError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(ParseError::BufferTooShort {
            len: buf.len(),
            min: MIN_HEADER_LEN,
        });
    }

    let (host, port_at) = decode_host(buf, 0, SOCKS_ADDRESS_TYPES)?;
    let port = read_port(buf, port_at)?;

    let command = if port == DNS_PORT {
        Command::Udp
    } else {
        Command::Tcp
    };

    Ok(ParsedHeader {
        protocol: Protocol::Shadowsocks,
        target: Target::new(host, port),
        command,
        payload_offset: port_at + 2,
        response_prefix: None,
    })
}
