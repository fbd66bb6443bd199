//! Trojan request header
//!
//! ```text
//! +------------+------+-----+------+----------+------+------+---------+
//! | credential | CRLF | CMD | ATYP | DST.ADDR | PORT | CRLF | payload |
//! | 56         | 2    | 1   | 1    | var      | 2    | 2    | ...     |
//! +------------+------+-----+------+----------+------+------+---------+
//! ```
//!
//! The credential (hex SHA-224 in the wild) is not validated.

use super::address::{decode_host, read_port};
use super::{Command, ParseError, ParsedHeader, Protocol, Target, SOCKS_ADDRESS_TYPES};

const CREDENTIAL_LEN: usize = 56;
const CRLF: &[u8] = b"\r\n";

/// Credential + CRLF + command + smallest possible address/port
const MIN_LEN: usize = CREDENTIAL_LEN + 2 + 6;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub(super) fn parse(buf: &[u8]) -> Result<ParsedHeader, ParseError> {
    if buf.len() < MIN_LEN {
        return Err(ParseError::BufferTooShort {
            len: buf.len(),
            min: MIN_LEN,
        });
    }

    if &buf[CREDENTIAL_LEN..CREDENTIAL_LEN + 2] != CRLF {
        return Err(ParseError::MissingDelimiter);
    }

    let cmd_at = CREDENTIAL_LEN + 2;
    let command = match buf[cmd_at] {
        CMD_CONNECT => Command::Tcp,
        CMD_UDP_ASSOCIATE => Command::Udp,
        other => return Err(ParseError::UnsupportedCommand(other)),
    };

    let (host, port_at) = decode_host(buf, cmd_at + 1, SOCKS_ADDRESS_TYPES)?;
    let port = read_port(buf, port_at)?;

    // Trailing CRLF after the port
    let payload_offset = port_at + 4;
    if payload_offset > buf.len() {
        return Err(ParseError::Truncated("trailing CRLF"));
    }

    Ok(ParsedHeader {
        protocol: Protocol::Trojan,
        target: Target::new(host, port),
        command,
        payload_offset,
        response_prefix: None,
    })
}
