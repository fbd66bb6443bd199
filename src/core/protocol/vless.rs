//! VLESS request header
//!
//! ```text
//! +---------+-----------+---------+----------+---------+------+------+---------+---------+
//! | version | user id   | opt len | options  | command | port | atyp | address | payload |
//! | 1       | 16        | 1       | L        | 1       | 2    | 1    | var     | ...     |
//! +---------+-----------+---------+----------+---------+------+------+---------+---------+
//! ```
//!
//! Commands: 1 = TCP, 2 = UDP. The user id is not authenticated.

use super::address::{decode_host, read_port};
use super::{
    Command, ParseError, ParsedHeader, Protocol, Target, MIN_HEADER_LEN, VLESS_ADDRESS_TYPES,
};

const CMD_TCP: u8 = 0x01;
const CMD_UDP: u8 = 0x02;

const OPT_LEN_AT: usize = 17;

pub(super) fn parse(buf: &[u8]) -> Result<ParsedHeader, ParseError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(ParseError::BufferTooShort {
            len: buf.len(),
            min: MIN_HEADER_LEN,
        });
    }

    let version = buf[0];
    let cmd_at = OPT_LEN_AT + 1 + buf[OPT_LEN_AT] as usize;

    let command = match buf.get(cmd_at) {
        Some(&CMD_TCP) => Command::Tcp,
        Some(&CMD_UDP) => Command::Udp,
        Some(&other) => return Err(ParseError::UnsupportedCommand(other)),
        None => return Err(ParseError::Truncated("command")),
    };

    let port = read_port(buf, cmd_at + 1)?;
    let (host, payload_offset) = decode_host(buf, cmd_at + 3, VLESS_ADDRESS_TYPES)?;

    Ok(ParsedHeader {
        protocol: Protocol::Vless,
        target: Target::new(host, port),
        command,
        payload_offset,
        response_prefix: Some([version, 0]),
    })
}
