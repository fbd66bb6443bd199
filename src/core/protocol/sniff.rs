//! Structural protocol detection
//!
//! Priority order, first match wins:
//! 1. Trojan: CRLF at 56..58, a Trojan command at 58 and a SOCKS address type at 59
//! 2. VLESS: bytes 1..17 form a version-4 UUID
//! 3. Shadowsocks: everything else (not a positive match)

use super::Protocol;

const TROJAN_SNIFF_LEN: usize = 62;
const TROJAN_DELIMITER_AT: usize = 56;
const TROJAN_COMMANDS: [u8; 3] = [0x01, 0x03, 0x7f];
const TROJAN_ADDRESS_TYPES: [u8; 3] = [0x01, 0x03, 0x04];

/// Classify a buffer. Total and deterministic: every input maps to exactly one variant.
pub fn sniff(buf: &[u8]) -> Protocol {
    if is_trojan(buf) {
        Protocol::Trojan
    } else if buf.len() >= 17 && looks_like_uuid_v4(&buf[1..17]) {
        Protocol::Vless
    } else {
        Protocol::Shadowsocks
    }
}

fn is_trojan(buf: &[u8]) -> bool {
    if buf.len() < TROJAN_SNIFF_LEN {
        return false;
    }
    let at = TROJAN_DELIMITER_AT;
    buf[at] == b'\r'
        && buf[at + 1] == b'\n'
        && TROJAN_COMMANDS.contains(&buf[at + 2])
        && TROJAN_ADDRESS_TYPES.contains(&buf[at + 3])
}

/// Check the textual UUIDv4 pattern on 16 raw bytes: version nibble `4`,
/// variant nibble one of `8`, `9`, `a`, `b`.
pub fn looks_like_uuid_v4(id: &[u8]) -> bool {
    if id.len() != 16 {
        return false;
    }
    let text = hex::encode(id);
    let text = text.as_bytes();
    text[12] == b'4' && matches!(text[16], b'8' | b'9' | b'a' | b'b')
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Host;
    use super::*;

    #[test]
    fn test_uuid_v4_pattern() {
        assert!(looks_like_uuid_v4(&UUID_V4));

        let mut wrong_version = UUID_V4;
        wrong_version[6] = 0x14;
        assert!(!looks_like_uuid_v4(&wrong_version));

        for (variant, expected) in [(0x8e, true), (0x9e, true), (0xae, true), (0xbe, true), (0xce, false), (0x0e, false)] {
            let mut id = UUID_V4;
            id[8] = variant;
            assert_eq!(looks_like_uuid_v4(&id), expected, "variant byte {:#x}", variant);
        }

        assert!(!looks_like_uuid_v4(&UUID_V4[..15]));
    }

    #[test]
    fn test_sniff_vless() {
        let buf = vless_header(1, 443, &Host::IPv4([1, 1, 1, 1]), b"");
        assert_eq!(sniff(&buf), Protocol::Vless);
    }

    #[test]
    fn test_sniff_trojan() {
        let buf = trojan_header(1, 443, &Host::IPv4([1, 1, 1, 1]), b"");
        assert_eq!(sniff(&buf), Protocol::Trojan);
    }

    #[test]
    fn test_sniff_trojan_mux_command() {
        let mut buf = trojan_header(1, 443, &Host::IPv4([1, 1, 1, 1]), b"");
        buf[58] = 0x7f;
        assert_eq!(sniff(&buf), Protocol::Trojan);
    }

    #[test]
    fn test_sniff_trojan_wins_over_uuid() {
        // Trojan credential whose bytes 1..17 also look like a UUIDv4
        let mut buf = trojan_header(1, 443, &Host::Domain("example.com".to_string()), b"");
        buf[1..17].copy_from_slice(&UUID_V4);
        assert!(looks_like_uuid_v4(&buf[1..17]));
        assert_eq!(sniff(&buf), Protocol::Trojan);
    }

    #[test]
    fn test_sniff_trojan_needs_full_window() {
        let buf = trojan_header(1, 443, &Host::IPv4([1, 1, 1, 1]), b"");
        assert_eq!(sniff(&buf[..61]), Protocol::Shadowsocks);
    }

    #[test]
    fn test_sniff_trojan_bad_address_type() {
        let mut buf = trojan_header(1, 443, &Host::IPv4([1, 1, 1, 1]), b"");
        buf[59] = 0x02;
        assert_ne!(sniff(&buf), Protocol::Trojan);
    }

    #[test]
    fn test_sniff_default_shadowsocks() {
        let buf = shadowsocks_header(80, &Host::IPv4([10, 0, 0, 1]), &[0u8; 30]);
        assert_eq!(sniff(&buf), Protocol::Shadowsocks);
        assert_eq!(sniff(&[]), Protocol::Shadowsocks);
    }
}
