//! Transport layer abstraction
//!
//! Inbound connections arrive as WebSocket upgrades; outbound legs are plain
//! byte streams behind [`TransportStream`].

mod ws;

pub use ws::WebSocketTransport;

use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unified transport stream trait combining AsyncRead + AsyncWrite + Send + Sync + Unpin
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> AsyncStream for T {}

/// Unified transport stream type
pub type TransportStream = Pin<Box<dyn AsyncStream>>;

/// Connection metadata captured during the upgrade handshake
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// Client peer address
    pub peer_addr: SocketAddr,
    /// Request path of the upgrade
    pub path: String,
    /// Raw `sec-websocket-protocol` value (early-data carrier)
    pub early_data: Option<String>,
}

impl ConnectionMeta {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            path: "/".to_string(),
            early_data: None,
        }
    }

    /// First non-empty path segment, used as a per-connection fallback destination
    pub fn fallback_override(&self) -> Option<&str> {
        let path = self.path.split(&['?', '#'][..]).next().unwrap_or("");
        path.split('/')
            .map(str::trim)
            .find(|segment| !segment.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> ConnectionMeta {
        ConnectionMeta {
            path: path.to_string(),
            ..ConnectionMeta::new("127.0.0.1:1234".parse().unwrap())
        }
    }

    #[test]
    fn test_fallback_override_first_segment() {
        assert_eq!(meta("/10.0.0.5:9000").fallback_override(), Some("10.0.0.5:9000"));
        assert_eq!(meta("/relay.example=8443/ws").fallback_override(), Some("relay.example=8443"));
        assert_eq!(meta("//relay.example:443").fallback_override(), Some("relay.example:443"));
    }

    #[test]
    fn test_fallback_override_absent() {
        assert_eq!(meta("/").fallback_override(), None);
        assert_eq!(meta("").fallback_override(), None);
        assert_eq!(meta("/?ed=2048").fallback_override(), None);
    }

    #[test]
    fn test_fallback_override_ignores_query() {
        assert_eq!(meta("/1.2.3.4:443?ed=2048").fallback_override(), Some("1.2.3.4:443"));
    }

    #[test]
    fn test_connection_meta_clone() {
        let mut m = meta("/x");
        m.early_data = Some("AAEC".to_string());
        let cloned = m.clone();
        assert_eq!(cloned.peer_addr, m.peer_addr);
        assert_eq!(cloned.early_data.as_deref(), Some("AAEC"));
    }
}
