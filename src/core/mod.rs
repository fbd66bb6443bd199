//! Core relay module
//!
//! This module contains the relay functionality:
//! - Header sniffing and parsing (VLESS, Trojan, Shadowsocks)
//! - The per-connection session state machine (TCP relay with one fallback
//!   retry, DNS-over-HTTPS relay)
//! - Session management
//! - Hook traits for outbound connections and DNS resolution

mod connection;
pub mod dns;
pub mod fallback;
pub mod hooks;
pub mod inbound;
pub mod protocol;
mod server;
pub mod session;
pub mod sink;

pub use connection::{SessionId, SessionManager};
pub use fallback::FallbackTarget;
pub use hooks::{DirectConnector, DnsResolver, DohResolver, OutboundConnector, OutboundStream};
pub use inbound::{decode_early_data, InboundStream};
pub use protocol::{parse_header, Command, ParseError, ParsedHeader, Protocol, Target};
pub use server::{Server, ServerBuilder};
pub use session::{Session, SessionContext, SessionStats};
pub use sink::{ClientSink, ResponseFramer};
