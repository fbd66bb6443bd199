//! Protocol-sniffing WebSocket tunnel relay
//!
//! Architecture:
//! - `core/`: header sniffing and parsing, the session state machine, hook
//!   traits for outbound connections and DNS resolution
//! - `transport/`: WebSocket adapter and connection metadata
//! - `handler`: per-connection processing
//! - `server_runner`: listener setup, upgrade handshake and accept loop

pub mod config;
pub mod core;
pub mod error;
pub mod handler;
pub mod logger;
pub mod server_runner;
pub mod transport;

pub use error::{RelayError, Result};
