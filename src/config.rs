//! Configuration module for the tunnel relay
//!
//! This module handles CLI argument parsing with environment variable support.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;

use crate::core::FallbackTarget;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Default DNS-over-HTTPS providers, used round-robin
pub const DEFAULT_DNS_PROVIDERS: &str =
    "https://1.1.1.1/dns-query,https://8.8.8.8/dns-query,https://dns.google/dns-query";

/// CLI arguments for the tunnel relay
///
/// Supports environment variables with TUNNEL_RELAY_ prefix
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Protocol-sniffing WebSocket tunnel relay (VLESS / Trojan / Shadowsocks)"
)]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// Bind host
    #[arg(long, env = "TUNNEL_RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port
    #[arg(long, env = "TUNNEL_RELAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Default fallback destination for the retry path ("host:port" or "host=port")
    #[arg(long = "proxy_ip", env = "TUNNEL_RELAY_PROXY_IP")]
    pub proxy_ip: Option<String>,

    /// DNS-over-HTTPS endpoints, comma separated
    #[arg(
        long = "dns_providers",
        env = "TUNNEL_RELAY_DNS_PROVIDERS",
        value_delimiter = ',',
        default_value = DEFAULT_DNS_PROVIDERS
    )]
    pub dns_providers: Vec<String>,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "TUNNEL_RELAY_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    // ==================== Performance Tuning ====================
    /// Connection idle timeout - disconnect if no data transferred (default: 5m)
    #[arg(long, env = "TUNNEL_RELAY_CONN_IDLE_TIMEOUT", default_value = "5m", value_parser = parse_duration, help_heading = "Performance")]
    pub conn_idle_timeout: Duration,

    /// TCP connect timeout to target server (default: 5s)
    #[arg(long, env = "TUNNEL_RELAY_TCP_CONNECT_TIMEOUT", default_value = "5s", value_parser = parse_duration, help_heading = "Performance")]
    pub tcp_connect_timeout: Duration,

    /// DNS-over-HTTPS request timeout (default: 5s)
    #[arg(long, env = "TUNNEL_RELAY_DNS_TIMEOUT", default_value = "5s", value_parser = parse_duration, help_heading = "Performance")]
    pub dns_timeout: Duration,

    /// WebSocket upgrade handshake timeout (default: 10s)
    #[arg(long, env = "TUNNEL_RELAY_HANDSHAKE_TIMEOUT", default_value = "10s", value_parser = parse_duration, help_heading = "Performance")]
    pub handshake_timeout: Duration,

    /// Buffer size for data transfer in bytes (default: 32KB)
    #[arg(long, env = "TUNNEL_RELAY_BUFFER_SIZE", default_value_t = 32 * 1024, help_heading = "Performance")]
    pub buffer_size: usize,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(
        long,
        env = "TUNNEL_RELAY_TCP_BACKLOG",
        default_value_t = 1024,
        help_heading = "Performance"
    )]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(
        long,
        env = "TUNNEL_RELAY_TCP_NODELAY",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,

    /// Maximum concurrent connections, 0 = unlimited (default: 0)
    #[arg(
        long,
        env = "TUNNEL_RELAY_MAX_CONNECTIONS",
        default_value_t = 0,
        help_heading = "Performance"
    )]
    pub max_connections: usize,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow!("Bind host is required"));
        }

        if self.dns_providers.is_empty() {
            return Err(anyhow!("At least one DNS provider is required"));
        }
        for provider in &self.dns_providers {
            if !provider.starts_with("https://") && !provider.starts_with("http://") {
                return Err(anyhow!(
                    "Invalid DNS provider '{}': expected an http(s) URL",
                    provider
                ));
            }
        }

        if let Some(fallback) = self.proxy_ip.as_deref().and_then(FallbackTarget::new) {
            fallback
                .validate()
                .map_err(|e| anyhow!("Invalid proxy_ip '{}': {}", fallback, e))?;
        }

        // Validate timeouts
        if self.conn_idle_timeout.is_zero() {
            return Err(anyhow!("conn_idle_timeout must be greater than 0"));
        }
        if self.tcp_connect_timeout.is_zero() {
            return Err(anyhow!("tcp_connect_timeout must be greater than 0"));
        }
        if self.dns_timeout.is_zero() {
            return Err(anyhow!("dns_timeout must be greater than 0"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(anyhow!("handshake_timeout must be greater than 0"));
        }
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer_size must be greater than 0"));
        }

        Ok(())
    }
}

/// Connection performance configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// DNS-over-HTTPS request timeout
    pub dns_timeout: Duration,
    /// WebSocket handshake timeout
    pub handshake_timeout: Duration,
    /// Buffer size for data transfer
    pub buffer_size: usize,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
    /// Concurrent connection cap (0 = unlimited)
    pub max_connections: usize,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            dns_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            buffer_size: 32 * 1024,
            tcp_backlog: 1024,
            tcp_nodelay: true,
            max_connections: 0,
        }
    }
}

impl ConnConfig {
    /// Create from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            idle_timeout: cli.conn_idle_timeout,
            connect_timeout: cli.tcp_connect_timeout,
            dns_timeout: cli.dns_timeout,
            handshake_timeout: cli.handshake_timeout,
            buffer_size: cli.buffer_size,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
            max_connections: cli.max_connections,
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind
    pub host: String,
    /// Port number
    pub port: u16,
}

impl ServerConfig {
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            host: cli.host.clone(),
            port: cli.port,
        }
    }

    /// Socket address string to bind
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
