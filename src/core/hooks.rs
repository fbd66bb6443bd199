//! Hook traits for extensibility
//!
//! The relay core reaches the outside world through two extension points:
//! - [`OutboundConnector`]: opens the TCP leg of a session
//! - [`DnsResolver`]: answers one DNS datagram
//!
//! [`DirectConnector`] and [`DohResolver`] are the production implementations;
//! tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

use super::protocol::Target;
use crate::error::{RelayError, Result};
use crate::transport::TransportStream;

/// Outbound TCP stream handed to the relay engine
pub type OutboundStream = TransportStream;

/// MIME type of DNS wire-format bodies
pub const DNS_MESSAGE: &str = "application/dns-message";

/// Outbound connector trait
#[async_trait]
pub trait OutboundConnector: Send + Sync {
    /// Open a stream to `target`
    async fn connect(&self, target: &Target) -> io::Result<OutboundStream>;
}

/// DNS resolver trait: raw query in, raw answer out
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, query: Bytes) -> Result<Bytes>;
}

/// Plain TCP connector with a connect timeout
#[derive(Debug, Clone)]
pub struct DirectConnector {
    connect_timeout: Duration,
    nodelay: bool,
}

impl DirectConnector {
    pub fn new(connect_timeout: Duration, nodelay: bool) -> Self {
        Self {
            connect_timeout,
            nodelay,
        }
    }
}

#[async_trait]
impl OutboundConnector for DirectConnector {
    async fn connect(&self, target: &Target) -> io::Result<OutboundStream> {
        let connect = async {
            let addr = target.to_socket_addr().await?;
            TcpStream::connect(addr).await
        };

        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", target),
                ))
            }
        };

        if self.nodelay {
            let _ = stream.set_nodelay(true);
        }
        Ok(Box::pin(stream))
    }
}

/// DNS-over-HTTPS resolver (RFC 8484 POST), round-robin over its providers
#[derive(Debug)]
pub struct DohResolver {
    client: reqwest::Client,
    providers: Vec<String>,
    next: AtomicUsize,
}

impl DohResolver {
    pub fn new(providers: Vec<String>, timeout: Duration) -> Result<Self> {
        if providers.is_empty() {
            return Err(RelayError::Config(
                "at least one DNS-over-HTTPS provider is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            providers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    fn pick(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.providers.len();
        &self.providers[i]
    }
}

#[async_trait]
impl DnsResolver for DohResolver {
    async fn resolve(&self, query: Bytes) -> Result<Bytes> {
        let url = self.pick();
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Dns(format!("{} answered {}", url, status)));
        }

        Ok(response.bytes().await?)
    }
}
