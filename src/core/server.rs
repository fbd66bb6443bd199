//! Core relay server
//!
//! The Server struct bundles the hooks, the session registry, the connection
//! tuning and the server-wide fallback destination.

use std::sync::Arc;

use super::connection::SessionManager;
use super::fallback::FallbackTarget;
use super::hooks::{DirectConnector, DnsResolver, OutboundConnector};
use crate::config::ConnConfig;
use crate::error::{RelayError, Result};

/// Core relay server
pub struct Server {
    /// Opens the TCP leg of a session
    pub connector: Arc<dyn OutboundConnector>,
    /// Answers DNS datagrams
    pub resolver: Arc<dyn DnsResolver>,
    /// Live session registry
    pub sessions: SessionManager,
    /// Connection performance configuration
    pub conn_config: ConnConfig,
    /// Default retry destination, overridable per connection
    pub fallback: Option<FallbackTarget>,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

/// Builder for constructing a Server
#[derive(Default)]
pub struct ServerBuilder {
    connector: Option<Arc<dyn OutboundConnector>>,
    resolver: Option<Arc<dyn DnsResolver>>,
    sessions: Option<SessionManager>,
    conn_config: Option<ConnConfig>,
    fallback: Option<FallbackTarget>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set outbound connector
    pub fn connector(mut self, connector: Arc<dyn OutboundConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set DNS resolver
    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set session manager
    pub fn sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set connection configuration
    pub fn conn_config(mut self, config: ConnConfig) -> Self {
        self.conn_config = Some(config);
        self
    }

    /// Set the default fallback destination
    pub fn fallback(mut self, fallback: Option<FallbackTarget>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Build the server.
    ///
    /// The resolver is required. Without a connector, a [`DirectConnector`]
    /// using the connection configuration's timeout and nodelay is installed.
    pub fn build(self) -> Result<Server> {
        let conn_config = self.conn_config.unwrap_or_default();
        let resolver = self
            .resolver
            .ok_or_else(|| RelayError::Config("DNS resolver is required".to_string()))?;
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(DirectConnector::new(
                conn_config.connect_timeout,
                conn_config.tcp_nodelay,
            ))
        });

        Ok(Server {
            connector,
            resolver,
            sessions: self.sessions.unwrap_or_default(),
            conn_config,
            fallback: self.fallback,
        })
    }
}
