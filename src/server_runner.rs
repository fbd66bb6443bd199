//! Server startup and accept loop
//!
//! This module handles listener setup, the WebSocket upgrade handshake and
//! the main connection accept loop.

use crate::config;
use crate::core::Server;
use crate::handler::process_connection;
use crate::logger::log;
use crate::transport::{ConnectionMeta, WebSocketTransport};

use anyhow::{anyhow, Result};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::HeaderValue;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// TCP keepalive interval. Dead peers are detected in ~45s (3 probes x 15s).
const TCP_KEEPALIVE_SECS: u64 = 15;

/// Parse peer address string into SocketAddr, falling back to 0.0.0.0:0
fn parse_peer_addr(addr: &str) -> SocketAddr {
    addr.parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
}

/// Tungstenite limits derived from the relay buffer size
fn ws_config(buf_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .write_buffer_size(buf_size)
        .max_write_buffer_size(buf_size * 2)
        .max_message_size(Some(buf_size * 4))
        .max_frame_size(Some(buf_size * 2))
}

/// Request details captured during the upgrade
#[derive(Debug, Default)]
struct UpgradeInfo {
    path: String,
    protocol: Option<HeaderValue>,
}

/// Perform the WebSocket upgrade, echoing `sec-websocket-protocol` back to the
/// client. Returns the stream plus the request path and early-data value.
pub async fn upgrade<S>(
    stream: S,
    buf_size: usize,
) -> Result<(WebSocketStream<S>, String, Option<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut info = UpgradeInfo::default();

    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        |req: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
            info.path = req.uri().path().to_string();
            if let Some(value) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
                info.protocol = Some(value.clone());
            }
            Ok(response)
        },
        Some(ws_config(buf_size)),
    )
    .await?;

    let early_data = match info.protocol {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|e| anyhow!("Invalid sec-websocket-protocol header: {}", e))?
                .to_string(),
        ),
        None => None,
    };

    Ok((ws_stream, info.path, early_data))
}

/// Accept and handle a connection: upgrade under the handshake timeout, then
/// run the relay session
pub async fn accept_connection<S>(server: Arc<Server>, stream: S, peer_addr: String) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws_stream, path, early_data) = match tokio::time::timeout(
        server.conn_config.handshake_timeout,
        upgrade(stream, server.conn_config.buffer_size),
    )
    .await
    {
        Ok(Ok(upgraded)) => upgraded,
        Ok(Err(e)) => {
            log::debug!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
            return Err(e);
        }
        Err(_) => {
            log::debug!(peer = %peer_addr, "WebSocket handshake timeout");
            return Err(anyhow!("WebSocket handshake timeout"));
        }
    };

    let meta = ConnectionMeta {
        peer_addr: parse_peer_addr(&peer_addr),
        path,
        early_data,
    };
    process_connection(&server, WebSocketTransport::new(ws_stream), meta).await?;
    Ok(())
}

/// Bind the TCP listener with SO_REUSEADDR for fast restarts
pub fn bind_listener(config: &config::ServerConfig, backlog: i32) -> Result<TcpListener> {
    let socket_addr: SocketAddr = config.bind_addr().parse()?;
    let socket = socket2::Socket::new(
        match socket_addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Accept loop. Returns when `shutdown` fires or the listener fails fatally.
pub async fn serve(
    server: Arc<Server>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    // Connection limiter: 0 = unlimited
    let conn_limiter = if server.conn_config.max_connections > 0 {
        Some(Arc::new(Semaphore::new(server.conn_config.max_connections)))
    } else {
        None
    };

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => {
                log::info!("Accept loop stopped");
                break;
            }
        };

        match accepted {
            Ok((stream, addr)) => {
                let peer_addr = addr.to_string();
                log::connection(&peer_addr, "new");

                // Acquire connection permit (backpressure when at limit)
                let permit = match conn_limiter {
                    Some(ref limiter) => match limiter.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    None => None,
                };

                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    // Hold permit for the lifetime of this connection
                    let _permit = permit;

                    if server.conn_config.tcp_nodelay {
                        let _ = stream.set_nodelay(true);
                    }

                    // Detect dead peers (mobile disconnect, network change, etc.)
                    let keepalive = TcpKeepalive::new()
                        .with_time(std::time::Duration::from_secs(TCP_KEEPALIVE_SECS))
                        .with_interval(std::time::Duration::from_secs(TCP_KEEPALIVE_SECS));
                    let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);

                    if let Err(e) = accept_connection(server, stream, peer_addr.clone()).await {
                        log::debug!(peer = %peer_addr, error = %e, "Connection error");
                    }
                    log::connection(&peer_addr, "closed");
                });
            }
            Err(e) => {
                log::error!(error = %e, "Failed to accept connection");
                if e.kind() == std::io::ErrorKind::Other {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Bind and run the server until `shutdown` fires
pub async fn run_server(
    server: Arc<Server>,
    config: &config::ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind_listener(config, server.conn_config.tcp_backlog)?;
    let local_addr = listener.local_addr()?;

    log::info!(
        address = %local_addr,
        max_connections = server.conn_config.max_connections,
        fallback = server.fallback.as_ref().map(|f| f.as_str()).unwrap_or("-"),
        "Server started"
    );

    serve(server, listener, shutdown).await
}
