//! Connection handling logic
//!
//! Turns an upgraded WebSocket connection into a relay session: decodes the
//! early data, picks the fallback destination, registers the session and runs
//! it under its cancellation token.

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use std::io;

use crate::core::{
    decode_early_data, ClientSink, FallbackTarget, InboundStream, Server, Session, SessionContext,
    SessionStats,
};
use crate::error::Result;
use crate::logger::log;
use crate::transport::ConnectionMeta;

/// Fallback for one connection: the path segment wins over the server default
pub fn session_fallback(server: &Server, meta: &ConnectionMeta) -> Option<FallbackTarget> {
    meta.fallback_override()
        .and_then(FallbackTarget::new)
        .or_else(|| server.fallback.clone())
}

/// Process a single connection
pub async fn process_connection<T>(
    server: &Server,
    transport: T,
    meta: ConnectionMeta,
) -> Result<SessionStats>
where
    T: Stream<Item = io::Result<Bytes>> + Sink<Bytes, Error = io::Error>,
{
    let peer_addr = meta.peer_addr.to_string();

    let early_data = match meta.early_data.as_deref() {
        Some(value) => decode_early_data(value)?,
        None => None,
    };

    let fallback = session_fallback(server, &meta);
    log::debug!(
        peer = %peer_addr,
        path = %meta.path,
        early_data = early_data.as_ref().map_or(0, |d| d.len()),
        fallback = fallback.as_ref().map(|f| f.as_str()).unwrap_or("-"),
        "Session starting"
    );

    let (sink, messages) = transport.split();
    let mut inbound = InboundStream::new(messages, early_data);
    let mut client = ClientSink::new(sink);

    // Register session for tracking and shutdown
    let (session_id, cancel_token) = server.sessions.register(meta.peer_addr);
    let _guard = scopeguard::guard((), |_| {
        server.sessions.unregister(session_id);
    });

    let ctx = SessionContext {
        peer_addr: meta.peer_addr,
        fallback,
    };
    let mut session = Session::new(server, ctx);
    let stats = session.run(&mut inbound, &mut client, cancel_token).await?;

    log::debug!(
        peer = %peer_addr,
        session_id = session_id,
        upload = stats.upload,
        download = stats.download,
        retried = stats.retried,
        "Session finished"
    );
    Ok(stats)
}
