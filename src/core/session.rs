//! Per-connection relay session
//!
//! A session is an explicit state machine advanced one step at a time:
//!
//! ```text
//! AwaitingHeader --tcp--> Tcp --remote closed, no data, retry left--> Tcp (fallback)
//!        |                 |
//!        +-----udp-------> Udp
//!        |                 |
//!        +-----------------+--> Closed
//! ```
//!
//! Everything for one session runs on a single task. Inbound chunks are handled
//! strictly in arrival order. Once connected, the client-to-remote and
//! remote-to-client pumps are polled concurrently so neither direction can
//! stall the other.

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dns::DnsRelay;
use super::fallback::{retry_target, FallbackTarget};
use super::hooks::{DnsResolver, OutboundConnector, OutboundStream};
use super::inbound::InboundStream;
use super::protocol::{parse_header, Command, Target};
use super::server::Server;
use super::sink::{ClientSink, ResponseFramer};
use crate::error::{RelayError, Result};
use crate::logger::log;

/// Reconnect attempts allowed per session
pub const MAX_RETRIES: u8 = 1;

/// Per-session inputs decided at connection setup
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub peer_addr: SocketAddr,
    /// Retry destination; `None` retries the original destination
    pub fallback: Option<FallbackTarget>,
}

/// Traffic summary returned when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Client-to-relay bytes after the header
    pub upload: u64,
    /// Relay-to-client bytes, response prefix and DNS framing included
    pub download: u64,
    /// Whether the fallback retry fired
    pub retried: bool,
}

/// Coarse session phase, for logging and inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    Tcp,
    Udp,
    Closed,
}

struct TcpLeg {
    /// Destination the current socket is connected to
    target: Target,
    /// Post-header payload, replayed on retry
    payload: Bytes,
    /// Payload still to be written to the current socket
    replay: Option<Bytes>,
    reader: ReadHalf<OutboundStream>,
    writer: WriteHalf<OutboundStream>,
    buf: Vec<u8>,
    framer: ResponseFramer,
    forwarded: u64,
    retries_left: u8,
}

/// How a TCP step ended
enum TcpEvent {
    ClientClosed,
    RemoteClosed(Option<io::Error>),
    Idle,
}

enum State {
    AwaitingHeader,
    Tcp(TcpLeg),
    Udp(DnsRelay),
    Closed,
}

/// One relay session
pub struct Session {
    state: State,
    connector: Arc<dyn OutboundConnector>,
    resolver: Arc<dyn DnsResolver>,
    ctx: SessionContext,
    idle_timeout: Duration,
    buffer_size: usize,
    stats: SessionStats,
}

impl Session {
    pub fn new(server: &Server, ctx: SessionContext) -> Self {
        Self {
            state: State::AwaitingHeader,
            connector: Arc::clone(&server.connector),
            resolver: Arc::clone(&server.resolver),
            ctx,
            idle_timeout: server.conn_config.idle_timeout,
            buffer_size: server.conn_config.buffer_size,
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::AwaitingHeader => Phase::AwaitingHeader,
            State::Tcp(_) => Phase::Tcp,
            State::Udp(_) => Phase::Udp,
            State::Closed => Phase::Closed,
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Drive the session until either side closes, an error occurs or `cancel`
    /// fires. Both legs are torn down before returning.
    pub async fn run<S, K>(
        &mut self,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
        cancel: CancellationToken,
    ) -> Result<SessionStats>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let result = tokio::select! {
            result = self.drive(inbound, client) => result,
            _ = cancel.cancelled() => {
                log::debug!(peer = %self.ctx.peer_addr, "Session cancelled");
                Ok(())
            }
        };

        self.abort(inbound, client).await;
        result.map(|()| self.stats)
    }

    /// Tear down both legs. Safe to call any number of times; returns `true`
    /// only if this call released something.
    pub async fn abort<S, K>(
        &mut self,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
    ) -> bool
    where
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        // Dropping the leg closes the outbound socket
        let had_outbound = matches!(
            mem::replace(&mut self.state, State::Closed),
            State::Tcp(_) | State::Udp(_)
        );
        let cancelled = inbound.cancel();
        let closed = client.close().await;
        had_outbound || cancelled || closed
    }

    async fn drive<S, K>(
        &mut self,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
    ) -> Result<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        loop {
            let state = mem::replace(&mut self.state, State::Closed);
            self.state = match state {
                State::AwaitingHeader => self.await_header(inbound, client).await?,
                State::Tcp(leg) => self.step_tcp(leg, inbound, client).await?,
                State::Udp(relay) => self.step_udp(relay, inbound, client).await?,
                State::Closed => return Ok(()),
            };
        }
    }

    async fn next_inbound<S>(
        inbound: &mut InboundStream<S>,
        idle: Duration,
        peer: SocketAddr,
    ) -> Result<Option<Bytes>>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        match tokio::time::timeout(idle, inbound.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(RelayError::Transport(e.to_string())),
            Ok(None) => Ok(None),
            Err(_) => {
                log::debug!(peer = %peer, "Session idle timeout");
                Ok(None)
            }
        }
    }

    async fn await_header<S, K>(
        &mut self,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
    ) -> Result<State>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let chunk = match Self::next_inbound(inbound, self.idle_timeout, self.ctx.peer_addr).await? {
            Some(chunk) => chunk,
            None => {
                log::debug!(peer = %self.ctx.peer_addr, "Client closed before sending a header");
                return Ok(State::Closed);
            }
        };

        let peer = self.ctx.peer_addr.to_string();
        let header = match parse_header(&chunk) {
            Ok(header) => header,
            Err(e) => {
                log::protocol(&peer, &e.to_string());
                return Err(e.into());
            }
        };
        let payload = header.payload(&chunk);
        log::session(&peer, header.protocol, &header.target, header.command);
        self.stats.upload += payload.len() as u64;

        match header.command {
            Command::Udp => {
                let mut relay = DnsRelay::new(Arc::clone(&self.resolver), header.response_prefix);
                self.stats.download += relay.feed(&payload, client).await?;
                Ok(State::Udp(relay))
            }
            Command::Tcp => {
                let leg = self
                    .open_tcp(header.target, payload, header.response_prefix)
                    .await?;
                Ok(State::Tcp(leg))
            }
        }
    }

    async fn open_tcp(
        &mut self,
        target: Target,
        payload: Bytes,
        prefix: Option<[u8; 2]>,
    ) -> Result<TcpLeg> {
        let mut retries_left = MAX_RETRIES;

        let (stream, target) = match self.connector.connect(&target).await {
            Ok(stream) => (stream, target),
            Err(e) => {
                let fallback = retry_target(self.ctx.fallback.as_ref(), &target);
                log::debug!(
                    peer = %self.ctx.peer_addr,
                    target = %target,
                    fallback = %fallback,
                    error = %e,
                    "Connect failed, retrying"
                );
                retries_left -= 1;
                self.stats.retried = true;
                let stream = self
                    .connector
                    .connect(&fallback)
                    .await
                    .map_err(|e| {
                        RelayError::Connection(format!("retry to {} failed: {}", fallback, e))
                    })?;
                (stream, fallback)
            }
        };

        log::debug!(peer = %self.ctx.peer_addr, remote = %target, "Connected to remote");
        let (reader, writer) = tokio::io::split(stream);
        Ok(TcpLeg {
            target,
            replay: (!payload.is_empty()).then(|| payload.clone()),
            payload,
            reader,
            writer,
            buf: vec![0u8; self.buffer_size],
            framer: ResponseFramer::new(prefix),
            forwarded: 0,
            retries_left,
        })
    }

    /// Run both directions of the TCP leg until one of them ends it
    async fn step_tcp<S, K>(
        &mut self,
        mut leg: TcpLeg,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
    ) -> Result<State>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let idle = self.idle_timeout;
        let peer = self.ctx.peer_addr;

        // Millis since `started` of the last byte moved in either direction
        let started = Instant::now();
        let last_activity = AtomicU64::new(0);
        let touch = || {
            last_activity.store(started.elapsed().as_millis() as u64, Ordering::Release);
        };

        let event = {
            let SessionStats {
                upload, download, ..
            } = &mut self.stats;
            let TcpLeg {
                target,
                reader,
                writer,
                buf,
                framer,
                forwarded,
                replay,
                ..
            } = &mut leg;

            let client_to_remote = async {
                if let Some(data) = replay.take() {
                    if let Err(e) = writer.write_all(&data).await {
                        return Ok(TcpEvent::RemoteClosed(Some(e)));
                    }
                }
                loop {
                    match inbound.next().await {
                        Some(Ok(chunk)) => {
                            touch();
                            *upload += chunk.len() as u64;
                            if let Err(e) = writer.write_all(&chunk).await {
                                log::debug!(peer = %peer, remote = %target, error = %e, "Remote write failed");
                                return Ok(TcpEvent::RemoteClosed(Some(e)));
                            }
                        }
                        Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
                        None => return Ok(TcpEvent::ClientClosed),
                    }
                }
            };

            let remote_to_client = async {
                loop {
                    let n = match reader.read(&mut buf[..]).await {
                        Ok(0) => return Ok(TcpEvent::RemoteClosed(None)),
                        Ok(n) => n,
                        Err(e) => return Ok(TcpEvent::RemoteClosed(Some(e))),
                    };
                    touch();
                    *forwarded += n as u64;
                    let data = framer.frame(Bytes::copy_from_slice(&buf[..n]));
                    *download += data.len() as u64;
                    if let Err(e) = client.send(data).await {
                        return Err(RelayError::Transport(format!(
                            "write to client failed: {}",
                            e
                        )));
                    }
                }
            };

            let idle_check = async {
                loop {
                    let last = Duration::from_millis(last_activity.load(Ordering::Acquire));
                    tokio::time::sleep_until(started + last + idle).await;
                    let last = Duration::from_millis(last_activity.load(Ordering::Acquire));
                    if started.elapsed() >= last + idle {
                        return;
                    }
                }
            };

            tokio::select! {
                event = client_to_remote => event,
                event = remote_to_client => event,
                _ = idle_check => Ok(TcpEvent::Idle),
            }
        };

        match event? {
            TcpEvent::ClientClosed => {
                log::debug!(peer = %peer, "Client closed");
                Ok(State::Closed)
            }
            TcpEvent::Idle => {
                log::debug!(peer = %peer, "Session idle timeout");
                Ok(State::Closed)
            }
            TcpEvent::RemoteClosed(error) => self.on_remote_closed(leg, error).await,
        }
    }

    /// Retry fires only if nothing was ever forwarded from this leg and the
    /// budget allows it; otherwise the session ends.
    async fn on_remote_closed(&mut self, mut leg: TcpLeg, error: Option<io::Error>) -> Result<State> {
        if leg.forwarded > 0 || leg.retries_left == 0 {
            match error {
                Some(e) => log::debug!(peer = %self.ctx.peer_addr, error = %e, "Remote I/O error"),
                None => log::debug!(peer = %self.ctx.peer_addr, remote = %leg.target, "Remote closed"),
            }
            return Ok(State::Closed);
        }

        leg.retries_left -= 1;
        self.stats.retried = true;
        let fallback = retry_target(self.ctx.fallback.as_ref(), &leg.target);
        log::info!(
            peer = %self.ctx.peer_addr,
            remote = %leg.target,
            fallback = %fallback,
            "Remote closed without data, retrying"
        );

        let stream = self
            .connector
            .connect(&fallback)
            .await
            .map_err(|e| RelayError::Connection(format!("retry to {} failed: {}", fallback, e)))?;
        let (reader, writer) = tokio::io::split(stream);
        leg.reader = reader;
        leg.writer = writer;
        leg.target = fallback;
        leg.replay = (!leg.payload.is_empty()).then(|| leg.payload.clone());
        Ok(State::Tcp(leg))
    }

    async fn step_udp<S, K>(
        &mut self,
        mut relay: DnsRelay,
        inbound: &mut InboundStream<S>,
        client: &mut ClientSink<K>,
    ) -> Result<State>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        match Self::next_inbound(inbound, self.idle_timeout, self.ctx.peer_addr).await? {
            Some(chunk) => {
                self.stats.upload += chunk.len() as u64;
                self.stats.download += relay.feed(&chunk, client).await?;
                Ok(State::Udp(relay))
            }
            None => {
                log::debug!(
                    peer = %self.ctx.peer_addr,
                    queries = relay.queries(),
                    answered = relay.answered(),
                    "DNS session closed"
                );
                Ok(State::Closed)
            }
        }
    }
}
