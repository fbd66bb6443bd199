//! UDP/DNS relay engine
//!
//! Inbound bytes of a DNS session are a sequence of length-prefixed datagrams:
//!
//! ```text
//! +--------+---------+--------+---------+
//! | Length | Payload | Length | Payload | ...
//! | 2      | var     | 2      | var     |
//! +--------+---------+--------+---------+
//! ```
//!
//! Each datagram becomes exactly one DNS-over-HTTPS request. Answers are framed
//! the same way and written back to the client; the first framed answer carries
//! the session's response prefix. A failed round-trip drops that datagram only.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::Sink;
use std::io;
use std::sync::Arc;

use super::hooks::DnsResolver;
use super::sink::{ClientSink, ResponseFramer};
use crate::error::{RelayError, Result};
use crate::logger::log;

const LENGTH_PREFIX: usize = 2;

/// Splits the inbound byte stream into datagrams.
///
/// A datagram cut off at the end of a chunk is kept and completed by the next
/// chunk.
#[derive(Debug, Default)]
pub struct UdpDemuxer {
    buf: BytesMut,
}

impl UdpDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and drain every complete datagram
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut datagrams = Vec::new();
        while self.buf.len() >= LENGTH_PREFIX {
            let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
            if self.buf.len() < LENGTH_PREFIX + len {
                break;
            }
            self.buf.advance(LENGTH_PREFIX);
            datagrams.push(self.buf.split_to(len).freeze());
        }
        datagrams
    }

    /// Bytes held back waiting for the rest of a datagram
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Prefix `body` with its big-endian u16 length
pub fn encode_dns_frame(body: &[u8]) -> io::Result<Bytes> {
    let len = u16::try_from(body.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("DNS message too large: {} bytes", body.len()),
        )
    })?;
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + body.len());
    frame.put_u16(len);
    frame.put_slice(body);
    Ok(frame.freeze())
}

/// Per-session DNS relay state
pub struct DnsRelay {
    resolver: Arc<dyn DnsResolver>,
    demuxer: UdpDemuxer,
    framer: ResponseFramer,
    queries: u64,
    answered: u64,
}

impl DnsRelay {
    pub fn new(resolver: Arc<dyn DnsResolver>, response_prefix: Option<[u8; 2]>) -> Self {
        Self {
            resolver,
            demuxer: UdpDemuxer::new(),
            framer: ResponseFramer::new(response_prefix),
            queries: 0,
            answered: 0,
        }
    }

    /// Relay every complete datagram in `chunk`, in order.
    ///
    /// Returns the number of bytes written to the client. Resolver failures are
    /// logged and skipped; a failed write to the client is fatal.
    pub async fn feed<K>(&mut self, chunk: &[u8], client: &mut ClientSink<K>) -> Result<u64>
    where
        K: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let mut written = 0u64;

        for query in self.demuxer.push(chunk) {
            self.queries += 1;

            let answer = match self.resolver.resolve(query).await {
                Ok(answer) => answer,
                Err(e) => {
                    log::debug!(error = %e, "DNS query failed, dropping datagram");
                    continue;
                }
            };

            let frame = match encode_dns_frame(&answer) {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!(error = %e, "DNS answer not relayable, dropping datagram");
                    continue;
                }
            };

            let frame = self.framer.frame(frame);
            written += frame.len() as u64;
            client
                .send(frame)
                .await
                .map_err(|e| RelayError::Transport(format!("DNS answer write failed: {}", e)))?;
            self.answered += 1;
        }

        Ok(written)
    }

    /// Datagrams sent to the resolver
    pub fn queries(&self) -> u64 {
        self.queries
    }

    /// Answers delivered to the client
    pub fn answered(&self) -> u64 {
        self.answered
    }
}
