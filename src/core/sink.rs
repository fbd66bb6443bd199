//! Relay-to-client direction
//!
//! - [`ClientSink`] tracks whether the client transport is still open; sending
//!   on a closed transport is a hard error.
//! - [`ResponseFramer`] prepends the protocol's response prefix to the first
//!   reply only.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{Sink, SinkExt};
use std::io;

use crate::logger::log;

/// Response side of the client transport
pub struct ClientSink<K> {
    inner: K,
    open: bool,
}

impl<K> ClientSink<K>
where
    K: Sink<Bytes, Error = io::Error> + Unpin,
{
    pub fn new(inner: K) -> Self {
        Self { inner, open: true }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send one message. Fails with `BrokenPipe` once the transport is closed;
    /// a failed send marks it closed.
    pub async fn send(&mut self, data: Bytes) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client transport is not open",
            ));
        }
        if let Err(e) = self.inner.send(data).await {
            self.open = false;
            return Err(e);
        }
        Ok(())
    }

    /// Close the transport. Returns `true` only for the call that closed it.
    pub async fn close(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        if let Err(e) = self.inner.close().await {
            log::debug!(error = %e, "Client transport close failed");
        }
        true
    }
}

/// One-shot response prefix
#[derive(Debug, Clone, Default)]
pub struct ResponseFramer {
    prefix: Option<[u8; 2]>,
}

impl ResponseFramer {
    pub fn new(prefix: Option<[u8; 2]>) -> Self {
        Self { prefix }
    }

    /// Whether the next frame will still carry the prefix
    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.prefix.is_some()
    }

    /// Combine the prefix with `chunk` into a single frame the first time,
    /// pass `chunk` through afterwards.
    pub fn frame(&mut self, chunk: Bytes) -> Bytes {
        match self.prefix.take() {
            Some(prefix) => {
                let mut framed = BytesMut::with_capacity(prefix.len() + chunk.len());
                framed.put_slice(&prefix);
                framed.put_slice(&chunk);
                framed.freeze()
            }
            None => chunk,
        }
    }
}
