//! Inbound stream adapter
//!
//! Wraps the client's message stream so that the early-data blob carried in the
//! upgrade request is delivered as the very first chunk, ahead of anything
//! received on the live connection. Cancellation is latched: once cancelled the
//! adapter yields nothing more, and a second cancel is a no-op.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::RelayError;

/// Standard alphabet, padding optional: the header value arrives with the
/// url-safe characters already swapped back.
const EARLY_DATA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the early-data header value (base64url).
///
/// Returns `Ok(None)` when the value is blank or decodes to nothing.
pub fn decode_early_data(value: &str) -> Result<Option<Bytes>, RelayError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let normalized = value.replace('-', "+").replace('_', "/");
    let decoded = EARLY_DATA_ENGINE
        .decode(normalized.as_bytes())
        .map_err(|e| RelayError::EarlyData(e.to_string()))?;

    if decoded.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Bytes::from(decoded)))
    }
}

pin_project! {
    /// Client-to-relay chunk stream with early data prepended
    pub struct InboundStream<S> {
        early_data: Option<Bytes>,
        #[pin]
        messages: S,
        cancelled: bool,
    }
}

impl<S> InboundStream<S> {
    pub fn new(messages: S, early_data: Option<Bytes>) -> Self {
        Self {
            early_data,
            messages,
            cancelled: false,
        }
    }

    /// Stop delivering chunks. Returns `true` only for the call that cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.early_data = None;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl<S> Stream for InboundStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.cancelled {
            return Poll::Ready(None);
        }
        if let Some(data) = this.early_data.take() {
            return Poll::Ready(Some(Ok(data)));
        }
        this.messages.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};

    fn chunks(items: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            items
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_decode_early_data_urlsafe() {
        // 0xfb 0xff 0xfe encodes to "+//+" in the standard alphabet
        let decoded = decode_early_data("-__-").unwrap().unwrap();
        assert_eq!(decoded.as_ref(), &[0xfb, 0xff, 0xfe]);
    }

    #[test]
    fn test_decode_early_data_padding_optional() {
        assert_eq!(
            decode_early_data("aGVsbG8").unwrap().unwrap().as_ref(),
            b"hello"
        );
        assert_eq!(
            decode_early_data("aGVsbG8=").unwrap().unwrap().as_ref(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_early_data_empty() {
        assert!(decode_early_data("").unwrap().is_none());
        assert!(decode_early_data("  ").unwrap().is_none());
    }

    #[test]
    fn test_decode_early_data_invalid() {
        let err = decode_early_data("not base64!").unwrap_err();
        assert!(matches!(err, RelayError::EarlyData(_)));
    }

    #[tokio::test]
    async fn test_early_data_comes_first() {
        let mut inbound = InboundStream::new(
            chunks(&["second", "third"]),
            Some(Bytes::from_static(b"first")),
        );
        let mut seen = Vec::new();
        while let Some(chunk) = inbound.next().await {
            seen.push(chunk.unwrap());
        }
        assert_eq!(seen, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_without_early_data() {
        let mut inbound = InboundStream::new(chunks(&["only"]), None);
        assert_eq!(inbound.next().await.unwrap().unwrap().as_ref(), b"only");
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut inbound = InboundStream::new(chunks(&["a", "b"]), Some(Bytes::from_static(b"ed")));
        assert!(!inbound.is_cancelled());
        assert!(inbound.cancel());
        assert!(!inbound.cancel());
        assert!(inbound.is_cancelled());
        assert!(inbound.next().await.is_none());
    }
}
