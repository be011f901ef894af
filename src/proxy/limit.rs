//! Response body size enforcement.
//!
//! The cap applies to decoded body bytes. How it is enforced depends on the
//! upstream framing:
//!
//! - **Fixed length**: `Content-Length` states the size up front, so an
//!   over-cap response is refused wholesale (`502`) before a single body
//!   byte moves. That decision lives in the forward engine; this module
//!   supplies the check.
//! - **Chunked / unknown length**: the size is only known as it streams, so
//!   [`LimitedBody`] counts decoded bytes and ends the stream at the cap.
//!   The final frame is trimmed to the remaining budget; the client sees a
//!   well-formed message of exactly `min(cap, upstream_bytes)` bytes,
//!   terminated by the zero-length chunk hyper emits when the body ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};

/// Decide whether a fixed-length response fits under the cap.
///
/// A `limit` of zero means unlimited.
pub fn fits_fixed_length(declared: u64, limit: u64) -> bool {
    limit == 0 || declared <= limit
}

/// Streaming body wrapper that ends the stream once `limit` decoded bytes
/// have been forwarded.
pub struct LimitedBody<B> {
    inner: B,
    remaining: u64,
    unlimited: bool,
}

impl<B> LimitedBody<B> {
    /// Wrap `inner` with a byte budget. A `limit` of zero means unlimited.
    pub fn new(inner: B, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            unlimited: limit == 0,
        }
    }

    /// Bytes still allowed through.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the budget was exhausted before the upstream finished.
    pub fn capped(&self) -> bool {
        !self.unlimited && self.remaining == 0
    }
}

impl<B> Body for LimitedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.capped() {
            // Stop reading upstream entirely; the stream ends here.
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                Ok(mut data) => {
                    if this.unlimited {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                    if (data.len() as u64) > this.remaining {
                        data.truncate(this.remaining as usize);
                        this.remaining = 0;
                    } else {
                        this.remaining -= data.len() as u64;
                    }
                    Poll::Ready(Some(Ok(Frame::data(data))))
                }
                // Trailers pass through untouched.
                Err(other) => Poll::Ready(Some(Ok(other))),
            },
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.capped() || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let inner = self.inner.size_hint();
        if self.unlimited {
            return inner;
        }
        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower().min(self.remaining));
        hint.set_upper(match inner.upper() {
            Some(upper) => upper.min(self.remaining),
            None => self.remaining,
        });
        hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::convert::Infallible;

    /// Body yielding a fixed sequence of data frames.
    struct ChunkedStub {
        chunks: VecDeque<Bytes>,
    }

    impl ChunkedStub {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            }
        }
    }

    impl Body for ChunkedStub {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.get_mut().chunks.pop_front().map(|c| Ok(Frame::data(c))))
        }

        fn is_end_stream(&self) -> bool {
            self.chunks.is_empty()
        }
    }

    async fn collect_bytes<B>(body: B) -> Vec<u8>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Debug,
    {
        body.collect().await.unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_fits_fixed_length() {
        assert!(fits_fixed_length(8, 8));
        assert!(fits_fixed_length(7, 8));
        assert!(!fits_fixed_length(9, 8));
        // Zero cap means unlimited.
        assert!(fits_fixed_length(u64::MAX, 0));
    }

    #[tokio::test]
    async fn test_under_cap_passes_through() {
        let body = LimitedBody::new(ChunkedStub::new(&[b"hello", b" world"]), 64);
        let bytes = collect_bytes(body).await;
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_cap_at_chunk_boundary() {
        let body = LimitedBody::new(ChunkedStub::new(&[b"aaaa", b"bbbb", b"cccc"]), 8);
        let bytes = collect_bytes(body).await;
        assert_eq!(bytes, b"aaaabbbb");
    }

    #[tokio::test]
    async fn test_cap_mid_chunk_trims_frame() {
        let body = LimitedBody::new(ChunkedStub::new(&[b"aaaa", b"bbbb"]), 6);
        let bytes = collect_bytes(body).await;
        assert_eq!(bytes, b"aaaabb");
    }

    #[tokio::test]
    async fn test_zero_limit_is_unlimited() {
        let payload = vec![b'x'; 64 * 1024];
        let body = LimitedBody::new(ChunkedStub::new(&[&payload]), 0);
        let bytes = collect_bytes(body).await;
        assert_eq!(bytes.len(), payload.len());
    }

    #[tokio::test]
    async fn test_capped_flag() {
        let mut body = LimitedBody::new(ChunkedStub::new(&[b"aaaa", b"bbbb"]), 6);
        assert!(!body.capped());
        while let Some(frame) = body.frame().await {
            frame.unwrap();
        }
        assert!(body.capped());
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_size_hint_bounded_by_budget() {
        let body = LimitedBody::new(ChunkedStub::new(&[b"aaaa", b"bbbb"]), 6);
        assert_eq!(body.size_hint().upper(), Some(6));
    }
}
