//! Connection deadlines for upstream sockets.
//!
//! Two independent clocks run against every upstream connection:
//!
//! - the **lifetime clock** starts when the connection is dialed and never
//!   resets; when it fires, every subsequent I/O operation fails.
//! - the **read clock** arms when a read is first polled and resets every
//!   time bytes arrive; it catches upstreams that accept the request and
//!   then stall.
//!
//! Both surface as `TimedOut` I/O errors from the stream, which the
//! forwarding layers translate to `502 Bad Gateway` before response headers
//! are out, or a truncated body afterwards.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// Stream wrapper enforcing a wall-clock lifetime and an idle read timeout.
pub struct DeadlineStream<S> {
    inner: S,
    lifetime: Option<Pin<Box<Sleep>>>,
    read_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> DeadlineStream<S> {
    /// Wrap `inner`, starting the lifetime clock now.
    ///
    /// `None` for either duration disables that clock.
    pub fn new(inner: S, lifetime: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            lifetime: lifetime.map(|d| Box::pin(sleep(d))),
            read_timeout,
            read_deadline: None,
        }
    }

    /// Get a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn poll_lifetime(&mut self, cx: &mut Context<'_>) -> Result<(), io::Error> {
        if let Some(deadline) = self.lifetime.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Err(expired("connection lifetime exceeded"));
            }
        }
        Ok(())
    }
}

fn expired(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, message.to_string())
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Err(e) = this.poll_lifetime(cx) {
            return Poll::Ready(Err(e));
        }

        if let Some(timeout) = this.read_timeout {
            let deadline = this
                .read_deadline
                .get_or_insert_with(|| Box::pin(sleep(timeout)));
            if deadline.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(expired("upstream read timed out")));
            }
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() > before {
                    // Data arrived; re-arm the idle clock on the next read.
                    if let (Some(timeout), Some(deadline)) =
                        (this.read_timeout, this.read_deadline.as_mut())
                    {
                        deadline.as_mut().reset(Instant::now() + timeout);
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_lifetime(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_lifetime(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Shutdown is how connections are released after a deadline fires;
        // it must not itself be gated on the lifetime.
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
