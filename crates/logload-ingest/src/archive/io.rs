//! Read-side adapters between the object stream and the sync decoders

use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Fails reads once the token is cancelled.
///
/// The error is a plain `Other` error. `Interrupted` would be retried
/// forever by `read_exact` and friends.
pub struct CancellableRead<R> {
    inner: R,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<R> CancellableRead<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: Box::pin(token.cancelled_owned()),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CancellableRead<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::other("read cancelled")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Remembers whether the wrapped source ever failed.
///
/// Decoders surface every failure as `io::Error`; the flag tells a broken
/// source apart from a broken container.
pub struct SourceTap<R> {
    inner: R,
    failed: Arc<AtomicBool>,
}

impl<R> SourceTap<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicBool>) {
        let failed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                failed: failed.clone(),
            },
            failed,
        )
    }
}

impl<R: Read> Read for SourceTap<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|e| {
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed.store(true, Ordering::Relaxed);
            }
        })
    }
}
