use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_lite::io::{self, AsyncRead, AsyncWrite};
use futures_lite::ready;
use pin_project::pin_project;

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Answers `Expect: 100-continue` the first time the body is read.
///
/// The interim response is written before any body byte is requested from
/// the peer, so a body the application never touches is never solicited.
#[pin_project]
pub(crate) struct ReadNotifier<B, W> {
    #[pin]
    reader: B,
    writer: W,
    written: usize,
    sent: Arc<AtomicBool>,
}

impl<B, W> fmt::Debug for ReadNotifier<B, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadNotifier")
            .field("written", &self.written)
            .field("sent", &self.sent.load(Ordering::SeqCst))
            .finish()
    }
}

impl<B: AsyncRead, W: AsyncWrite + Unpin> ReadNotifier<B, W> {
    pub(crate) fn new(reader: B, writer: W, sent: Arc<AtomicBool>) -> Self {
        Self {
            reader,
            writer,
            written: 0,
            sent,
        }
    }
}

impl<B: AsyncRead, W: AsyncWrite + Unpin> AsyncRead for ReadNotifier<B, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();

        while *this.written < CONTINUE_RESPONSE.len() {
            let n = ready!(
                Pin::new(&mut *this.writer).poll_write(cx, &CONTINUE_RESPONSE[*this.written..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero)));
            }
            *this.written += n;
            if *this.written == CONTINUE_RESPONSE.len() {
                log::trace!("sent 100 Continue");
                this.sent.store(true, Ordering::SeqCst);
            }
        }

        this.reader.poll_read(cx, buf)
    }
}
