use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc as StdArc;
use std::task::{Context, Poll};

use async_dup::{Arc, Mutex};
use futures_lite::io::{self, AsyncRead, AsyncReadExt};

use crate::chunked::ChunkedReader;
use crate::SharedReader;

pub(crate) enum BodyState<IO> {
    Fixed {
        reader: SharedReader<IO>,
        remaining: u64,
    },
    Chunked(ChunkedReader<IO>),
    Done,
    Failed,
}

/// Reads one request body off the connection.
///
/// Clones share their position, which lets the connection drain whatever
/// the application left unread.
pub(crate) struct BodyReader<IO> {
    state: Arc<Mutex<BodyState<IO>>>,
    expect: Option<StdArc<AtomicBool>>,
}

impl<IO> Clone for BodyReader<IO> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            expect: self.expect.clone(),
        }
    }
}

impl<IO> fmt::Debug for BodyReader<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            BodyState::Fixed { remaining, .. } => format!("Fixed({})", remaining),
            BodyState::Chunked(_) => "Chunked".to_string(),
            BodyState::Done => "Done".to_string(),
            BodyState::Failed => "Failed".to_string(),
        };
        f.debug_struct("BodyReader").field("state", &state).finish()
    }
}

impl<IO: AsyncRead + Unpin> BodyReader<IO> {
    pub(crate) fn new(state: BodyState<IO>, expect: Option<StdArc<AtomicBool>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            expect,
        }
    }

    /// Whether reading would require a `100 Continue` that was never sent.
    pub(crate) fn is_gated(&self) -> bool {
        let finished = matches!(&*self.state.lock(), BodyState::Done);
        match &self.expect {
            Some(sent) => !finished && !sent.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// Read and discard the rest of the body.
    pub(crate) async fn drain(&self) -> io::Result<u64> {
        let mut reader = self.clone();
        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        loop {
            match reader.read(&mut scratch).await? {
                0 => return Ok(drained),
                n => drained += n as u64,
            }
        }
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for BodyReader<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();
        let result = match &mut *state {
            BodyState::Fixed { reader, remaining } => {
                if *remaining == 0 {
                    Poll::Ready(Ok(0))
                } else {
                    let max = (*remaining).min(buf.len() as u64) as usize;
                    match Pin::new(&mut *reader.lock()).poll_read(cx, &mut buf[..max]) {
                        Poll::Ready(Ok(0)) => {
                            log::debug!("request body ended {} bytes early", remaining);
                            *remaining = 0;
                            Poll::Ready(Ok(0))
                        }
                        Poll::Ready(Ok(n)) => {
                            *remaining -= n as u64;
                            Poll::Ready(Ok(n))
                        }
                        other => other,
                    }
                }
            }
            BodyState::Chunked(reader) => Pin::new(reader).poll_read(cx, buf),
            BodyState::Done => Poll::Ready(Ok(0)),
            BodyState::Failed => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request body framing already failed",
            ))),
        };

        let finished = match &*state {
            BodyState::Fixed { remaining, .. } => *remaining == 0,
            _ => false,
        };
        if let Poll::Ready(Err(_)) = result {
            *state = BodyState::Failed;
        } else if finished || matches!(result, Poll::Ready(Ok(0))) {
            *state = BodyState::Done;
        }
        result
    }
}
