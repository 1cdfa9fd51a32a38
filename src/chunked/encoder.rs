use std::pin::Pin;
use std::task::{Context, Poll};

use futures_lite::io::{self, AsyncRead};
use futures_lite::ready;

/// Smallest buffer that fits one byte of data plus framing.
const MIN_BUFFER: usize = 6;

/// An encoder for chunked encoding.
///
/// Every read yields one complete chunk. Once the inner reader is exhausted
/// the terminating `0\r\n\r\n` is produced.
#[derive(Debug)]
pub(crate) struct ChunkedEncoder<R> {
    reader: R,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkedEncoder<R> {
    /// Create a new instance.
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

/// How much data fits in `buf_len` once the hex size and both CRLFs are added.
fn max_bytes_to_read(buf_len: usize) -> usize {
    let mut hex_digits = 1;
    let mut n = buf_len >> 4;
    while n > 0 {
        hex_digits += 1;
        n >>= 4;
    }
    buf_len - 4 - hex_digits
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedEncoder<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if self.done {
            return Poll::Ready(Ok(0));
        }
        if buf.len() < MIN_BUFFER {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer too small for a chunk",
            )));
        }

        let max = max_bytes_to_read(buf.len());
        let bytes = ready!(Pin::new(&mut self.reader).poll_read(cx, &mut buf[..max]))?;
        if bytes == 0 {
            self.done = true;
        }

        let start = format!("{:X}\r\n", bytes);
        let start_length = start.len();
        let total = bytes + start_length + 2;
        buf.copy_within(..bytes, start_length);
        buf[..start_length].copy_from_slice(start.as_bytes());
        buf[total - 2..total].copy_from_slice(b"\r\n");
        Poll::Ready(Ok(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::io::{AsyncReadExt, Cursor};

    #[async_std::test]
    async fn frames_and_terminates() {
        let mut encoder = ChunkedEncoder::new(Cursor::new(b"hello world".to_vec()));
        let mut out = Vec::new();
        let mut buf = [0u8; 10];
        loop {
            let n = encoder.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "5\r\nhello\r\n5\r\n worl\r\n1\r\nd\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn framing_fits() {
        for len in MIN_BUFFER..4096 {
            let max = max_bytes_to_read(len);
            assert!(format!("{:X}\r\n", max).len() + max + 2 <= len);
        }
    }
}
