use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_channel::Sender;
use futures_lite::io::{self, AsyncBufRead, AsyncRead};
use futures_lite::ready;

use http_types::headers::HeaderValue;

use crate::headers::{self, Headers};
use crate::{Error, Result, SharedReader, MAX_HEADERS};

/// Longest accepted chunk-size field, in hex digits.
const MAX_SIZE_LENGTH: usize = 20;

/// Largest trailer block accepted after the last chunk.
const MAX_TRAILER_LENGTH: usize = 4196;

/// Where the decoder is within the chunked framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the first byte of a chunk-size line.
    None,
    /// Inside a chunk-size line.
    PartialSize,
    /// Copying chunk data.
    Body,
    /// Chunk data is complete, expecting its CRLF.
    BodyFinished,
    /// Reading the trailer block after the zero-size chunk.
    Trailer,
}

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    pos: usize,
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
///
/// Bytes go in through [`ChunkDecoder::write`] in pieces of any size and
/// decoded body bytes come out through [`ChunkDecoder::read`]. The decoder
/// stops consuming input at the end of the trailer block, so bytes of a
/// pipelined request are left untouched.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
    chunk_size: u64,
    chunk_read: u64,
    line: Vec<u8>,
    in_extension: bool,
    saw_cr: bool,
    queue: VecDeque<Chunk>,
    total: u64,
    trailer: Vec<u8>,
    trailers: Option<Headers>,
    done: bool,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    /// Create a decoder positioned before the first chunk.
    pub fn new() -> Self {
        Self {
            state: State::None,
            chunk_size: 0,
            chunk_read: 0,
            line: Vec::with_capacity(MAX_SIZE_LENGTH),
            in_extension: false,
            saw_cr: false,
            queue: VecDeque::new(),
            total: 0,
            trailer: Vec::new(),
            trailers: None,
            done: false,
        }
    }

    /// Reset for the next body on the same connection.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current framing state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the terminating chunk and trailer block have been read.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Total number of body bytes decoded so far.
    pub fn total_decoded(&self) -> u64 {
        self.total
    }

    /// Whether more input is needed before [`ChunkDecoder::read`] can return data.
    pub fn want_more(&self) -> bool {
        !self.done && self.queue.is_empty()
    }

    /// Take the trailers parsed after the last chunk.
    pub fn take_trailers(&mut self) -> Option<Headers> {
        self.trailers.take()
    }

    /// Feed framed bytes, returning how many were consumed.
    pub fn write(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        while consumed < input.len() && !self.done {
            if self.state == State::Body {
                consumed += self.copy_body(&input[consumed..]);
                continue;
            }
            let byte = input[consumed];
            consumed += 1;
            match self.state {
                State::None | State::PartialSize => self.size_byte(byte)?,
                State::BodyFinished => self.crlf_byte(byte)?,
                State::Trailer => self.trailer_byte(byte)?,
                State::Body => unreachable!(),
            }
        }
        Ok(consumed)
    }

    /// Copy decoded body bytes into `buf`, crossing chunk boundaries.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            let chunk = match self.queue.front_mut() {
                Some(chunk) => chunk,
                None => break,
            };
            let n = (chunk.data.len() - chunk.pos).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&chunk.data[chunk.pos..chunk.pos + n]);
            chunk.pos += n;
            written += n;
            if chunk.pos == chunk.data.len() {
                self.queue.pop_front();
            }
        }
        written
    }

    fn size_byte(&mut self, byte: u8) -> Result<()> {
        if self.saw_cr {
            return match byte {
                b'\n' => self.size_line_done(),
                b'\r' => Err(Error::bad_request("2 CR found")),
                _ => Err(Error::bad_request("missing LF")),
            };
        }

        self.state = State::PartialSize;
        match byte {
            b'\r' => self.saw_cr = true,
            b';' => self.in_extension = true,
            b'\n' => return Err(Error::bad_request("expecting CR")),
            _ if self.in_extension => {}
            _ => {
                if self.line.len() == MAX_SIZE_LENGTH {
                    return Err(Error::bad_request("chunk size too long"));
                }
                self.line.push(byte);
            }
        }
        Ok(())
    }

    fn size_line_done(&mut self) -> Result<()> {
        let digits = std::str::from_utf8(&self.line)
            .map(|s| s.trim_matches(|c| c == ' ' || c == '\t'))
            .map_err(|_| Error::bad_request("invalid chunk size"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::bad_request("invalid chunk size"));
        }
        let size = u64::from_str_radix(digits, 16)
            .map_err(|_| Error::bad_request("invalid chunk size"))?;

        self.line.clear();
        self.in_extension = false;
        self.saw_cr = false;
        self.chunk_size = size;
        self.chunk_read = 0;
        self.state = if size == 0 { State::Trailer } else { State::Body };
        Ok(())
    }

    fn copy_body(&mut self, input: &[u8]) -> usize {
        let remaining = self.chunk_size - self.chunk_read;
        let n = (remaining.min(input.len() as u64)) as usize;
        self.queue.push_back(Chunk {
            data: input[..n].to_vec(),
            pos: 0,
        });
        self.chunk_read += n as u64;
        self.total += n as u64;
        if self.chunk_read == self.chunk_size {
            self.state = State::BodyFinished;
        }
        n
    }

    fn crlf_byte(&mut self, byte: u8) -> Result<()> {
        match (self.saw_cr, byte) {
            (false, b'\r') => self.saw_cr = true,
            (false, _) => return Err(Error::bad_request("expecting CR")),
            (true, b'\n') => {
                self.saw_cr = false;
                self.state = State::None;
            }
            (true, _) => return Err(Error::bad_request("missing LF")),
        }
        Ok(())
    }

    fn trailer_byte(&mut self, byte: u8) -> Result<()> {
        if self.trailer.len() == MAX_TRAILER_LENGTH {
            return Err(Error::bad_request("trailer block too long"));
        }
        self.trailer.push(byte);

        if self.trailer == b"\r\n" {
            self.finish(headers::empty());
        } else if self.trailer.ends_with(b"\r\n\r\n") {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let trailers = match httparse::parse_headers(&self.trailer, &mut raw) {
                Ok(httparse::Status::Complete((_, fields))) => {
                    let mut trailers = headers::empty();
                    for field in fields {
                        let value: String = field.value.iter().map(|&b| b as char).collect();
                        let value: HeaderValue = value
                            .trim()
                            .parse()
                            .map_err(|_| Error::bad_request("malformed trailer"))?;
                        trailers.append(field.name, value);
                    }
                    trailers
                }
                Ok(httparse::Status::Partial) | Err(_) => {
                    return Err(Error::bad_request("malformed trailer"))
                }
            };
            self.finish(trailers);
        }
        Ok(())
    }

    fn finish(&mut self, trailers: Headers) {
        self.trailer.clear();
        self.trailers = Some(trailers);
        self.state = State::None;
        self.done = true;
    }
}

/// Reads a chunked body off a shared connection reader.
///
/// Trailers are sent once, when the terminating chunk has been read.
#[derive(Debug)]
pub(crate) struct ChunkedReader<IO> {
    reader: SharedReader<IO>,
    decoder: ChunkDecoder,
    trailers: Option<Sender<Headers>>,
}

impl<IO> ChunkedReader<IO> {
    pub(crate) fn new(reader: SharedReader<IO>, trailers: Sender<Headers>) -> Self {
        Self {
            reader,
            decoder: ChunkDecoder::new(),
            trailers: Some(trailers),
        }
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for ChunkedReader<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            if !this.decoder.queue.is_empty() {
                return Poll::Ready(Ok(this.decoder.read(buf)));
            }
            if this.decoder.is_done() {
                if let (Some(sender), Some(trailers)) =
                    (this.trailers.take(), this.decoder.take_trailers())
                {
                    sender.try_send(trailers).ok();
                }
                return Poll::Ready(Ok(0));
            }

            let mut guard = this.reader.lock();
            let input = ready!(Pin::new(&mut *guard).poll_fill_buf(cx))?;
            if input.is_empty() {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            let used = this.decoder.write(input).map_err(Error::into_io)?;
            Pin::new(&mut *guard).consume(used);
        }
    }
}
