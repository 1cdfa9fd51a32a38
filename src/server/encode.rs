//! Serialize a [`Response`] onto the wire.

use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_lite::io::{self, AsyncRead, AsyncReadExt, Take};
use http_types::headers::{
    HeaderName, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE, SERVER, TRANSFER_ENCODING,
};
use http_types::{Body, StatusCode, Version};

use crate::chunked::ChunkedEncoder;
use crate::date::fmt_http_date;
use crate::headers::version_str;
use crate::Response;

/// Headers the encoder owns; values set by the application are dropped.
const FRAMING_HEADERS: [HeaderName; 3] = [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

/// How the response relates to the request it answers.
#[derive(Debug, Clone, Default)]
pub(crate) struct EncodeOptions {
    /// The request was `HEAD`: send headers only.
    pub(crate) head_request: bool,
    /// The connection may be reused afterwards, as far as the caller knows.
    pub(crate) keep_alive: bool,
    /// Value of the `Server` header, if any.
    pub(crate) server_header: Option<String>,
}

enum EncodedBody {
    Fixed(Take<Body>),
    Chunked(ChunkedEncoder<Body>),
    CloseDelimited(Body),
    Empty,
}

/// A streaming HTTP response encoder.
///
/// Reading from it yields the status line and headers, then the body with
/// whatever framing the response and protocol version call for.
pub(crate) struct Encoder {
    head: Vec<u8>,
    head_bytes_read: usize,
    body: EncodedBody,
    keep_alive: bool,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("head_len", &self.head.len())
            .field("head_bytes_read", &self.head_bytes_read)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl Encoder {
    /// Create a new instance.
    pub(crate) fn new(mut res: Response, opts: EncodeOptions) -> Self {
        let status = res.status();
        let version = match res.version() {
            Version::Http1_0 => Version::Http1_0,
            _ => Version::Http1_1,
        };
        let switching = status == StatusCode::SwitchingProtocols;
        let bodyless = is_informational(status)
            || status == StatusCode::NoContent
            || status == StatusCode::NotModified;

        let mut keep_alive = opts.keep_alive;
        let body = res.take_body();
        let len = body.len();
        let mime = body.mime().to_string();
        let body = if bodyless || opts.head_request {
            EncodedBody::Empty
        } else {
            match len {
                Some(len) => EncodedBody::Fixed(body.take(len as u64)),
                None if version == Version::Http1_1 => {
                    EncodedBody::Chunked(ChunkedEncoder::new(body))
                }
                None => {
                    keep_alive = false;
                    EncodedBody::CloseDelimited(body)
                }
            }
        };

        let mut head = Vec::with_capacity(256);
        // Writes into a Vec cannot fail.
        let _ = write!(
            head,
            "{} {} {}\r\n",
            version_str(version),
            u16::from(status),
            res.reason()
        );

        match &body {
            EncodedBody::Fixed(_) => {
                let _ = write!(head, "Content-Length: {}\r\n", len.unwrap_or(0));
            }
            EncodedBody::Chunked(_) => {
                let _ = write!(head, "Transfer-Encoding: chunked\r\n");
            }
            EncodedBody::Empty if opts.head_request && !bodyless => {
                if let Some(len) = len {
                    let _ = write!(head, "Content-Length: {}\r\n", len);
                }
            }
            EncodedBody::CloseDelimited(_) | EncodedBody::Empty => {}
        }

        if !switching {
            if !keep_alive {
                let _ = write!(head, "Connection: close\r\n");
            } else if version == Version::Http1_0 {
                let _ = write!(head, "Connection: keep-alive\r\n");
            }
        }

        if res.header(DATE).is_none() {
            let date = fmt_http_date(std::time::SystemTime::now());
            let _ = write!(head, "Date: {}\r\n", date);
        }
        if let Some(server) = &opts.server_header {
            if res.header(SERVER).is_none() {
                let _ = write!(head, "Server: {}\r\n", server);
            }
        }
        if !bodyless && len != Some(0) && res.header(CONTENT_TYPE).is_none() {
            let _ = write!(head, "Content-Type: {}\r\n", mime);
        }

        for (name, values) in res.headers().iter() {
            let framing = FRAMING_HEADERS.contains(name);
            if framing && !(switching && *name == CONNECTION) {
                continue;
            }
            for value in values.iter() {
                let _ = write!(head, "{}: {}\r\n", name, value);
            }
        }
        head.extend_from_slice(b"\r\n");

        Self {
            head,
            head_bytes_read: 0,
            body,
            keep_alive,
        }
    }

    /// Whether the framing chosen still allows reusing the connection.
    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

fn is_informational(status: StatusCode) -> bool {
    u16::from(status) < 200
}

impl AsyncRead for Encoder {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        // Send the head first. If `buf` is too small we come back for the rest.
        if this.head_bytes_read < this.head.len() {
            let len = (this.head.len() - this.head_bytes_read).min(buf.len());
            let range = this.head_bytes_read..this.head_bytes_read + len;
            buf[..len].copy_from_slice(&this.head[range]);
            this.head_bytes_read += len;
            return Poll::Ready(Ok(len));
        }

        match &mut this.body {
            EncodedBody::Fixed(body) => Pin::new(body).poll_read(cx, buf),
            EncodedBody::Chunked(body) => Pin::new(body).poll_read(cx, buf),
            EncodedBody::CloseDelimited(body) => Pin::new(body).poll_read(cx, buf),
            EncodedBody::Empty => Poll::Ready(Ok(0)),
        }
    }
}
