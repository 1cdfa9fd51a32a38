use std::net::SocketAddr;

use async_channel::Receiver;
use futures_lite::io::AsyncReadExt;
use http_types::headers::{HeaderName, HeaderValues};
use http_types::{Body, Url, Version};

use crate::headers::{self, Headers, MessageHead};

/// An HTTP request received by the server.
///
/// The body streams straight off the connection. Reading it through
/// [`Request::body_bytes`] or [`Request::body_string`] also merges any
/// chunked trailers into [`Request::headers`].
#[derive(Debug)]
pub struct Request {
    method: String,
    target: String,
    url: Url,
    head: MessageHead,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    secure: bool,
    body: Body,
    trailers: Option<Receiver<Headers>>,
    keep_alive: bool,
}

impl Request {
    /// Create an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        Self {
            method: method.into(),
            target,
            url,
            head: MessageHead::default(),
            local_addr: None,
            remote_addr: None,
            secure: false,
            body: Body::empty(),
            trailers: None,
            keep_alive: true,
        }
    }

    pub(crate) fn from_parts(
        method: String,
        target: String,
        url: Url,
        head: MessageHead,
        keep_alive: bool,
    ) -> Self {
        Self {
            method,
            target,
            url,
            head,
            local_addr: None,
            remote_addr: None,
            secure: false,
            body: Body::empty(),
            trailers: None,
            keep_alive,
        }
    }

    pub(crate) fn set_peer(
        &mut self,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
        secure: bool,
    ) {
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
        self.secure = secure;
    }

    pub(crate) fn set_trailers(&mut self, trailers: Receiver<Headers>) {
        self.trailers = Some(trailers);
    }

    /// The request method, exactly as sent.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target, exactly as sent on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The absolute URL reconstructed from the target and `Host`.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Protocol version of the request.
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Set the protocol version.
    pub fn set_version(&mut self, version: Version) {
        self.head.version = version;
    }

    /// Header fields of the request.
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    /// Mutable header fields of the request.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.head.headers
    }

    /// Every value of a header.
    pub fn header(&self, name: impl Into<HeaderName>) -> Option<&HeaderValues> {
        self.head.headers.get(name)
    }

    /// Local address the request arrived on, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the peer, if known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the request arrived on an endpoint registered with `https`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|value| value.as_str().trim().parse().ok())
    }

    /// Whether the body uses chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        headers::contains_token(&self.head.headers, "Transfer-Encoding", "chunked")
    }

    /// Whether the client allows the connection to be reused.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether this is a WebSocket opening handshake.
    pub fn is_websocket_request(&self) -> bool {
        self.method == "GET"
            && self.head.version == Version::Http1_1
            && headers::contains_token(&self.head.headers, "Upgrade", "websocket")
            && headers::contains_token(&self.head.headers, "Connection", "upgrade")
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Take the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    /// Read the whole body and merge trailers into the headers.
    pub async fn body_bytes(&mut self) -> crate::Result<Vec<u8>> {
        let mut body = self.take_body();
        let mut bytes = Vec::with_capacity(body.len().unwrap_or(0));
        body.read_to_end(&mut bytes).await?;

        if let Some(trailers) = self.trailers.take() {
            if let Ok(trailers) = trailers.try_recv() {
                headers::merge(&mut self.head.headers, trailers);
            }
        }
        Ok(bytes)
    }

    /// Read the whole body as UTF-8 and merge trailers into the headers.
    pub async fn body_string(&mut self) -> crate::Result<String> {
        let bytes = self.body_bytes().await?;
        String::from_utf8(bytes)
            .map_err(|_| crate::Error::bad_request("request body is not valid UTF-8"))
    }
}
