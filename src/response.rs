use http_types::headers::{HeaderName, HeaderValues, ToHeaderValues};
use http_types::{Body, StatusCode, Version};

use crate::headers::{Headers, MessageHead};

/// An HTTP response to be written by the server.
///
/// Defaults to `200 OK` over HTTP/1.1 with an empty body. Framing headers
/// (`Content-Length`, `Transfer-Encoding`, `Connection`) are computed when
/// the response is written and any set here are ignored.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    head: MessageHead,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Create a response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            head: MessageHead::default(),
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// A plain text error response that closes the connection.
    pub fn error(status: StatusCode, message: &str) -> Self {
        let mut res = Self::new(status);
        res.set_body(message.to_string());
        res.keep_alive = false;
        res
    }

    pub(crate) fn from_parts(status: StatusCode, reason: String, head: MessageHead) -> Self {
        Self {
            status,
            reason: Some(reason),
            head,
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The reason phrase, falling back to the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason())
    }

    /// Override the reason phrase.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// Protocol version of the response.
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Set the protocol version.
    pub fn set_version(&mut self, version: Version) {
        self.head.version = version;
    }

    /// Header fields of the response.
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    /// Mutable header fields of the response.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.head.headers
    }

    /// Every value of a header.
    pub fn header(&self, name: impl Into<HeaderName>) -> Option<&HeaderValues> {
        self.head.headers.get(name)
    }

    /// Replace every value of a header.
    ///
    /// # Panics
    ///
    /// When a value is not ASCII, as `http_types` does.
    pub fn insert_header(&mut self, name: impl Into<HeaderName>, values: impl ToHeaderValues) {
        self.head.headers.insert(name, values);
    }

    /// Add a value to a header.
    pub fn append_header(&mut self, name: impl Into<HeaderName>, values: impl ToHeaderValues) {
        self.head.headers.append(name, values);
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Take the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    /// Length of the body, if known up front.
    pub fn len(&self) -> Option<usize> {
        self.body.len()
    }

    /// Whether the body is known to be empty.
    pub fn is_empty(&self) -> Option<bool> {
        self.body.is_empty()
    }

    /// Whether the connection may be reused after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Allow or forbid reusing the connection after this response.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
