//! Message heads built on `http_types` header maps.

use http_types::headers::{HeaderValue, HeaderValues};
use http_types::{Trailers, Version};

pub use http_types::headers::Headers;

/// The part every HTTP message shares: protocol version and header fields.
#[derive(Debug, Clone)]
pub struct MessageHead {
    /// Protocol version of the message.
    pub version: Version,
    /// Header fields of the message.
    pub headers: Headers,
}

impl MessageHead {
    /// Create a head with no headers.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            headers: empty(),
        }
    }
}

impl Default for MessageHead {
    fn default() -> Self {
        Self::new(Version::Http1_1)
    }
}

/// An empty header map.
pub(crate) fn empty() -> Headers {
    // `Headers` has no public constructor, `Trailers` derefs to an empty one.
    let trailers = Trailers::new();
    Headers::clone(&trailers)
}

/// Every value of `name`, in arrival order.
pub(crate) fn values<'a>(headers: &'a Headers, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get(name)
        .into_iter()
        .flat_map(HeaderValues::iter)
        .map(HeaderValue::as_str)
}

/// The first value of `name`.
pub(crate) fn first<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    values(headers, name).next()
}

/// Whether any comma separated element of `name` equals `token`, ignoring case.
pub(crate) fn contains_token(headers: &Headers, name: &str, token: &str) -> bool {
    values(headers, name)
        .flat_map(|value| value.split(','))
        .any(|element| element.trim().eq_ignore_ascii_case(token))
}

/// Append every field of `other` to `headers`.
pub(crate) fn merge(headers: &mut Headers, other: Headers) {
    for (name, values) in other {
        headers.append(name, &values);
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::Http0_9 => "HTTP/0.9",
        Version::Http1_0 => "HTTP/1.0",
        Version::Http2_0 => "HTTP/2",
        Version::Http3_0 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}
