//! Turn a parsed request head into a [`Request`] with a framed body.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use futures_lite::io::{AsyncRead, AsyncWrite, BufReader};
use http_types::{Body, StatusCode, Url, Version};

use crate::chunked::ChunkedReader;
use crate::headers::{self, Headers};
use crate::read_notifier::ReadNotifier;
use crate::server::body_reader::{BodyReader, BodyState};
use crate::server::parse::RequestHead;
use crate::{Error, Request, Result, SharedReader};

const CONTINUE_HEADER_VALUE: &str = "100-continue";

/// Where a request arrived from.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Peer {
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) secure: bool,
}

/// A decoded request plus the connection's handle on its body.
#[derive(Debug)]
pub(crate) struct Decoded<IO> {
    pub(crate) request: Request,
    pub(crate) body: Option<BodyReader<IO>>,
}

enum Framing {
    Empty,
    Fixed(u64),
    Chunked,
}

/// Validate framing headers and attach a body reader.
pub(crate) fn decode<IO>(
    head: RequestHead,
    io: &IO,
    reader: &SharedReader<IO>,
    peer: Peer,
) -> Result<Decoded<IO>>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    let RequestHead {
        method,
        target,
        head,
    } = head;
    let host = headers::first(&head.headers, "Host");
    if host.is_none() && head.version == Version::Http1_1 {
        return Err(Error::bad_request("mandatory Host header missing"));
    }
    let fallback_host = peer
        .local_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let url = url_from_target(
        &method,
        &target,
        host.unwrap_or(&fallback_host),
        peer.secure,
    )?;

    let framing = framing(&method, &head.headers)?;

    let keep_alive = match head.version {
        Version::Http1_0 => headers::contains_token(&head.headers, "Connection", "keep-alive"),
        _ => !headers::contains_token(&head.headers, "Connection", "close"),
    };
    let expects_continue = head.version == Version::Http1_1
        && headers::first(&head.headers, "Expect")
            .map_or(false, |value| value.eq_ignore_ascii_case(CONTINUE_HEADER_VALUE));

    let mut request = Request::from_parts(method, target, url, head, keep_alive);
    request.set_peer(peer.local_addr, peer.remote_addr, peer.secure);

    let (state, len) = match framing {
        Framing::Empty => return Ok(Decoded { request, body: None }),
        Framing::Fixed(len) => (
            BodyState::Fixed {
                reader: reader.clone(),
                remaining: len,
            },
            Some(len as usize),
        ),
        Framing::Chunked => {
            let (sender, receiver) = async_channel::bounded(1);
            request.set_trailers(receiver);
            (
                BodyState::Chunked(ChunkedReader::new(reader.clone(), sender)),
                None,
            )
        }
    };

    let sent = expects_continue.then(|| Arc::new(AtomicBool::new(false)));
    let body = BodyReader::new(state, sent.clone());
    match sent {
        Some(sent) => {
            let notifier = ReadNotifier::new(body.clone(), io.clone(), sent);
            request.set_body(Body::from_reader(BufReader::new(notifier), len));
        }
        None => request.set_body(Body::from_reader(BufReader::new(body.clone()), len)),
    }

    log::trace!(
        "decoded {} {} ({:?})",
        request.method(),
        request.target(),
        request.version()
    );
    Ok(Decoded {
        request,
        body: Some(body),
    })
}

fn framing(method: &str, fields: &Headers) -> Result<Framing> {
    let transfer_encoding = headers::values(fields, "Transfer-Encoding").last();
    let content_length = fields.get("Content-Length").is_some();

    if let Some(encoding) = transfer_encoding {
        let last = encoding.rsplit(',').next().unwrap_or("").trim();
        if !last.eq_ignore_ascii_case("chunked") {
            return Err(Error::http(
                StatusCode::NotImplemented,
                format!("unsupported transfer encoding {}", encoding),
            ));
        }
        if content_length {
            return Err(Error::bad_request(
                "Content-Length and chunked encoding are both present",
            ));
        }
        return Ok(Framing::Chunked);
    }

    if content_length {
        let mut lengths = headers::values(fields, "Content-Length")
            .flat_map(|value| value.split(','))
            .map(|value| value.trim().parse::<u64>());
        let first = match lengths.next() {
            Some(Ok(len)) => len,
            _ => return Err(Error::bad_request("invalid Content-Length")),
        };
        if !lengths.all(|len| len.ok() == Some(first)) {
            return Err(Error::bad_request("conflicting Content-Length values"));
        }
        return Ok(if first == 0 {
            Framing::Empty
        } else {
            Framing::Fixed(first)
        });
    }

    if method == "POST" || method == "PUT" {
        return Err(Error::http(
            StatusCode::LengthRequired,
            "request body length is required",
        ));
    }
    Ok(Framing::Empty)
}

/// Rebuild the absolute URL of a request from its target and `Host`.
pub(crate) fn url_from_target(method: &str, target: &str, host: &str, secure: bool) -> Result<Url> {
    let scheme = if secure { "https" } else { "http" };
    let invalid = |_| Error::bad_request("invalid request target");

    if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).map_err(invalid)
    } else if target.starts_with('/') {
        Url::parse(&format!("{}://{}/", scheme, host))
            .map_err(invalid)?
            .join(target)
            .map_err(invalid)
    } else if method.eq_ignore_ascii_case("connect") {
        Url::parse(&format!("{}://{}/", scheme, target)).map_err(invalid)
    } else if target == "*" && method.eq_ignore_ascii_case("options") {
        Url::parse(&format!("{}://{}/", scheme, host)).map_err(invalid)
    } else {
        Err(Error::bad_request("unexpected request target format"))
    }
}
