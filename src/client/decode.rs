use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use http_types::headers::{HeaderName, HeaderValue};
use http_types::StatusCode;

use std::convert::TryFrom;

use crate::headers::MessageHead;
use crate::{Error, Response, Result, MAX_HEADERS, MAX_HEAD_LENGTH};

/// Decode an HTTP response head on the client.
///
/// Only the head is consumed; anything the server sent after it stays
/// buffered in `reader`. The returned response has an empty body.
#[doc(hidden)]
pub async fn decode<R>(reader: &mut BufReader<R>) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut httparse_res = httparse::Response::new(&mut headers);

    // Keep reading bytes from the stream until we hit the end of the head.
    loop {
        let bytes_read = reader.read_until(b'\n', &mut buf).await?;
        if bytes_read == 0 {
            return Err(Error::Handshake("connection closed before a response".into()));
        }

        // Prevent CWE-400 DDOS with large HTTP Headers.
        if buf.len() >= MAX_HEAD_LENGTH {
            return Err(Error::Handshake("response head too long".into()));
        }

        // We've hit the end delimiter of the head.
        let idx = buf.len() - 1;
        if idx >= 3 && &buf[idx - 3..=idx] == b"\r\n\r\n" {
            break;
        }
    }

    // Convert our header buf into an httparse instance, and validate.
    let status = httparse_res
        .parse(&buf)
        .map_err(|err| Error::Handshake(format!("malformed response head: {}", err)))?;
    if status.is_partial() {
        return Err(Error::Handshake("malformed response head".into()));
    }

    let code = httparse_res
        .code
        .ok_or_else(|| Error::Handshake("no status code found".into()))?;
    let code = StatusCode::try_from(code)
        .map_err(|_| Error::Handshake(format!("unknown status code {}", code)))?;

    match httparse_res.version {
        Some(1) => {}
        _ => return Err(Error::Handshake("unsupported HTTP version".into())),
    }

    let mut head = MessageHead::default();
    for header in httparse_res.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes().to_vec())
            .map_err(|_| Error::Handshake(format!("invalid header name {}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value.to_vec())
            .map_err(|_| Error::Handshake(format!("header {} is not ASCII", header.name)))?;
        head.headers.append(name, value);
    }
    let reason = httparse_res.reason.unwrap_or_default().to_string();

    Ok(Response::from_parts(code, reason, head))
}
