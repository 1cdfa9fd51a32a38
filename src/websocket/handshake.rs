//! Opening handshake (RFC6455 §4).

use base64::Engine;
use http_types::{StatusCode, Url};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::headers::{self, Headers};
use crate::websocket::compression::{self, DeflateConfig};
use crate::websocket::Options;
use crate::{Error, Request, Response, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken.
pub const SUPPORTED_VERSION: &str = "13";

/// What both ends agreed on during the handshake.
#[derive(Debug, Clone, Default)]
pub(crate) struct Negotiated {
    pub(crate) compression: Option<DeflateConfig>,
    pub(crate) protocol: Option<String>,
    pub(crate) extensions: Option<String>,
}

/// `Sec-WebSocket-Accept` for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// A fresh random `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// Validate an upgrade request and build the `101` answer.
pub(crate) fn negotiate(request: &Request, options: &Options) -> Result<(Response, Negotiated)> {
    if !request.method().eq_ignore_ascii_case("GET") {
        return Err(Error::bad_request("websocket upgrade must use GET"));
    }
    if request.version() != http_types::Version::Http1_1 {
        return Err(Error::bad_request("websocket upgrade requires HTTP/1.1"));
    }
    let fields = request.headers();
    if !headers::contains_token(fields, "Upgrade", "websocket") {
        return Err(Error::bad_request("missing Upgrade: websocket"));
    }
    if !headers::contains_token(fields, "Connection", "upgrade") {
        return Err(Error::bad_request("missing Connection: Upgrade"));
    }
    let key = match headers::first(fields, "Sec-WebSocket-Key").map(str::trim) {
        Some(key) if !key.is_empty() => key,
        _ => return Err(Error::bad_request("missing Sec-WebSocket-Key")),
    };
    if headers::first(fields, "Sec-WebSocket-Version").map(str::trim) != Some(SUPPORTED_VERSION) {
        return Err(Error::bad_request("unsupported Sec-WebSocket-Version"));
    }

    let mut negotiated = Negotiated::default();
    let mut res = Response::new(StatusCode::SwitchingProtocols);
    res.insert_header("Upgrade", "websocket");
    res.insert_header("Connection", "Upgrade");
    res.insert_header("Sec-WebSocket-Accept", accept_key(key));

    let requested = headers::values(fields, "Sec-WebSocket-Protocol")
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find(|offered| options.protocols.iter().any(|p| p == offered));
    if let Some(protocol) = requested {
        res.insert_header("Sec-WebSocket-Protocol", protocol);
        negotiated.protocol = Some(protocol.to_string());
    }

    if options.compression && !options.ignore_extensions {
        let offers = headers::values(fields, "Sec-WebSocket-Extensions")
            .collect::<Vec<_>>()
            .join(",");
        if let Some(config) = compression::accept_offer(&offers) {
            let value = config.header_value();
            res.insert_header("Sec-WebSocket-Extensions", &value);
            negotiated.extensions = Some(value);
            negotiated.compression = Some(config);
        }
    }

    for (name, value) in &options.cookies {
        res.append_header("Set-Cookie", format!("{}={}", name, value));
    }

    Ok((res, negotiated))
}

/// Serialize a client handshake request for `url`.
pub(crate) fn client_request(url: &Url, key: &str, options: &Options) -> Result<Vec<u8>> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidArgument(format!("{} has no host", url)))?;
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut req = format!("GET {} HTTP/1.1\r\n", target);
    match url.port() {
        Some(port) => req.push_str(&format!("Host: {}:{}\r\n", host, port)),
        None => req.push_str(&format!("Host: {}\r\n", host)),
    }
    req.push_str("Upgrade: websocket\r\n");
    req.push_str("Connection: Upgrade\r\n");
    req.push_str(&format!("Sec-WebSocket-Key: {}\r\n", key));
    req.push_str(&format!("Sec-WebSocket-Version: {}\r\n", SUPPORTED_VERSION));
    if !options.protocols.is_empty() {
        req.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            options.protocols.join(", ")
        ));
    }
    if options.compression && !options.ignore_extensions {
        req.push_str(&format!(
            "Sec-WebSocket-Extensions: {}; client_max_window_bits\r\n",
            compression::PERMESSAGE_DEFLATE
        ));
    }
    if let Some(origin) = &options.origin {
        req.push_str(&format!("Origin: {}\r\n", origin));
    }
    if !options.cookies.is_empty() {
        let cookies = options
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        req.push_str(&format!("Cookie: {}\r\n", cookies));
    }
    req.push_str("\r\n");
    Ok(req.into_bytes())
}

/// Check the server's handshake response against what was asked for.
pub(crate) fn validate_response(res: &Response, key: &str, options: &Options) -> Result<Negotiated> {
    let status = res.status();
    if status == StatusCode::Unauthorized {
        return Err(Error::Handshake("server requires authentication".into()));
    }
    if status.is_redirection() {
        return Err(Error::Handshake(format!("unexpected redirect ({})", status)));
    }
    if status != StatusCode::SwitchingProtocols {
        return Err(Error::Handshake(format!("server answered {}", status)));
    }
    let fields: &Headers = res.headers();
    if !headers::contains_token(fields, "Upgrade", "websocket") {
        return Err(Error::Handshake("missing Upgrade: websocket".into()));
    }
    if !headers::contains_token(fields, "Connection", "upgrade") {
        return Err(Error::Handshake("missing Connection: Upgrade".into()));
    }
    if headers::first(fields, "Sec-WebSocket-Accept").map(str::trim) != Some(accept_key(key).as_str()) {
        return Err(Error::Handshake("Sec-WebSocket-Accept mismatch".into()));
    }
    if let Some(version) = headers::first(fields, "Sec-WebSocket-Version") {
        if version.trim() != SUPPORTED_VERSION {
            return Err(Error::Handshake(format!("unsupported version {}", version)));
        }
    }

    let mut negotiated = Negotiated::default();
    if let Some(protocol) = headers::first(fields, "Sec-WebSocket-Protocol").map(str::trim) {
        if !options.protocols.iter().any(|p| p == protocol) {
            return Err(Error::Handshake(format!("unrequested protocol {}", protocol)));
        }
        negotiated.protocol = Some(protocol.to_string());
    }
    if let Some(extensions) = headers::first(fields, "Sec-WebSocket-Extensions") {
        if !options.compression || options.ignore_extensions {
            if !extensions.trim().is_empty() {
                return Err(Error::Handshake(format!(
                    "unrequested extension {}",
                    extensions
                )));
            }
        } else if let Some(config) = compression::validate_response(extensions)? {
            negotiated.extensions = Some(extensions.trim().to_string());
            negotiated.compression = Some(config);
        }
    }
    Ok(negotiated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::MessageHead;

    fn upgrade_request() -> Request {
        let url = Url::parse("http://example.com/chat").unwrap();
        let mut req = Request::new("GET", url);
        let fields = req.headers_mut();
        fields.append("Host", "example.com");
        fields.append("Upgrade", "websocket");
        fields.append("Connection", "keep-alive, Upgrade");
        fields.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        fields.append("Sec-WebSocket-Version", "13");
        req
    }

    #[test]
    fn rfc_accept_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_sixteen_bytes() {
        let key = generate_key();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn server_negotiation() {
        let mut req = upgrade_request();
        req.headers_mut().append("Sec-WebSocket-Protocol", "chat, superchat");
        req.headers_mut()
            .append("Sec-WebSocket-Extensions", "permessage-deflate; client_max_window_bits");
        let options = Options {
            protocols: vec!["superchat".into()],
            compression: true,
            ..Options::default()
        };
        let (res, negotiated) = negotiate(&req, &options).unwrap();
        assert_eq!(res.status(), StatusCode::SwitchingProtocols);
        assert_eq!(
            res.header("Sec-WebSocket-Accept").unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(negotiated.protocol.as_deref(), Some("superchat"));
        assert!(negotiated.compression.is_some());

        let (res, negotiated) = negotiate(
            &req,
            &Options {
                compression: true,
                ignore_extensions: true,
                ..Options::default()
            },
        )
        .unwrap();
        assert!(res.header("Sec-WebSocket-Extensions").is_none());
        assert!(negotiated.compression.is_none());
        assert!(negotiated.protocol.is_none());
    }

    #[test]
    fn server_rejections() {
        let options = Options::default();
        for header in [
            "Upgrade",
            "Connection",
            "Sec-WebSocket-Key",
            "Sec-WebSocket-Version",
        ] {
            let mut req = upgrade_request();
            req.headers_mut().remove(header);
            let err = negotiate(&req, &options).unwrap_err();
            assert_eq!(err.status(), StatusCode::BadRequest, "{}", header);
        }

        let mut req = upgrade_request();
        req.headers_mut().insert("Sec-WebSocket-Version", "8");
        assert!(negotiate(&req, &options).is_err());

        let mut req = upgrade_request();
        req.set_version(http_types::Version::Http1_0);
        assert!(negotiate(&req, &options).is_err());
    }

    #[test]
    fn client_request_headers() {
        let url = Url::parse("ws://example.com:9001/chat?room=1").unwrap();
        let options = Options {
            protocols: vec!["chat".into()],
            origin: Some("http://example.com".into()),
            cookies: vec![("a".into(), "1".into()), ("b".into(), "2".into())],
            ..Options::default()
        };
        let bytes = client_request(&url, "key", &options).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\nHost: example.com:9001\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(text.contains("Origin: http://example.com\r\n"));
        assert!(text.contains("Cookie: a=1; b=2\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn client_validation() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let response = |status: StatusCode, accept: &str| {
            let mut head = MessageHead::default();
            head.headers.append("Upgrade", "websocket");
            head.headers.append("Connection", "Upgrade");
            head.headers.append("Sec-WebSocket-Accept", accept);
            Response::from_parts(status, String::new(), head)
        };
        let options = Options::default();

        let ok = response(StatusCode::SwitchingProtocols, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(validate_response(&ok, key, &options).is_ok());

        let bad = response(StatusCode::SwitchingProtocols, "nope");
        assert!(matches!(
            validate_response(&bad, key, &options),
            Err(Error::Handshake(_))
        ));

        let unauthorized = response(StatusCode::Unauthorized, "");
        assert!(validate_response(&unauthorized, key, &options).is_err());

        let mut with_protocol = ok;
        with_protocol.insert_header("Sec-WebSocket-Protocol", "chat");
        assert!(validate_response(&with_protocol, key, &options).is_err());
    }
}
