//! Incremental request-head parser.

use http_types::headers::{HeaderName, HeaderValue};
use http_types::{StatusCode, Version};

use crate::headers::{self, Headers, MessageHead};
use crate::{Error, Result, MAX_HEADERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    RequestLine,
    Headers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    None,
    Cr,
    Lf,
}

/// A request line and its header block.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) head: MessageHead,
}

/// Assembles CRLF terminated lines from arbitrary slices of input and turns
/// them into a [`RequestHead`].
///
/// One parser lives as long as its connection and is reset between requests.
#[derive(Debug)]
pub(crate) struct RequestParser {
    input_state: InputState,
    line_state: LineState,
    line: Vec<u8>,
    head_length: usize,
    max_head_length: usize,
    method: String,
    target: String,
    version: Version,
    headers: Headers,
    header_count: usize,
}

impl RequestParser {
    pub(crate) fn new(max_head_length: usize) -> Self {
        Self {
            input_state: InputState::RequestLine,
            line_state: LineState::None,
            line: Vec::with_capacity(256),
            head_length: 0,
            max_head_length,
            method: String::new(),
            target: String::new(),
            version: Version::Http1_1,
            headers: headers::empty(),
            header_count: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.input_state = InputState::RequestLine;
        self.line_state = LineState::None;
        self.line.clear();
        self.head_length = 0;
        self.method.clear();
        self.target.clear();
        self.version = Version::Http1_1;
        self.headers = headers::empty();
        self.header_count = 0;
    }

    /// Whether nothing but blank lines of the next request has been seen.
    pub(crate) fn is_idle(&self) -> bool {
        self.input_state == InputState::RequestLine && self.line.is_empty()
    }

    /// Consume bytes from `input`, stopping right after the blank line that
    /// ends the head so the body stays in the caller's buffer.
    pub(crate) fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<RequestHead>)> {
        for (offset, &byte) in input.iter().enumerate() {
            self.head_length += 1;
            if self.head_length > self.max_head_length {
                return Err(Error::bad_request("request head too large"));
            }

            match (self.line_state, byte) {
                (LineState::Cr, b'\n') | (LineState::None, b'\n') | (LineState::Lf, b'\n') => {
                    self.line_state = LineState::Lf;
                    if let Some(head) = self.line_done()? {
                        return Ok((offset + 1, Some(head)));
                    }
                }
                (LineState::Cr, _) => return Err(Error::bad_request("missing LF after CR")),
                (_, b'\r') => self.line_state = LineState::Cr,
                (_, _) => {
                    self.line_state = LineState::None;
                    self.line.push(byte);
                }
            }
        }
        Ok((input.len(), None))
    }

    fn line_done(&mut self) -> Result<Option<RequestHead>> {
        let line: String = self.line.drain(..).map(char::from).collect();
        match self.input_state {
            InputState::RequestLine => {
                if !line.is_empty() {
                    self.request_line(&line)?;
                    self.input_state = InputState::Headers;
                }
                Ok(None)
            }
            InputState::Headers if line.is_empty() => {
                let head = RequestHead {
                    method: std::mem::take(&mut self.method),
                    target: std::mem::take(&mut self.target),
                    head: MessageHead {
                        version: self.version,
                        headers: std::mem::replace(&mut self.headers, headers::empty()),
                    },
                };
                self.reset();
                Ok(Some(head))
            }
            InputState::Headers => {
                self.header_line(&line)?;
                Ok(None)
            }
        }
    }

    fn request_line(&mut self, line: &str) -> Result<()> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            return Err(Error::bad_request("invalid request line"));
        }
        let (method, target, version) = (parts[0], parts[1], parts[2]);

        if method.is_empty() || !method.bytes().all(is_token) {
            return Err(Error::bad_request("invalid method"));
        }
        if target.is_empty() {
            return Err(Error::bad_request("missing request target"));
        }
        self.version = parse_version(version)?;
        self.method = method.to_string();
        self.target = target.to_string();
        Ok(())
    }

    fn header_line(&mut self, line: &str) -> Result<()> {
        let colon = line
            .find(':')
            .ok_or_else(|| Error::bad_request("header without colon"))?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');

        if name.is_empty() || !name.bytes().all(is_token) {
            return Err(Error::bad_request("invalid header name"));
        }
        if self.header_count == MAX_HEADERS {
            return Err(Error::bad_request("too many headers"));
        }
        let name: HeaderName = name
            .parse()
            .map_err(|_| Error::bad_request("invalid header name"))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| Error::bad_request("header value is not ASCII"))?;
        self.headers.append(name, value);
        self.header_count += 1;
        Ok(())
    }
}

fn parse_version(version: &str) -> Result<Version> {
    let bytes = version.as_bytes();
    if bytes.len() != 8
        || !version.starts_with("HTTP/")
        || bytes[6] != b'.'
        || !bytes[5].is_ascii_digit()
        || !bytes[7].is_ascii_digit()
    {
        return Err(Error::bad_request("invalid protocol version"));
    }
    match (bytes[5], bytes[7]) {
        (b'1', b'0') => Ok(Version::Http1_0),
        (b'1', _) => Ok(Version::Http1_1),
        _ => Err(Error::http(
            StatusCode::HttpVersionNotSupported,
            format!("unsupported protocol version {}", version),
        )),
    }
}

/// RFC7230 `tchar`.
fn is_token(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &[u8]) -> Result<(usize, Option<RequestHead>)> {
        RequestParser::new(crate::MAX_HEAD_LENGTH).feed(input)
    }

    #[test]
    fn request_split_anywhere() {
        let input = b"\r\nGET /a?b=c HTTP/1.1\r\nHost: example.com\r\nX-Empty:\r\n\r\nbody";
        for split in 0..input.len() {
            let mut parser = RequestParser::new(crate::MAX_HEAD_LENGTH);
            let (first, head) = parser.feed(&input[..split]).unwrap();
            let (used, head) = match head {
                Some(head) => (first, head),
                None => {
                    assert_eq!(first, split);
                    let (second, head) = parser.feed(&input[split..]).unwrap();
                    (first + second, head.unwrap())
                }
            };
            assert_eq!(&input[used..], b"body");
            assert_eq!(head.method, "GET");
            assert_eq!(head.target, "/a?b=c");
            assert_eq!(head.head.version, Version::Http1_1);
            assert_eq!(headers::first(&head.head.headers, "host"), Some("example.com"));
            assert_eq!(headers::first(&head.head.headers, "x-empty"), Some(""));
        }
    }

    #[test]
    fn header_value_keeps_later_colons() {
        let (_, head) = parse(b"GET / HTTP/1.0\r\nReferer: http://a:80/\r\n\r\n").unwrap();
        let head = head.unwrap();
        assert_eq!(head.head.version, Version::Http1_0);
        assert_eq!(
            headers::first(&head.head.headers, "referer"),
            Some("http://a:80/")
        );
    }

    #[test]
    fn rejects_bad_request_lines() {
        for input in [
            &b"GET /\r\n\r\n"[..],
            b"GET / HTTP/1.1 extra\r\n\r\n",
            b"G(T / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/11\r\n\r\n",
            b"GET / http/1.1\r\n\r\n",
            b"GET / HTTP/1.1\rX",
        ] {
            let err = parse(input).unwrap_err();
            assert_eq!(err.status(), StatusCode::BadRequest, "{:?}", input);
        }
    }

    #[test]
    fn major_version_two_is_unsupported() {
        let err = parse(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), StatusCode::HttpVersionNotSupported);
    }

    #[test]
    fn head_length_is_capped() {
        let mut parser = RequestParser::new(64);
        let mut input = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        input.extend(vec![b'a'; 64]);
        assert_eq!(
            parser.feed(&input).unwrap_err().status(),
            StatusCode::BadRequest
        );
    }

    #[test]
    fn header_count_is_capped() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            input.extend(format!("X-{}: v\r\n", i).as_bytes());
        }
        input.extend(b"\r\n");
        assert!(parse(&input).is_err());
    }

    #[test]
    fn non_ascii_header_values_are_refused() {
        let err = parse(b"GET / HTTP/1.1\r\nX-Name: caf\xe9\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), StatusCode::BadRequest);
    }

    #[test]
    fn blank_lines_before_a_request_stay_idle() {
        let mut parser = RequestParser::new(crate::MAX_HEAD_LENGTH);
        assert!(parser.is_idle());
        assert_eq!(parser.feed(b"\r\n\r\n\n").unwrap().0, 5);
        assert!(parser.is_idle());
        parser.feed(b"GE").unwrap();
        assert!(!parser.is_idle());
    }
}
