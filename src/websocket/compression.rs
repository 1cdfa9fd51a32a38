//! permessage-deflate (RFC7692).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::websocket::CloseCode;
use crate::{Error, Result};

/// Extension token.
pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

const TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Agreed extension parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct DeflateConfig {
    pub(crate) server_no_context_takeover: bool,
    pub(crate) client_no_context_takeover: bool,
}

impl DeflateConfig {
    /// The `Sec-WebSocket-Extensions` value describing this config.
    pub(crate) fn header_value(&self) -> String {
        let mut value = PERMESSAGE_DEFLATE.to_string();
        if self.server_no_context_takeover {
            value.push_str("; server_no_context_takeover");
        }
        if self.client_no_context_takeover {
            value.push_str("; client_no_context_takeover");
        }
        value
    }
}

/// Pick the first permessage-deflate offer a server can honour.
///
/// The compressor always uses a full window and resets between messages, so
/// offers restricting the server window are declined.
pub(crate) fn accept_offer(header: &str) -> Option<DeflateConfig> {
    for offer in header.split(',') {
        let mut params = offer.split(';').map(str::trim);
        if !params
            .next()
            .map_or(false, |name| name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
        {
            continue;
        }
        let mut config = DeflateConfig {
            server_no_context_takeover: true,
            client_no_context_takeover: false,
        };
        let mut acceptable = true;
        for param in params {
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (param, None),
            };
            match (name, value) {
                ("server_no_context_takeover", None) => {}
                ("client_no_context_takeover", None) => config.client_no_context_takeover = true,
                ("client_max_window_bits", _) => {}
                ("server_max_window_bits", Some("15")) => {}
                _ => acceptable = false,
            }
        }
        if acceptable {
            return Some(config);
        }
    }
    None
}

/// Check a server's answer to our offer. `None` means it declined.
pub(crate) fn validate_response(header: &str) -> Result<Option<DeflateConfig>> {
    let header = header.trim();
    if header.is_empty() {
        return Ok(None);
    }
    let mut params = header.split(';').map(str::trim);
    if !params
        .next()
        .map_or(false, |name| name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
    {
        return Err(Error::Handshake(format!("unrequested extension {}", header)));
    }
    let mut config = DeflateConfig::default();
    for param in params {
        let (name, value) = match param.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (param, None),
        };
        match (name, value) {
            ("server_no_context_takeover", None) => config.server_no_context_takeover = true,
            ("client_no_context_takeover", None) => config.client_no_context_takeover = true,
            ("server_max_window_bits", Some(bits)) if bits.parse::<u8>().is_ok() => {}
            ("client_max_window_bits", Some("15")) => {}
            _ => {
                return Err(Error::Handshake(format!(
                    "unsupported extension parameter {}",
                    param
                )))
            }
        }
    }
    Ok(Some(config))
}

/// Compressor and decompressor for one session.
pub(crate) struct Deflate {
    compress: Compress,
    decompress: Decompress,
}

impl std::fmt::Debug for Deflate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflate").finish()
    }
}

impl Deflate {
    pub(crate) fn new(level: u32) -> Self {
        Self {
            compress: Compress::new(Compression::new(level.min(9)), false),
            decompress: Decompress::new(false),
        }
    }

    /// Compress one whole message.
    pub(crate) fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.compress.reset();
        let start = self.compress.total_in();
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        loop {
            let consumed = (self.compress.total_in() - start) as usize;
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            self.compress
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|err| Error::websocket(CloseCode::ServerError, err.to_string()))?;
            let consumed = (self.compress.total_in() - start) as usize;
            if consumed == data.len() && out.len() < out.capacity() {
                break;
            }
        }
        if out.ends_with(&TAIL) {
            out.truncate(out.len() - TAIL.len());
        }
        Ok(out)
    }

    /// Decompress one whole message, failing once it grows past `limit`.
    pub(crate) fn decompress(&mut self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + TAIL.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&TAIL);

        let start = self.decompress.total_in();
        let mut out = Vec::with_capacity(data.len() * 2 + 64);
        loop {
            let consumed = (self.decompress.total_in() - start) as usize;
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|err| Error::websocket(CloseCode::InvalidData, err.to_string()))?;
            if out.len() > limit {
                return Err(Error::websocket(
                    CloseCode::TooBig,
                    "decompressed message exceeds the limit",
                ));
            }
            let consumed = (self.decompress.total_in() - start) as usize;
            let drained = consumed == input.len() && out.len() < out.capacity();
            if drained || status == Status::StreamEnd {
                break;
            }
            if status == Status::BufError && consumed == input.len() {
                break;
            }
        }
        Ok(out)
    }
}
