use crate::websocket::close::MAX_REASON_LENGTH;
use crate::websocket::CloseCode;
use crate::{Error, Result};

/// XOR `data` with the repeating 4-byte `key`. Applying it twice restores
/// the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Build a close payload: the code in network order then the UTF-8 reason.
///
/// Codes that may not go on the wire produce an empty payload.
pub fn close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    if code.is_reserved() {
        return Vec::new();
    }
    let reason = truncate_reason(reason);
    let mut out = Vec::with_capacity(2 + reason.len());
    out.extend_from_slice(&u16::from(code).to_be_bytes());
    out.extend_from_slice(reason.as_bytes());
    out
}

/// Parse a received close payload.
///
/// An empty payload means no status was given.
pub fn parse_close(payload: &[u8]) -> Result<(CloseCode, String)> {
    match payload.len() {
        0 => return Ok((CloseCode::NoStatus, String::new())),
        1 => return Err(Error::protocol("close payload of one byte")),
        _ => {}
    }
    let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
    if !code.is_allowed_on_wire() {
        return Err(Error::protocol(format!(
            "close code {} may not be sent",
            u16::from(code)
        )));
    }
    let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| Error::websocket(CloseCode::InvalidData, "close reason is not UTF-8"))?;
    Ok((code, reason.to_string()))
}

/// Split a payload into its leading extension data and the application data.
///
/// `extension_len` is what the negotiated extensions claim; none of the
/// supported ones claim any, so this only fails on lengths past the end.
pub fn split_extension_data(payload: &[u8], extension_len: usize) -> Result<(&[u8], &[u8])> {
    if extension_len > payload.len() {
        return Err(Error::protocol(format!(
            "extension data of {} bytes in a {} byte payload",
            extension_len,
            payload.len()
        )));
    }
    Ok(payload.split_at(extension_len))
}

/// Cut a reason down to what fits in a close frame, on a char boundary.
pub(crate) fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_LENGTH {
        return reason;
    }
    let mut end = MAX_REASON_LENGTH;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
