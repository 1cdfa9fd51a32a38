//! Single frame encoding and decoding.
//!
//! ```txt
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::fmt;

use futures_lite::io::{AsyncRead, AsyncReadExt};

use crate::websocket::payload::apply_mask;
use crate::websocket::{CloseCode, Role};
use crate::{Error, Result};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcodes (RFC6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continues a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Starts the close handshake.
    Close,
    /// Asks the peer for a pong.
    Ping,
    /// Answers a ping.
    Pong,
}

impl Opcode {
    /// Parse the low nibble of the first header byte. Reserved opcodes fail.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(Error::protocol(format!("reserved opcode {:#x}", other))),
        }
    }

    /// The wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Close, ping and pong.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One WebSocket frame. The payload is always held unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Last frame of a message.
    pub fin: bool,
    /// Per-message compressed.
    pub rsv1: bool,
    /// Extension bit, unused.
    pub rsv2: bool,
    /// Extension bit, unused.
    pub rsv3: bool,
    /// What the payload means.
    pub opcode: Opcode,
    /// Key the payload is masked with on the wire.
    pub mask: Option<[u8; 4]>,
    /// Application data.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Serialize, masking the payload if a key is set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        if self.rsv2 {
            first |= 0x20;
        }
        if self.rsv3 {
            first |= 0x10;
        }
        out.push(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }
}

/// What an incoming frame must look like before its payload is read.
#[derive(Debug, Clone, Copy)]
pub struct ReadRules {
    /// Who is reading. Servers require masked frames, clients forbid them.
    pub role: Role,
    /// Whether permessage-deflate was negotiated.
    pub compression: bool,
    /// Largest payload accepted in one frame.
    pub max_payload: u64,
}

/// Read one frame, validating its header before touching the payload.
pub async fn read_from<R>(reader: &mut R, rules: ReadRules) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    let fin = head[0] & 0x80 != 0;
    let rsv1 = head[0] & 0x40 != 0;
    let rsv2 = head[0] & 0x20 != 0;
    let rsv3 = head[0] & 0x10 != 0;
    let opcode = Opcode::from_u8(head[0] & 0x0F)?;
    let masked = head[1] & 0x80 != 0;

    match rules.role {
        Role::Server if !masked => return Err(Error::protocol("client frame is not masked")),
        Role::Client if masked => return Err(Error::protocol("server frame is masked")),
        _ => {}
    }
    if rsv2 || rsv3 {
        return Err(Error::protocol("reserved bits set without an extension"));
    }
    if rsv1 {
        if !rules.compression {
            return Err(Error::protocol("compressed frame without negotiation"));
        }
        if opcode.is_control() || opcode == Opcode::Continuation {
            return Err(Error::protocol("compression bit on a non-initial frame"));
        }
    }

    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            let len = u16::from_be_bytes(ext) as u64;
            if len < 126 {
                return Err(Error::protocol("16-bit length used for a short payload"));
            }
            len
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            let len = u64::from_be_bytes(ext);
            if len & (1 << 63) != 0 {
                return Err(Error::protocol("payload length has its high bit set"));
            }
            if len <= u16::MAX as u64 {
                return Err(Error::protocol("64-bit length used for a 16-bit payload"));
            }
            len
        }
        len => len as u64,
    };

    if opcode.is_control() {
        if !fin {
            return Err(Error::protocol("fragmented control frame"));
        }
        if len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(Error::protocol("control frame payload too long"));
        }
    }
    if len > rules.max_payload {
        return Err(Error::websocket(
            CloseCode::TooBig,
            format!("frame of {} bytes exceeds the limit", len),
        ));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload,
    })
}
