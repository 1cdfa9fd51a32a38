//! WebSocket sessions (RFC6455) over an upgraded HTTP/1.1 connection.
//!
//! A [`WebSocket`] is a handle on a session task that owns the write half of
//! the socket. Inbound frames are read by a second task and handed to the
//! session task, so pings and closes are answered while the application is
//! still busy with an earlier message. Decoded messages queue up until
//! [`WebSocket::recv`] takes them.
//!
//! # Example
//!
//! ```no_run
//! use async_h1ws::websocket::{self, CloseCode, Message, Options};
//!
//! # fn main() -> async_h1ws::Result<()> {
//! async_std::task::block_on(async {
//!     let ws = websocket::connect("ws://127.0.0.1:8080/echo/", Options::default()).await?;
//!     ws.send_text("hello").await?;
//!     if let Some(Message::Text(reply)) = ws.recv().await {
//!         println!("{}", reply);
//!     }
//!     ws.close(CloseCode::Normal, "done").await?;
//!     Ok(())
//! })
//! # }
//! ```

use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_std::future::timeout;
use futures_lite::io::{AsyncRead, AsyncWrite, BufReader};
use log::info;

use crate::{Error, Result, SharedReader};

mod client;
mod close;
mod compression;
mod frame;
mod handshake;
mod payload;
mod session;

pub use client::{connect, connect_stream};
pub use close::{CloseCode, MAX_REASON_LENGTH};
pub use frame::{read_from, Frame, Opcode, ReadRules, MAX_CONTROL_PAYLOAD};
pub use handshake::{accept_key, generate_key, SUPPORTED_VERSION, WS_GUID};
pub use payload::{apply_mask, close_payload, parse_close, split_extension_data};

pub(crate) use handshake::{negotiate, Negotiated};

use session::{Event, Session, Shared, Wiring};

/// Which end of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks outgoing frames, expects unmasked ones.
    Client,
    /// Expects masked frames, sends unmasked ones.
    Server,
}

/// Session lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// The handshake is in progress.
    Connecting,
    /// Messages flow both ways.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// The socket is shut.
    Closed,
}

/// A complete message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
    /// A ping, only delivered when [`Options::emit_on_ping`] is set. The pong
    /// has already been sent.
    Ping(Vec<u8>),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Code from the peer's close frame, or the code that ended the session.
    pub code: CloseCode,
    /// Reason accompanying `code`.
    pub reason: String,
    /// Whether close frames went both ways before the socket was shut.
    pub was_clean: bool,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Offer or accept permessage-deflate. Defaults to `false`.
    pub compression: bool,
    /// Deflate level, 0 to 9. Defaults to 6.
    pub compression_level: u32,
    /// Never negotiate extensions, whatever `compression` says.
    pub ignore_extensions: bool,
    /// Subprotocols offered (client) or supported (server), in preference order.
    pub protocols: Vec<String>,
    /// Cookies sent with the handshake (`Cookie` or `Set-Cookie`).
    pub cookies: Vec<(String, String)>,
    /// `Origin` sent by clients.
    pub origin: Option<String>,
    /// Deliver pings as [`Message::Ping`].
    pub emit_on_ping: bool,
    /// How long a close waits for the peer's close frame. Defaults to 5s.
    pub close_timeout: Duration,
    /// How long a ping waits for its pong. Defaults to 5s.
    pub ping_timeout: Duration,
    /// Largest message accepted, after decompression. Defaults to 16MiB.
    pub max_message_size: usize,
    /// Follow redirects during a client handshake.
    pub enable_redirection: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compression: false,
            compression_level: 6,
            ignore_extensions: false,
            protocols: Vec::new(),
            cookies: Vec::new(),
            origin: None,
            emit_on_ping: false,
            close_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(5),
            max_message_size: 16 * 1024 * 1024,
            enable_redirection: false,
        }
    }
}

/// Handle on a running WebSocket session.
///
/// Dropping an open handle starts a close with [`CloseCode::Away`].
#[derive(Debug)]
pub struct WebSocket {
    role: Role,
    negotiated: Negotiated,
    options: Options,
    shared: async_dup::Arc<async_dup::Mutex<Shared>>,
    events: Sender<Event>,
    messages: Receiver<Message>,
    done: Receiver<()>,
}

impl WebSocket {
    /// Run a session over a stream whose handshake already happened
    /// elsewhere. No extensions are in effect.
    pub fn from_stream<IO>(io: IO, role: Role, options: Options) -> Self
    where
        IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
    {
        let reader = async_dup::Arc::new(async_dup::Mutex::new(BufReader::new(io.clone())));
        Self::start(io, reader, role, Negotiated::default(), options)
    }

    /// Run a session on a connection that finished its handshake. Bytes the
    /// peer sent after the handshake are still buffered in `reader`.
    pub(crate) fn start<IO>(
        io: IO,
        reader: SharedReader<IO>,
        role: Role,
        negotiated: Negotiated,
        options: Options,
    ) -> Self
    where
        IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
    {
        let (events, inbox) = async_channel::unbounded();
        let (deliver, messages) = async_channel::unbounded();
        let (done_tx, done) = async_channel::bounded(1);
        let shared = async_dup::Arc::new(async_dup::Mutex::new(Shared::new()));

        let wiring = Wiring {
            shared: shared.clone(),
            events: events.clone(),
            inbox,
            deliver,
            done: done_tx,
        };
        Session::spawn(io, reader, role, &negotiated, &options, wiring);
        log::debug!("websocket session started as {:?}", role);

        Self {
            role,
            negotiated,
            options,
            shared,
            events,
            messages,
            done,
        }
    }

    /// Which end this session plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.lock().state
    }

    /// The subprotocol agreed during the handshake.
    pub fn protocol(&self) -> Option<&str> {
        self.negotiated.protocol.as_deref()
    }

    /// The `Sec-WebSocket-Extensions` value agreed during the handshake.
    pub fn extensions(&self) -> Option<&str> {
        self.negotiated.extensions.as_deref()
    }

    /// Whether permessage-deflate is in effect.
    pub fn is_compressed(&self) -> bool {
        self.negotiated.compression.is_some()
    }

    /// How the session ended, once it has.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.shared.lock().status.clone()
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Opcode::Text, text.into().into_bytes()).await
    }

    /// Send a binary message.
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Opcode::Binary, data.into()).await
    }

    async fn send(&self, opcode: Opcode, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let (reply, result) = async_channel::bounded(1);
        self.events
            .send(Event::Send {
                opcode,
                payload,
                reply,
            })
            .await
            .map_err(|_| Error::invalid_state("session has ended"))?;
        result
            .recv()
            .await
            .unwrap_or_else(|_| Err(Error::invalid_state("session has ended")))
    }

    /// Send a ping and wait for a pong. Returns `false` if none arrived in
    /// time.
    pub async fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<bool> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::InvalidArgument(format!(
                "ping payload is {} bytes, at most {} are allowed",
                payload.len(),
                MAX_CONTROL_PAYLOAD
            )));
        }
        self.ensure_open()?;
        let (reply, pong) = async_channel::bounded(1);
        self.events
            .send(Event::Ping { payload, reply })
            .await
            .map_err(|_| Error::invalid_state("session has ended"))?;
        match timeout(self.options.ping_timeout, pong.recv()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                log::warn!("no pong within {:?}", self.options.ping_timeout);
                Ok(false)
            }
        }
    }

    /// Start the close handshake without waiting for it to finish.
    ///
    /// Does nothing if the session is already closing.
    pub fn begin_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        code.check_send(reason, self.role)?;
        {
            let mut shared = self.shared.lock();
            match shared.state {
                State::Closing | State::Closed => {
                    info!("close requested while already {:?}", shared.state);
                    return Ok(());
                }
                _ => shared.state = State::Closing,
            }
        }
        self.events
            .try_send(Event::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| Error::invalid_state("session has ended"))
    }

    /// Close the session and wait until the socket is shut.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<CloseStatus> {
        self.begin_close(code, reason)?;
        Ok(self.closed().await)
    }

    /// Wait until the session has ended.
    pub async fn closed(&self) -> CloseStatus {
        // Resolves once the session task drops its sender.
        self.done.recv().await.ok();
        self.close_status().unwrap_or(CloseStatus {
            code: CloseCode::Abnormal,
            reason: String::new(),
            was_clean: false,
        })
    }

    /// The next message, or `None` once the session has ended and every
    /// queued message was taken.
    pub async fn recv(&self) -> Option<Message> {
        self.messages.recv().await.ok()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.shared.lock().state {
            State::Open => Ok(()),
            state => Err(Error::invalid_state(format!("session is {:?}", state))),
        }
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        if self.state() == State::Open {
            self.begin_close(CloseCode::Away, "").ok();
        }
    }
}
