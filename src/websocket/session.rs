use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use async_std::future::timeout;
use async_std::task::{self, JoinHandle};
use futures_lite::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, info, trace, warn};
use rand::RngCore;

use crate::websocket::compression::Deflate;
use crate::websocket::frame::{self, Frame, Opcode, ReadRules};
use crate::websocket::handshake::Negotiated;
use crate::websocket::payload::{close_payload, parse_close};
use crate::websocket::{CloseCode, CloseStatus, Message, Options, Role, State};
use crate::{Error, Result, SharedReader};

/// Outbound messages are split into frames of at most this many bytes.
pub(crate) const FRAGMENT_LENGTH: usize = 1016;

/// State the handle reads without going through the session task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: State,
    pub(crate) status: Option<CloseStatus>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Open,
            status: None,
        }
    }

    fn advance(&mut self, state: State) {
        if state > self.state {
            self.state = state;
        }
    }
}

/// Everything the session task reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum Event {
    Send {
        opcode: Opcode,
        payload: Vec<u8>,
        reply: Sender<Result<()>>,
    },
    Ping {
        payload: Vec<u8>,
        reply: Sender<()>,
    },
    Close {
        code: CloseCode,
        reason: String,
    },
    Frame(Frame),
    ReadFailed(Error),
}

/// Channels connecting the handle and the session task.
#[derive(Debug)]
pub(crate) struct Wiring {
    pub(crate) shared: async_dup::Arc<async_dup::Mutex<Shared>>,
    pub(crate) events: Sender<Event>,
    pub(crate) inbox: Receiver<Event>,
    pub(crate) deliver: Sender<Message>,
    pub(crate) done: Sender<()>,
}

/// A message whose first frame arrived without FIN.
#[derive(Debug)]
struct Assembly {
    opcode: Opcode,
    compressed: bool,
    data: Vec<u8>,
}

/// The task that owns the write half of an upgraded connection.
#[derive(Debug)]
pub(crate) struct Session<IO> {
    io: IO,
    role: Role,
    shared: async_dup::Arc<async_dup::Mutex<Shared>>,
    inbox: Receiver<Event>,
    deliver: Sender<Message>,
    _done: Sender<()>,
    deflate: Option<Deflate>,
    emit_on_ping: bool,
    close_timeout: Duration,
    max_message_size: usize,
    assembly: Option<Assembly>,
    pongs: Vec<Sender<()>>,
    close_sent: Option<(CloseCode, String)>,
    close_deadline: Option<Instant>,
    reader: Option<JoinHandle<()>>,
}

impl<IO> Session<IO>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    /// Start the read loop and the session task.
    pub(crate) fn spawn(
        io: IO,
        reader: SharedReader<IO>,
        role: Role,
        negotiated: &Negotiated,
        options: &Options,
        wiring: Wiring,
    ) {
        let rules = ReadRules {
            role,
            compression: negotiated.compression.is_some(),
            max_payload: options.max_message_size as u64,
        };
        let read_task = task::spawn(read_loop(reader, rules, wiring.events));

        let session = Session {
            io,
            role,
            shared: wiring.shared,
            inbox: wiring.inbox,
            deliver: wiring.deliver,
            _done: wiring.done,
            deflate: negotiated
                .compression
                .as_ref()
                .map(|_| Deflate::new(options.compression_level)),
            emit_on_ping: options.emit_on_ping,
            close_timeout: options.close_timeout,
            max_message_size: options.max_message_size,
            assembly: None,
            pongs: Vec::new(),
            close_sent: None,
            close_deadline: None,
            reader: Some(read_task),
        };
        task::spawn(session.run());
    }

    async fn run(mut self) {
        let status = loop {
            let event = match self.close_deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    match timeout(left, self.inbox.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            warn!("no close frame from peer within {:?}", self.close_timeout);
                            let (code, reason) = self
                                .close_sent
                                .clone()
                                .unwrap_or((CloseCode::Abnormal, String::new()));
                            break CloseStatus {
                                code,
                                reason,
                                was_clean: false,
                            };
                        }
                    }
                }
                None => self.inbox.recv().await,
            };
            let event = match event {
                Ok(event) => event,
                Err(_) => break abnormal("event channel closed"),
            };
            match self.handle(event).await {
                Ok(None) => {}
                Ok(Some(status)) => break status,
                Err(err) => break self.fail(err).await,
            }
        };
        self.finish(status).await;
    }

    async fn handle(&mut self, event: Event) -> Result<Option<CloseStatus>> {
        match event {
            Event::Send {
                opcode,
                payload,
                reply,
            } => {
                if self.close_sent.is_some() {
                    reply
                        .try_send(Err(Error::invalid_state("session is closing")))
                        .ok();
                    return Ok(None);
                }
                match self.write_message(opcode, payload).await {
                    Ok(()) => {
                        reply.try_send(Ok(())).ok();
                    }
                    Err(Error::Io(err)) => {
                        let status = abnormal(&err.to_string());
                        reply.try_send(Err(Error::Io(err))).ok();
                        return Ok(Some(status));
                    }
                    Err(err) => {
                        reply.try_send(Err(err)).ok();
                    }
                }
            }
            Event::Ping { payload, reply } => {
                if self.close_sent.is_none() {
                    self.write_frame(Frame::new(Opcode::Ping, payload)).await?;
                    self.pongs.push(reply);
                }
            }
            Event::Close { code, reason } => {
                if self.close_sent.is_some() {
                    info!("close frame already sent, ignoring close request");
                    return Ok(None);
                }
                self.send_close(code, reason).await?;
            }
            Event::Frame(frame) => return self.on_frame(frame).await,
            Event::ReadFailed(Error::Io(err)) => {
                debug!("websocket read failed: {}", err);
                return Ok(Some(abnormal(&err.to_string())));
            }
            Event::ReadFailed(err) => return Err(err),
        }
        Ok(None)
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Option<CloseStatus>> {
        trace!(
            "received {} frame, fin={}, {} bytes",
            frame.opcode,
            frame.fin,
            frame.payload.len()
        );
        match frame.opcode {
            Opcode::Ping => {
                if self.close_sent.is_none() {
                    self.write_frame(Frame::new(Opcode::Pong, frame.payload.clone()))
                        .await?;
                }
                if self.emit_on_ping {
                    self.push(Message::Ping(frame.payload));
                }
            }
            Opcode::Pong => {
                for waiter in self.pongs.drain(..) {
                    waiter.try_send(()).ok();
                }
            }
            Opcode::Close => {
                let (code, reason) = parse_close(&frame.payload)?;
                self.shared.lock().advance(State::Closing);
                let mut was_clean = true;
                if self.close_sent.is_none() {
                    let echo = Frame::new(Opcode::Close, close_payload(code, ""));
                    if let Err(err) = self.write_frame(echo).await {
                        debug!("failed to answer close frame: {}", err);
                        was_clean = false;
                    }
                }
                return Ok(Some(CloseStatus {
                    code,
                    reason,
                    was_clean,
                }));
            }
            Opcode::Text | Opcode::Binary => {
                if self.assembly.is_some() {
                    return Err(Error::protocol("data frame inside a fragmented message"));
                }
                if frame.fin {
                    self.complete(frame.opcode, frame.rsv1, frame.payload)?;
                } else {
                    self.assembly = Some(Assembly {
                        opcode: frame.opcode,
                        compressed: frame.rsv1,
                        data: frame.payload,
                    });
                }
            }
            Opcode::Continuation => {
                let mut assembly = self
                    .assembly
                    .take()
                    .ok_or_else(|| Error::protocol("continuation frame without a message"))?;
                if assembly.data.len() + frame.payload.len() > self.max_message_size {
                    return Err(Error::websocket(
                        CloseCode::TooBig,
                        "message exceeds the limit",
                    ));
                }
                assembly.data.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.complete(assembly.opcode, assembly.compressed, assembly.data)?;
                } else {
                    self.assembly = Some(assembly);
                }
            }
        }
        Ok(None)
    }

    /// Decompress and validate a reassembled message, then queue it.
    fn complete(&mut self, opcode: Opcode, compressed: bool, data: Vec<u8>) -> Result<()> {
        let data = match (compressed, self.deflate.as_mut()) {
            (false, _) => data,
            (true, Some(deflate)) => deflate.decompress(&data, self.max_message_size)?,
            (true, None) => return Err(Error::protocol("compressed message without negotiation")),
        };
        let message = match opcode {
            Opcode::Text => Message::Text(String::from_utf8(data).map_err(|_| {
                Error::websocket(CloseCode::InvalidData, "text message is not valid UTF-8")
            })?),
            _ => Message::Binary(data),
        };
        self.push(message);
        Ok(())
    }

    fn push(&self, message: Message) {
        if self.deliver.try_send(message).is_err() {
            trace!("message dropped, nobody is receiving");
        }
    }

    async fn write_message(&mut self, opcode: Opcode, payload: Vec<u8>) -> Result<()> {
        let (payload, compressed) = match self.deflate.as_mut() {
            Some(deflate) => (deflate.compress(&payload)?, true),
            None => (payload, false),
        };
        let count = payload.len().div_ceil(FRAGMENT_LENGTH).max(1);
        let mut segments = payload.chunks(FRAGMENT_LENGTH);
        for i in 0..count {
            let segment = segments.next().unwrap_or(&[]);
            let opcode = if i == 0 { opcode } else { Opcode::Continuation };
            let mut frame = Frame::new(opcode, segment);
            frame.fin = i + 1 == count;
            frame.rsv1 = compressed && i == 0;
            self.write_frame(frame).await?;
        }
        Ok(())
    }

    async fn send_close(&mut self, code: CloseCode, reason: String) -> Result<()> {
        let frame = Frame::new(Opcode::Close, close_payload(code, &reason));
        self.close_sent = Some((code, reason));
        self.shared.lock().advance(State::Closing);
        self.close_deadline = Some(Instant::now() + self.close_timeout);
        self.write_frame(frame).await
    }

    async fn write_frame(&mut self, mut frame: Frame) -> Result<()> {
        if self.role == Role::Client {
            let mut key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut key);
            frame.mask = Some(key);
        }
        trace!(
            "sending {} frame, fin={}, {} bytes",
            frame.opcode,
            frame.fin,
            frame.payload.len()
        );
        self.io.write_all(&frame.to_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Tell the peer why the session is ending, if it is still listening.
    async fn fail(&mut self, err: Error) -> CloseStatus {
        let (code, message) = match err {
            Error::Io(err) => return abnormal(&err.to_string()),
            Error::WebSocket { code, message } => (code, message),
            other => (CloseCode::ProtocolError, other.to_string()),
        };
        warn!("websocket protocol violation: {}", message);
        if self.close_sent.is_none() {
            let wire_code = if code.is_allowed_on_wire() {
                code
            } else {
                CloseCode::ProtocolError
            };
            if let Err(err) = self.send_close(wire_code, message.clone()).await {
                debug!("failed to send close frame: {}", err);
            }
        }
        CloseStatus {
            code,
            reason: message,
            was_clean: false,
        }
    }

    async fn finish(mut self, status: CloseStatus) {
        {
            let mut shared = self.shared.lock();
            shared.advance(State::Closed);
            shared.status = Some(status.clone());
        }
        if let Some(reader) = self.reader.take() {
            reader.cancel().await;
        }
        // Best effort: the peer may already be gone.
        self.io.close().await.ok();
        debug!(
            "websocket closed with {} (clean: {})",
            u16::from(status.code),
            status.was_clean
        );
    }
}

fn abnormal(reason: &str) -> CloseStatus {
    CloseStatus {
        code: CloseCode::Abnormal,
        reason: reason.to_string(),
        was_clean: false,
    }
}

/// Read frames until the peer closes or breaks the protocol.
async fn read_loop<IO>(mut reader: SharedReader<IO>, rules: ReadRules, events: Sender<Event>)
where
    IO: AsyncRead + Unpin,
{
    loop {
        match frame::read_from(&mut reader, rules).await {
            Ok(frame) => {
                let last = frame.opcode == Opcode::Close;
                if events.send(Event::Frame(frame)).await.is_err() || last {
                    return;
                }
            }
            Err(err) => {
                events.send(Event::ReadFailed(err)).await.ok();
                return;
            }
        }
    }
}
