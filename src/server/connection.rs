use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use async_std::future::timeout;
use futures_lite::future::poll_fn;
use futures_lite::io::{self, AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use futures_lite::ready;
use http_types::{StatusCode, Version};
use log::{debug, trace};

use crate::server::decode::{decode, Peer};
use crate::server::encode::{EncodeOptions, Encoder};
use crate::server::parse::{RequestHead, RequestParser};
use crate::server::{Completion, Dispatch, ServerOptions, Upgrade};
use crate::{Error, Response, Result, SharedReader};

/// Statuses after which the connection is never reused.
const FORCE_CLOSE: [StatusCode; 7] = [
    StatusCode::BadRequest,
    StatusCode::RequestTimeout,
    StatusCode::LengthRequired,
    StatusCode::PayloadTooLarge,
    StatusCode::UriTooLong,
    StatusCode::InternalServerError,
    StatusCode::ServiceUnavailable,
];

/// How a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionStatus {
    /// The socket was closed.
    Closed,
    /// The socket now belongs to a WebSocket session.
    Upgraded,
}

/// One accepted socket and the read loop that serves it.
#[derive(Debug)]
pub(crate) struct Connection<IO> {
    io: IO,
    reader: SharedReader<IO>,
    parser: RequestParser,
    opts: Arc<ServerOptions>,
    peer: Peer,
    requests: usize,
}

impl<IO> Connection<IO>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    pub(crate) fn new(io: IO, opts: Arc<ServerOptions>, peer: Peer) -> Self {
        let reader = async_dup::Arc::new(async_dup::Mutex::new(BufReader::new(io.clone())));
        Self {
            io,
            reader,
            parser: RequestParser::new(opts.max_head_length),
            opts,
            peer,
            requests: 0,
        }
    }

    /// Serve requests until the peer goes away, an error forces a close, or
    /// the socket is upgraded.
    pub(crate) async fn run<D: Dispatch<IO> + ?Sized>(mut self, dispatch: &D) -> Result<ConnectionStatus> {
        let status = self.serve(dispatch).await;
        if let Ok(ConnectionStatus::Upgraded) = status {
            return status;
        }
        // Best effort: the peer may already be gone.
        self.io.close().await.ok();
        status
    }

    async fn serve<D: Dispatch<IO> + ?Sized>(&mut self, dispatch: &D) -> Result<ConnectionStatus> {
        loop {
            let idle = if self.requests == 0 {
                self.opts.first_request_timeout
            } else {
                self.opts.keep_alive_timeout
            };

            let head = match timeout(idle, self.read_head()).await {
                Err(_) => {
                    debug!("connection idle for {:?}, closing", idle);
                    return Ok(ConnectionStatus::Closed);
                }
                Ok(Ok(None)) => return Ok(ConnectionStatus::Closed),
                Ok(Ok(Some(head))) => head,
                Ok(Err(Error::Io(err))) => return Err(Error::Io(err)),
                Ok(Err(err)) => {
                    self.reject(err).await;
                    return Ok(ConnectionStatus::Closed);
                }
            };

            let decoded = match decode(head, &self.io, &self.reader, self.peer) {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.reject(err).await;
                    return Ok(ConnectionStatus::Closed);
                }
            };
            self.requests += 1;

            let version = decoded.request.version();
            let head_request = decoded.request.method() == "HEAD";
            let request_keep_alive = decoded.request.keep_alive();
            let body = decoded.body;

            let upgrade = Upgrade {
                io: self.io.clone(),
                reader: self.reader.clone(),
                server_header: self.opts.server_header.clone(),
            };
            let mut response = match dispatch.dispatch(decoded.request, upgrade).await {
                Completion::Respond(response) => response,
                Completion::Upgraded => {
                    debug!("connection upgraded");
                    return Ok(ConnectionStatus::Upgraded);
                }
                Completion::Abandoned => {
                    debug!("request abandoned, closing");
                    return Ok(ConnectionStatus::Closed);
                }
            };
            response.set_version(version);

            let limit_reached = self
                .opts
                .max_requests_per_connection
                .map_or(false, |max| self.requests >= max);
            let keep_alive = request_keep_alive
                && response.keep_alive()
                && !FORCE_CLOSE.contains(&response.status())
                && !limit_reached;

            trace!("responding {}", response.status());
            let mut encoder = Encoder::new(
                response,
                EncodeOptions {
                    head_request,
                    keep_alive,
                    server_header: self.opts.server_header.clone(),
                },
            );
            let keep_alive = encoder.keep_alive();
            if let Err(err) = io::copy(&mut encoder, &mut self.io).await {
                debug!("failed to write response: {}", err);
                return Ok(ConnectionStatus::Closed);
            }
            self.io.flush().await.ok();

            if !keep_alive {
                return Ok(ConnectionStatus::Closed);
            }

            if let Some(body) = body {
                if body.is_gated() {
                    debug!("request body was never solicited, closing");
                    return Ok(ConnectionStatus::Closed);
                }
                match timeout(self.opts.keep_alive_timeout, body.drain()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(drained)) => trace!("drained {} unread body bytes", drained),
                    Ok(Err(err)) => {
                        debug!("failed to drain request body: {}", err);
                        return Ok(ConnectionStatus::Closed);
                    }
                    Err(_) => {
                        debug!("timed out draining request body");
                        return Ok(ConnectionStatus::Closed);
                    }
                }
            }
            self.parser.reset();
        }
    }

    async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        let reader = self.reader.clone();
        let parser = &mut self.parser;
        poll_fn(|cx| -> Poll<Result<Option<RequestHead>>> {
            let mut guard = reader.lock();
            loop {
                let input = ready!(Pin::new(&mut *guard).poll_fill_buf(cx))?;
                if input.is_empty() {
                    return if parser.is_idle() {
                        Poll::Ready(Ok(None))
                    } else {
                        Poll::Ready(Err(Error::Io(io::Error::from(
                            io::ErrorKind::UnexpectedEof,
                        ))))
                    };
                }
                let (used, head) = parser.feed(input)?;
                Pin::new(&mut *guard).consume(used);
                if let Some(head) = head {
                    return Poll::Ready(Ok(Some(head)));
                }
            }
        })
        .await
    }

    /// Answer a malformed request and give up on the connection.
    async fn reject(&mut self, err: Error) {
        debug!("rejecting request: {}", err);
        let mut response = Response::error(err.status(), &err.to_string());
        response.set_version(Version::Http1_1);
        let mut encoder = Encoder::new(
            response,
            EncodeOptions {
                head_request: false,
                keep_alive: false,
                server_header: self.opts.server_header.clone(),
            },
        );
        if let Err(err) = io::copy(&mut encoder, &mut self.io).await {
            trace!("failed to write error response: {}", err);
        }
    }
}
