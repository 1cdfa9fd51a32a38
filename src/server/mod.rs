//! Process HTTP connections on the server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use futures_lite::future::Boxed;
use futures_lite::io::{AsyncRead, AsyncWrite};
use http_types::StatusCode;

use crate::listener::HttpContext;
use crate::{Request, Response, Result, SharedReader};

mod body_reader;
mod connection;
mod decode;
mod encode;
mod parse;

pub(crate) use connection::Connection;
pub(crate) use decode::Peer;
pub(crate) use encode::{EncodeOptions, Encoder};

/// Configure the server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// How long a fresh connection may stay silent before its first request.
    /// Defaults to 90s.
    pub first_request_timeout: Duration,
    /// How long a reused connection may stay idle between requests.
    /// Defaults to 15s.
    pub keep_alive_timeout: Duration,
    /// Largest accepted request line plus header block. Defaults to 32KiB.
    pub max_head_length: usize,
    /// Requests served on one connection before it is closed. Defaults to 200.
    pub max_requests_per_connection: Option<usize>,
    /// Value of the `Server` header added to every response.
    pub server_header: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            first_request_timeout: Duration::from_secs(90),
            keep_alive_timeout: Duration::from_secs(15),
            max_head_length: crate::MAX_HEAD_LENGTH,
            max_requests_per_connection: Some(200),
            server_header: Some(concat!("async-h1ws/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

/// What became of a dispatched request.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Write this response, then maybe read the next request.
    Respond(Response),
    /// The handshake response was written and the socket handed off.
    Upgraded,
    /// Nobody will answer; close the socket.
    Abandoned,
}

/// Everything needed to take over a connection's byte stream.
#[derive(Debug)]
pub(crate) struct Upgrade<IO> {
    pub(crate) io: IO,
    pub(crate) reader: SharedReader<IO>,
    pub(crate) server_header: Option<String>,
}

/// Hands a decoded request to whoever produces its response.
pub(crate) trait Dispatch<IO>: Send + Sync {
    fn dispatch(&self, request: Request, upgrade: Upgrade<IO>) -> Boxed<Completion>;
}

struct Endpoint<F>(F);

impl<IO, F, Fut> Dispatch<IO> for Endpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn dispatch(&self, request: Request, _upgrade: Upgrade<IO>) -> Boxed<Completion> {
        let fut = (self.0)(request);
        Box::pin(async move { Completion::Respond(fut.await) })
    }
}

struct Queue<IO> {
    queue: Sender<HttpContext<IO>>,
}

impl<IO> Dispatch<IO> for Queue<IO>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    fn dispatch(&self, request: Request, upgrade: Upgrade<IO>) -> Boxed<Completion> {
        let queue = self.queue.clone();
        Box::pin(async move {
            let (ctx, completion) = HttpContext::new(request, None, Some(upgrade));
            enqueue(&queue, ctx, completion).await
        })
    }
}

/// Queue a context and wait until it is answered.
pub(crate) async fn enqueue<IO>(
    queue: &Sender<HttpContext<IO>>,
    ctx: HttpContext<IO>,
    completion: async_channel::Receiver<Completion>,
) -> Completion {
    if let Err(async_channel::SendError(mut ctx)) = queue.send(ctx).await {
        ctx.disarm();
        log::warn!("context queue is closed, refusing request");
        return Completion::Respond(Response::error(
            StatusCode::ServiceUnavailable,
            "Service Unavailable",
        ));
    }
    completion.recv().await.unwrap_or(Completion::Abandoned)
}

/// Accept a new incoming HTTP/1.x connection.
///
/// Supports `KeepAlive` requests by default.
pub async fn accept<IO, F, Fut>(io: IO, endpoint: F) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    accept_with_opts(io, endpoint, Default::default()).await
}

/// Accept a new incoming HTTP/1.x connection with custom options.
pub async fn accept_with_opts<IO, F, Fut>(io: IO, endpoint: F, opts: ServerOptions) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    let connection = Connection::new(io, Arc::new(opts), Peer::default());
    connection.run(&Endpoint(endpoint)).await?;
    Ok(())
}

/// Serve a connection by queueing an [`HttpContext`] per request.
///
/// Each request waits until its context is finished (or dropped) before the
/// next one is read. Contexts may be upgraded to WebSocket sessions, after
/// which this returns.
pub async fn serve_contexts<IO>(
    io: IO,
    opts: ServerOptions,
    queue: Sender<HttpContext<IO>>,
) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    let connection = Connection::new(io, Arc::new(opts), Peer::default());
    connection.run(&Queue { queue }).await?;
    Ok(())
}
