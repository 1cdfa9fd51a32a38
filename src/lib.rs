//! Asynchronous HTTP/1.x listener and WebSocket protocol engine.
//!
//! The crate owns the whole life of a TCP connection: it accepts sockets,
//! parses request heads byte by byte, frames bodies with `Content-Length` or
//! chunked transfer encoding, writes responses, and when asked to, upgrades
//! the connection to a WebSocket session on the same byte stream.
//!
//! ```txt
//!   HttpServer ── endpoint per (address, port)
//!        │            │ accept loop
//!        │            ▼
//!        │       Connection ──► Prefix Router ──► HttpListener queue
//!        │            │                                  │
//!        │            │ same socket                      ▼
//!        │            └──────────────────────────► HttpContext
//!        │                                               │ accept_websocket
//!        ▼                                               ▼
//!   websocket::connect ─────────────────────────────► WebSocket
//! ```
//!
//! - `server` decodes HTTP requests and encodes HTTP responses on a single
//!   connection.
//! - `listener` binds endpoints, routes requests to listeners by prefix and
//!   queues contexts for the application.
//! - `websocket` implements the RFC6455 handshake, frame codec and session.
//!
//! # Example
//!
//! ```no_run
//! use async_h1ws::listener::HttpServer;
//! use async_h1ws::server::ServerOptions;
//!
//! # fn main() -> async_h1ws::Result<()> {
//! async_std::task::block_on(async {
//!     let server = HttpServer::new(ServerOptions::default());
//!     let listener = server.listener();
//!     listener.add_prefix("http://127.0.0.1:8080/app/").await?;
//!     listener.start().await?;
//!
//!     let mut ctx = listener.get_context().await?;
//!     ctx.response_mut().set_body("hello");
//!     ctx.finish();
//!     Ok(())
//! })
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(future_incompatible, rust_2018_idioms, nonstandard_style)]
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]

/// The maximum amount of headers parsed on the server.
const MAX_HEADERS: usize = 128;

/// The maximum length of a request or response head.
const MAX_HEAD_LENGTH: usize = 32 * 1024;

/// Buffered read half of a connection, shared by the request parser, body
/// readers and a WebSocket receive loop.
pub(crate) type SharedReader<IO> =
    async_dup::Arc<async_dup::Mutex<futures_lite::io::BufReader<IO>>>;

pub use error::{Error, Result};
pub use headers::{Headers, MessageHead};
pub use request::Request;
pub use response::Response;

mod date;
mod error;
mod headers;
mod read_notifier;
mod request;
mod response;

pub mod chunked;
pub mod client;
pub mod listener;
pub mod server;
pub mod websocket;
