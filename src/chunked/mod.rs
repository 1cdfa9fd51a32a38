//! Chunked transfer encoding.
//!
//! [`ChunkDecoder`] is a sans-io state machine: feed it framed bytes, read
//! body bytes back out. The server wraps it in an `AsyncRead` adapter over
//! the connection's buffered reader.

mod decoder;
mod encoder;

pub use decoder::{ChunkDecoder, State};

pub(crate) use decoder::ChunkedReader;
pub(crate) use encoder::ChunkedEncoder;
