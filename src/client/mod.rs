//! Process HTTP responses on the client.

mod decode;

pub use decode::decode;
