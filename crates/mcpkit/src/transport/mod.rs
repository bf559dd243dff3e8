//! MCP transports.
//!
//! - `http` - stateless Streamable HTTP (`POST` JSON-RPC, JSON reply)
//! - `stdio` - newline-delimited JSON-RPC over stdin/stdout

pub mod http;
pub mod stdio;

pub use http::{router, ALLOWED_METHODS};
pub use stdio::{serve_stdio, serve_io, StdioError};
