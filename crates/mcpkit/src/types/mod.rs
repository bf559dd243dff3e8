//! MCP wire types.
//!
//! - `jsonrpc` - JSON-RPC 2.0 envelopes
//! - `error` - error object and standard codes
//! - `protocol` - initialize handshake and capabilities
//! - `tool` - tool definitions and call results
//! - `content` - content parts of a tool result

pub mod content;
pub mod error;
pub mod jsonrpc;
pub mod protocol;
pub mod tool;
