//! mcpkit - MCP (Model Context Protocol) server plumbing.
//!
//! Implement [`Handler`] to expose tools, then serve it over HTTP with
//! [`transport::router`] or over stdio with [`transport::serve_stdio`].
//!
//! ```rust,ignore
//! use mcpkit::{Handler, Tool, CallToolResult, Implementation, McpServer};
//!
//! struct MyHandler;
//!
//! #[async_trait::async_trait]
//! impl Handler for MyHandler {
//!     fn tools(&self) -> Vec<Tool> {
//!         vec![Tool::new("hello", "Say hello")]
//!     }
//!
//!     async fn call_tool(&self, _name: &str, _args: serde_json::Value)
//!         -> Result<CallToolResult, mcpkit::ErrorData>
//!     {
//!         Ok(CallToolResult::text("Hello!"))
//!     }
//!
//!     fn server_info(&self) -> Implementation {
//!         Implementation::new("my-server", "0.1.0")
//!     }
//! }
//!
//! let server = std::sync::Arc::new(McpServer::new(MyHandler));
//! let app = axum::Router::new().nest("/mcp", mcpkit::transport::router(server));
//! ```

pub mod protocol;
pub mod schema;
pub mod transport;
pub mod types;

pub use protocol::{dispatch, Handler, McpServer};
pub use schema::schema_for;
pub use types::content::Content;
pub use types::error::ErrorData;
pub use types::jsonrpc::{JsonRpcMessage, JsonRpcReply, RequestId};
pub use types::protocol::{Implementation, PROTOCOL_VERSION};
pub use types::tool::{CallToolResult, Tool, ToolAnnotations};
