//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! Stdout carries protocol frames only. Logs must go to stderr.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::{dispatch, Handler, McpServer};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, JsonRpcReply, RequestId};

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stdio transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serve the process's stdin/stdout until stdin closes.
pub async fn serve_stdio<H: Handler>(server: Arc<McpServer<H>>) -> Result<(), StdioError> {
    serve_io(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve any line-oriented reader/writer pair until the reader hits EOF.
///
/// Each request runs on its own task, so a call that blocks (a job wait,
/// a slow upstream) never holds up the lines behind it. Replies come back
/// through one channel and are written by this loop alone; frames are
/// whole lines in completion order. After EOF the loop keeps writing until
/// every in-flight request has answered.
pub async fn serve_io<H, R, W>(server: Arc<McpServer<H>>, reader: R, mut writer: W) -> Result<(), StdioError>
where
    H: Handler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<JsonRpcReply>();
    let mut reply_tx = Some(reply_tx);
    tracing::info!("stdio transport ready");

    loop {
        tokio::select! {
            line = lines.next_line(), if reply_tx.is_some() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed, draining in-flight requests");
                    reply_tx = None;
                    continue;
                };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if let Some(tx) = &reply_tx {
                    let server = Arc::clone(&server);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = handle_line(&server, &line).await {
                            // The receiver only goes away if the writer failed.
                            let _ = tx.send(reply);
                        }
                    });
                }
            }
            reply = replies.recv() => {
                // None once stdin is closed and every request task is done.
                let Some(reply) = reply else { break };
                let mut frame = serde_json::to_vec(&reply)?;
                frame.push(b'\n');
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
        }
    }

    tracing::info!("stdio transport stopping");
    Ok(())
}

async fn handle_line<H: Handler>(server: &McpServer<H>, line: &str) -> Option<JsonRpcReply> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "dropping unparseable stdio frame");
            return Some(JsonRpcReply::failure(
                None,
                ErrorData::parse_error(format!("Parse error: {}", e)),
            ));
        }
    };

    let recovered_id = raw
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    match serde_json::from_value::<JsonRpcMessage>(raw) {
        Ok(message) => dispatch(server, &message).await,
        Err(e) => Some(JsonRpcReply::failure(
            recovered_id,
            ErrorData::invalid_request(format!("Invalid JSON-RPC: {}", e)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::Implementation;
    use crate::types::tool::{CallToolResult, Tool};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    /// `hello` answers at once; `nap` sleeps first.
    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("hello", "Say hello"), Tool::new("nap", "Say hello, eventually")]
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<CallToolResult, ErrorData> {
            if name == "nap" {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(CallToolResult::text(name))
        }

        fn server_info(&self) -> Implementation {
            Implementation::new("hello", "0.0.1")
        }
    }

    async fn run(input: &str) -> Vec<Value> {
        let server = Arc::new(McpServer::new(Hello));
        let mut output = Vec::new();
        serve_io(server, input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn reply_for(replies: &[Value], id: Value) -> &Value {
        replies
            .iter()
            .find(|reply| reply["id"] == id)
            .unwrap_or_else(|| panic!("no reply for id {}", id))
    }

    #[tokio::test]
    async fn test_one_reply_per_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"hello"}}"#,
            "\n",
        );
        let replies = run(input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(reply_for(&replies, 1.into())["result"]["tools"][0]["name"], "hello");
        assert_eq!(reply_for(&replies, 2.into())["result"]["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_loop() {
        let input = "garbage\n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n";
        let replies = run(input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(reply_for(&replies, Value::Null)["error"]["code"], ErrorData::PARSE_ERROR);
        assert!(reply_for(&replies, 3.into())["result"].is_object());
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_later_requests() {
        let server = Arc::new(McpServer::new(Hello));
        let (mut client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let serving = tokio::spawn(serve_io(server, server_read, server_write));

        let start = Instant::now();
        client
            .write_all(
                concat!(
                    r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nap"}}"#,
                    "\n",
                    r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"hello"}}"#,
                    "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut lines = BufReader::new(client_read).lines();

        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], 2);
        assert!(start.elapsed() < Duration::from_millis(400));

        // Closing our end is EOF for the server, which still owes reply 1.
        client_write.shutdown().await.unwrap();
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["id"], 1);
        assert_eq!(second["result"]["content"][0]["text"], "nap");

        serving.await.unwrap().unwrap();
    }
}
