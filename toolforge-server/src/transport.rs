//! Newline-delimited JSON-RPC over a byte stream.
//!
//! Each request runs on its own task so a long evolution does not block
//! other calls. Responses go through one writer task and may arrive out of
//! order; clients match them by `id`.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::handlers::{HandlerContext, Method, RequestHandler, dispatch_request};
use crate::rpc::{RpcError, RpcResponse, parse_request};

const OUTBOUND_CAPACITY: usize = 64;

/// Serves requests read from `reader` until end of input.
///
/// Returns after every accepted request has been answered.
///
/// # Errors
///
/// Returns I/O errors from reading or writing.
pub async fn serve<H, R, W>(handler: Arc<H>, reader: R, writer: W) -> io::Result<()>
where
    H: RequestHandler + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<RpcResponse>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_responses(rx, writer));

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match parse_request(line) {
            Ok(request) => request,
            Err(response) => {
                warn!(code = ?response.error.as_ref().map(|e| e.code), "rejected malformed message");
                if tx.send(response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let id = request.id;
        let method = match request.method.parse::<Method>() {
            Ok(method) => method,
            Err(err) => {
                debug!(method = %request.method, "unknown method");
                if let Some(id) = id {
                    let response = RpcResponse::failure(id, RpcError::from(&err));
                    if tx.send(response).await.is_err() {
                        break;
                    }
                }
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        let params = request.params;
        tokio::spawn(async move {
            let ctx = HandlerContext::new(method, params);
            let result = dispatch_request(handler.as_ref(), ctx).await;
            let Some(id) = id else {
                return;
            };
            let response = match result {
                Ok(value) => RpcResponse::success(id, value),
                Err(err) => {
                    debug!(%method, %err, "request failed");
                    RpcResponse::failure(id, RpcError::from(&err))
                }
            };
            if tx.send(response).await.is_err() {
                warn!(%method, "response dropped: writer closed");
            }
        });
    }

    info!("input closed; waiting for in-flight requests");
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(err) => Err(io::Error::other(err)),
    }
}

async fn write_responses<W>(mut rx: mpsc::Receiver<RpcResponse>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response).unwrap_or_else(|err| {
            let fallback = RpcResponse::failure(
                response.id.clone(),
                RpcError::new(crate::rpc::INTERNAL_ERROR, format!("unserializable response: {err}")),
            );
            serde_json::to_vec(&fallback).unwrap_or_default()
        });
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;
    use crate::handlers::HandlerResult;
    use crate::rpc::{INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};

    struct Echo;

    #[async_trait::async_trait]
    impl RequestHandler for Echo {
        async fn tools_call(&self, ctx: HandlerContext) -> HandlerResult {
            Ok(ctx.params().clone())
        }
    }

    async fn run(input: &str) -> Vec<Value> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        serve(Arc::new(Echo), BufReader::new(input.as_bytes()), server)
            .await
            .unwrap();
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_requests_and_skips_notifications() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"x"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{}}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let mut out = run(input).await;
        out.sort_by_key(|response| response["id"].as_i64());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["result"], json!({ "name": "x" }));
        assert_eq!(out[1]["result"], json!({}));
    }

    #[tokio::test]
    async fn reports_protocol_errors() {
        let input = concat!(
            "{oops\n",
            r#"{"jsonrpc":"2.0","id":3}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/explode"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/stats"}"#,
            "\n",
        );
        let out = run(input).await;
        let code = |id: Value| {
            out.iter()
                .find(|response| response["id"] == id)
                .map(|response| response["error"]["code"].as_i64().unwrap())
                .unwrap()
        };
        assert_eq!(code(Value::Null), PARSE_ERROR);
        assert_eq!(code(json!(3)), INVALID_REQUEST);
        assert_eq!(code(json!(4)), METHOD_NOT_FOUND);
        assert_eq!(code(json!(5)), METHOD_NOT_FOUND);
    }
}
