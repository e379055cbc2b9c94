//! JSON-lines method channel
//!
//! Carries method calls into the bridge and replies back out over any async
//! byte stream. One JSON object per line in each direction:
//!
//! ```text
//! -> {"id": 1, "method": "loadAccount", "arguments": {...}}
//! <- {"id": 1, "result": "adele@contoso.com"}
//! <- {"id": 2, "error": {"code": "NO_SESSION", "message": "...", "details": null}}
//! ```
//!
//! Requests run concurrently, so replies may arrive out of order; the `id`
//! is echoed back untouched for correlation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::bridge::{AuthBridge, ErrorReply, MethodCall, Reply};
use crate::completion::completion;

/// Code for lines that are not a method call.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Inbound line.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub call: MethodCall,
}

/// Outbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error { id: Value, error: ErrorReply },
    Success { id: Value, result: Option<String> },
}

impl Response {
    pub fn from_reply(id: Value, reply: Reply) -> Self {
        match reply {
            Ok(result) => Response::Success { id, result },
            Err(e) => Response::Error {
                id,
                error: e.to_reply(),
            },
        }
    }

    fn invalid_request(id: Value, error: &serde_json::Error) -> Self {
        Response::Error {
            id,
            error: ErrorReply {
                code: INVALID_REQUEST.to_string(),
                message: format!("Malformed request: {}", error),
                details: None,
            },
        }
    }
}

/// Parse one line. On failure, returns the line's `id` when it has one.
fn parse_request(line: &str) -> Result<Request, (Value, serde_json::Error)> {
    let value: Value = serde_json::from_str(line).map_err(|e| (Value::Null, e))?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| (id, e))
}

/// Serve requests from `reader` until end of input, then wait for every
/// in-flight request to reply before returning.
pub async fn serve<R, W>(bridge: AuthBridge, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = rx.recv().await {
            let mut line =
                serde_json::to_string(&response).context("Failed to serialize reply")?;
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .await
                .context("Failed to write reply")?;
            writer.flush().await.context("Failed to flush reply")?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if tx.is_closed() {
            tracing::warn!("Reply writer stopped, no longer reading requests");
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match parse_request(line) {
            Ok(request) => request,
            Err((id, e)) => {
                tracing::warn!("Malformed request: {}", e);
                if tx.send(Response::invalid_request(id, &e)).is_err() {
                    tracing::warn!("Reply writer stopped, no longer reading requests");
                    break;
                }
                continue;
            }
        };

        let (completer, completion) = completion();
        bridge.handle(request.call, completer);

        let tx = tx.clone();
        let id = request.id;
        tokio::spawn(async move {
            let reply = completion.await;
            if tx.send(Response::from_reply(id.clone(), reply)).is_err() {
                tracing::warn!("Reply to request {} dropped, writer stopped", id);
            }
        });
    }

    tracing::debug!("Input closed, draining in-flight requests");
    drop(tx);
    writer_task.await.context("Reply writer panicked")?
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(bridge: AuthBridge) -> Result<()> {
    serve(bridge, tokio::io::stdin(), tokio::io::stdout()).await
}
