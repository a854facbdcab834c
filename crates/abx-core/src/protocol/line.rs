//! Newline-delimited JSON chunk/done/error transport.
//!
//! Request: `{"input": str, "workDir": str}`. Responses arrive as zero or
//! more `{"chunk": str}` lines followed by a terminal `{"done": true}` or a
//! line carrying an `"error"` field. End-of-stream (process exit) is treated
//! as an implicit terminal line.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::process::AgentIo;

#[derive(Serialize)]
struct LineRequest<'a> {
    input: &'a str,
    #[serde(rename = "workDir")]
    work_dir: &'a str,
}

struct Inner<R, W> {
    reader: R,
    writer: W,
}

/// Client for the simple line protocol.
///
/// The whole write+drain cycle runs under one lock, so interleaved calls
/// from multiple tasks cannot corrupt the line interleaving on the pipe.
pub struct LineClient<R, W> {
    inner: Mutex<Inner<R, W>>,
}

/// Line client bound to an agent subprocess's stdio.
pub type AgentLineClient = LineClient<BufReader<ChildStdout>, ChildStdin>;

impl AgentLineClient {
    /// Wraps the stdio handles of a freshly spawned agent process.
    pub fn from_io(io: AgentIo) -> Self {
        Self::new(BufReader::new(io.stdout), io.stdin)
    }
}

impl<R, W> LineClient<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner { reader, writer }),
        }
    }

    /// Sends one task request and drains the streamed response.
    ///
    /// Each chunk is delivered through `on_chunk` in arrival order. Returns
    /// once a terminal line (or EOF) is seen, or when `cancel` fires; chunks
    /// already delivered are never discarded on either path.
    ///
    /// # Errors
    /// `Canceled` on cancellation, `Transport` on pipe failure, `Rpc` when
    /// the agent reported an error string.
    pub async fn execute(
        &self,
        input: &str,
        work_dir: &str,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(&str),
    ) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;

        let request = serde_json::to_string(&LineRequest { input, work_dir }).map_err(|e| {
            BridgeError::with_details(
                BridgeErrorKind::Protocol,
                "failed to encode request",
                e.to_string(),
            )
        })?;

        inner
            .writer
            .write_all(request.as_bytes())
            .await
            .map_err(|e| BridgeError::transport("failed to write request", &e))?;
        inner
            .writer
            .write_all(b"\n")
            .await
            .map_err(|e| BridgeError::transport("failed to write request", &e))?;
        inner
            .writer
            .flush()
            .await
            .map_err(|e| BridgeError::transport("failed to flush request", &e))?;

        let mut agent_error: Option<String> = None;
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("line protocol read aborted by cancellation");
                    return Err(BridgeError::canceled());
                }
                result = inner.reader.read_line(&mut line) => {
                    result.map_err(|e| BridgeError::transport("failed to read response", &e))?
                }
            };

            if read == 0 {
                // Process exited: implicit terminal with no further output.
                break;
            }

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(err) => {
                    warn!(%err, "skipping malformed response line");
                    continue;
                }
            };

            // A terminal error line may co-occur with a final chunk.
            if let Some(chunk) = value.get("chunk").and_then(Value::as_str) {
                on_chunk(chunk);
            }
            if let Some(message) = value.get("error").and_then(Value::as_str) {
                agent_error = Some(message.to_string());
            }
            if value.get("done").and_then(Value::as_bool) == Some(true) {
                break;
            }
        }

        match agent_error {
            Some(message) => Err(BridgeError::new(BridgeErrorKind::Rpc, message)),
            None => Ok(()),
        }
    }
}
