//! HTTP client for a remote agent server streaming SSE responses.

use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::conversation::Conversation;
use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::stream::{EventStream, Framing, StreamEvent};

/// Client for the remote chat endpoint.
///
/// `POST {base}/api/chat/{conversation_id}` streams SSE events;
/// `POST {base}/api/chat/{conversation_id}/cancel` aborts the server-side
/// task.
#[derive(Debug)]
pub struct RemoteAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteAgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Builds a client from configuration.
    ///
    /// # Errors
    /// `Unavailable` when no remote base URL is configured.
    pub fn from_config(config: &RemoteConfig) -> BridgeResult<Self> {
        match config.base_url.as_deref() {
            Some(base_url) => Ok(Self::new(base_url)),
            None => Err(BridgeError::new(
                BridgeErrorKind::Unavailable,
                "no remote base_url configured",
            )),
        }
    }

    fn chat_url(&self, conversation_id: &str) -> String {
        format!("{}/api/chat/{conversation_id}", self.base_url)
    }

    /// Sends one chat message and assembles the streamed response.
    ///
    /// Each decoded event is forwarded through `on_event` as it arrives.
    /// When `cancel` fires, the server-side task is told to stop and the
    /// partial conversation is returned with its canceled flag set; text
    /// received so far is kept.
    ///
    /// # Errors
    /// `Transport` on connection failure, `Rpc` carrying the status code on
    /// a non-success response.
    pub async fn chat(
        &self,
        conversation_id: &str,
        message: &str,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> BridgeResult<Conversation> {
        let response = self
            .http
            .post(self.chat_url(conversation_id))
            .json(&json!({ "message": message }))
            .send()
            .await
            .map_err(|e| {
                BridgeError::with_details(
                    BridgeErrorKind::Transport,
                    "failed to reach remote agent",
                    e.to_string(),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut err = BridgeError::rpc(
                i64::from(status.as_u16()),
                format!("remote agent returned {status}"),
            );
            if !body.is_empty() {
                err.details = Some(body);
            }
            return Err(err);
        }

        let mut conversation = Conversation::new();
        conversation.push_user(message);
        // The adapter flushes the carry-over buffer and surfaces transport
        // errors as a terminal Error event, so events decoded before a
        // failure are never dropped.
        let mut events = EventStream::new(response.bytes_stream(), Framing::Sse);

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(conversation_id, "remote chat canceled");
                    conversation.cancel();
                    if let Err(err) = self.cancel_task(conversation_id).await {
                        warn!(%err, "failed to cancel remote task");
                    }
                    return Ok(conversation);
                }
                event = events.next() => event,
            };

            let Some(event) = event else {
                break;
            };
            on_event(&event);
            conversation.apply(event);
            if conversation.is_finished() {
                break;
            }
        }

        Ok(conversation)
    }

    /// Asks the server to abort the task for a conversation.
    ///
    /// # Errors
    /// `Transport` on connection failure, `Rpc` on a non-success response.
    pub async fn cancel_task(&self, conversation_id: &str) -> BridgeResult<()> {
        let response = self
            .http
            .post(format!("{}/cancel", self.chat_url(conversation_id)))
            .send()
            .await
            .map_err(|e| {
                BridgeError::with_details(
                    BridgeErrorKind::Transport,
                    "failed to reach remote agent",
                    e.to_string(),
                )
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::rpc(
                i64::from(status.as_u16()),
                format!("cancel returned {status}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_normalized() {
        let client = RemoteAgentClient::new("http://localhost:8080///");
        assert_eq!(client.chat_url("c1"), "http://localhost:8080/api/chat/c1");
    }

    #[test]
    fn missing_base_url_is_unavailable() {
        let err = RemoteAgentClient::from_config(&RemoteConfig::default()).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Unavailable);
    }
}
