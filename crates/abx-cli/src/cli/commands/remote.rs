//! Remote chat command handler.

use std::io::Write;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use abx_core::config::Config;
use abx_core::interrupt;
use abx_core::remote::RemoteAgentClient;
use abx_core::stream::StreamEvent;

pub async fn run(message: &str, conversation: Option<&str>, config: &Config) -> Result<()> {
    let client = RemoteAgentClient::from_config(&config.remote)
        .context("remote agent not configured")?;

    let conversation_id = conversation
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            interrupt::wait_for_interrupt().await;
            cancel.cancel();
        })
    };

    let result = client
        .chat(&conversation_id, message, &cancel, |event| match event {
            StreamEvent::Text { content } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::ToolCall { tool_name, .. } => {
                eprintln!("[tool: {tool_name}]");
            }
            _ => {}
        })
        .await;

    watcher.abort();
    let turn = result?;
    println!();

    if let Some(message) = turn.error() {
        anyhow::bail!("remote agent error: {message}");
    }
    if turn.is_canceled() {
        eprintln!("(canceled)");
    }
    Ok(())
}
