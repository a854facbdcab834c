//! Exec command handler.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use abx_core::config::Config;
use abx_core::interrupt;
use abx_core::session::Session;

pub async fn run(root: &str, prompt: &str, config: &Config) -> Result<()> {
    let session = Arc::new(Session::new(PathBuf::from(root), config.agent.clone()));

    // Ctrl+C cancels the in-flight task instead of killing the process tree.
    let watcher = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            interrupt::wait_for_interrupt().await;
            session.cancel();
        })
    };

    let result = session
        .execute(prompt, |chunk| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        })
        .await;

    watcher.abort();
    session.dispose().await;

    result?;
    println!();
    Ok(())
}
