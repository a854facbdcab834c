//! Tools command handler.

use std::path::PathBuf;

use anyhow::Result;

use abx_core::config::Config;
use abx_core::session::Session;

pub async fn run(root: &str, config: &Config) -> Result<()> {
    let session = Session::new(PathBuf::from(root), config.agent.clone());

    let result = session.list_tools().await;
    session.dispose().await;
    let tools = result?;

    if tools.is_empty() {
        println!("No tools exposed.");
        return Ok(());
    }

    for tool in tools {
        match tool.description {
            Some(description) => println!("{}  {}", tool.name, description),
            None => println!("{}", tool.name),
        }
    }
    Ok(())
}
