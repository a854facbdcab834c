//! Config command handlers.

use anyhow::Result;

use abx_core::config::{self, paths};

pub fn path() -> Result<()> {
    println!("{}", paths::config_path().display());
    Ok(())
}

pub fn init() -> Result<()> {
    let path = config::Config::init()?;
    println!("Created config at {}", path.display());
    Ok(())
}
