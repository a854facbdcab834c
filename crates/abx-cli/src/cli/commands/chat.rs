//! Interactive chat over one long-lived agent session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use abx_core::config::Config;
use abx_core::interrupt;
use abx_core::session::Session;

pub async fn run(root: &str, config: &Config) -> Result<()> {
    let session = Arc::new(Session::new(PathBuf::from(root), config.agent.clone()));

    let watcher = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                interrupt::wait_for_interrupt().await;
                session.cancel();
                // Wait for the flag to clear before arming again, otherwise
                // this loop would spin on the still-set flag.
                while interrupt::is_interrupted() {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        })
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let result = session
            .execute(input, |chunk| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        match result {
            Ok(_) => {}
            Err(err) if err.is_canceled() => {
                println!("(canceled)");
                interrupt::reset();
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }

    watcher.abort();
    session.dispose().await;
    Ok(())
}
