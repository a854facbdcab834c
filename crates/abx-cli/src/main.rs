use abx_core::error::BridgeError;

mod cli;

fn main() {
    if let Err(e) = cli::run() {
        if e.downcast_ref::<BridgeError>().is_some_and(BridgeError::is_canceled) {
            std::process::exit(130);
        }
        eprintln!("{e:#}"); // pretty anyhow chain
        std::process::exit(1);
    }
}
