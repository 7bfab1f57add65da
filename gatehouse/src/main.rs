use std::net::SocketAddr;

use args::Args;
use clap::Parser;
use server::ServeConfig;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config()?;

    logger::init(&args);

    // CLI flag wins over the config file; neither means localhost.
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

    log::info!(
        "Starting Gatehouse with {} rate limit storage",
        config.rate_limits.storage.backend
    );

    if let Err(e) = server::serve(ServeConfig { listen_address, config }).await {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    Ok(())
}
