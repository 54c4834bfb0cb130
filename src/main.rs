//! Entry point for the preview proxy.

use clap::Parser;

use preview_proxy::cli::Cli;
use preview_proxy::config::Config;
use preview_proxy::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from(cli);
    server::init_tracing(config.verbose);
    server::run(config).await?;
    Ok(())
}
