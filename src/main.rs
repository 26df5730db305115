mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use ipx::api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => api::run(args.address).await?,
    }

    Ok(())
}
