mod cmd;
mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let result = match Cli::parse().command {
        Commands::Serve(args) => cmd::serve::run(args).await,
        Commands::Dump(args) => cmd::dump::run(args).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
