//! `acp-chat` binary
//!
//! Run with: cargo run -- --provider claude
//!
//! For help: cargo run -- --help

use std::io::IsTerminal;

use acp_session::{cli::Cli, run_with_cli};
use clap::Parser;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let result = tokio::select! {
        result = run_with_cli(&cli) => result,
        _ = signal::ctrl_c() => {
            eprintln!("Received SIGINT, shutting down...");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);

        if std::io::stdin().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
