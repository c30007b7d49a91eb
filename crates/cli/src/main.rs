//! provchain CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod keystore;

#[derive(Parser)]
#[command(name = "provchain")]
#[command(about = "A tamper-evident provenance ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<commands::Commands>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(cmd) => {
            if let Err(e) = commands::run(cmd) {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("provchain - A tamper-evident provenance ledger");
            println!("Run 'provchain --help' for usage information.");
        }
    }
}
