use anyhow::Result;
use clap::Parser;

use yt_limiter::cli::Args;
use yt_limiter::commands::run_command;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    run_command(args)
}
