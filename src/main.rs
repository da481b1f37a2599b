//! Binary entry point for kuzu-memory.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in the main binary for CLI error output
#![allow(clippy::print_stderr)]

use clap::Parser;
use kuzu_memory::cli::{Cli, run};

fn main() {
    // Load a .env file when present; ignored otherwise.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    std::process::exit(run(&cli));
}
