use std::process;

use clap::Parser;

use unbug::debugger::Debugger;

/// A small source-level debugger for Linux x86-64.
#[derive(Parser)]
#[command(name = "unbug", version, about)]
struct Cli {
    /// Path to the program to debug (launched with no arguments)
    program: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut debugger = Debugger::new(&cli.program);
    if let Err(err) = debugger.run() {
        eprintln!("unbug: {}", err);
        process::exit(1);
    }
}
