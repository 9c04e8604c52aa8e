use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::program::Program;

mod cli;
mod config;
mod logger;
mod media;
mod program;
mod reddit;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help output is not a failure; every other parse error is.
            let code = if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            let _ = e.print();
            return code;
        }
    };

    match Program::new(cli).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
