use clap::Parser;
use patchstack::cli::Cli;
use std::process::ExitCode;

/// Exit status for errors; 1 is reserved for conflicts
const ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.run().await.map_err(anyhow::Error::new) {
        Ok(status) => status.into(),
        Err(e) => {
            patchstack::cli::output::Output::error(format!("{e:#}"));
            ExitCode::from(ERROR_EXIT)
        }
    }
}
