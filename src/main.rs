use std::process::ExitCode;

use clap::Parser;
use search_index_env::{Cli, CliError};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    // stdout is reserved for output that gets eval'd or piped.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json = cli.global.json;
    match search_index_env::run(cli) {
        Ok(code) => code,
        Err(err) => {
            let err = CliError::from_anyhow(&err);
            err.report(json);
            ExitCode::from(err.code)
        }
    }
}
