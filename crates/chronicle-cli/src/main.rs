use std::process::ExitCode;

use chronicle_cli::{cli::Cli, commands, config::Config};
use clap::Parser;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("config error: {error:#}");
            return ExitCode::from(chronicle_cli::exit::BAD_INPUT as u8);
        }
    };

    match commands::run(&cli, &config) {
        Ok(code) => ExitCode::from(code as u8),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(chronicle_cli::exit::BAD_INPUT as u8)
        }
    }
}
