use octofit_init::{
    conf::{load_config, load_dotenv},
    init::DatabaseInitializer,
    log_error,
    utils::o11y::{build_subscriber, ERROR},
};

use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

/// Create the octofit collections and the unique index on users.email.
#[derive(Parser)]
struct Cli {
    /// Path to the configuration file, defaults to config.yaml when present
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file before anything else
    load_dotenv();

    let args = Cli::parse();

    let subscriber = build_subscriber().expect("failed to build subscriber");
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            log_error!(ERROR, error, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let exit_on_failure = config.exit_on_failure;
    match DatabaseInitializer::new(config.database).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) if exit_on_failure => ExitCode::FAILURE,
        Err(_) => {
            warn!("initialization failed, exiting with status 0 (exit_on_failure is off)");
            ExitCode::SUCCESS
        }
    }
}
