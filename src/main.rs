//! metaopt CLI entry point.

use clap::Parser;

use metaopt::cli::{handle_error, Cli, Commands};
use metaopt::infrastructure::config::ConfigLoader;
use metaopt::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(&err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err, cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => metaopt::cli::commands::run::execute(args, config, cli.json).await,
        Commands::Evaluate(args) => metaopt::cli::commands::evaluate::execute(args, config, cli.json).await,
        Commands::Transfer(args) => metaopt::cli::commands::transfer::execute(args, config, cli.json).await,
        Commands::Runs => metaopt::cli::commands::runs::execute(config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(&err, cli.json);
    }
}
