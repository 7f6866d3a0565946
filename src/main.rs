//! ephemeral-cluster CLI entry point.

use clap::Parser;

use ephemeral_cluster::cli::{commands, handle_error, Cli, Commands};
use ephemeral_cluster::infrastructure::config::ConfigLoader;
use ephemeral_cluster::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_with(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(&err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err, cli.json),
    };

    let result = match cli.command {
        Commands::Start(args) => commands::start::execute(args, config, cli.json).await,
        Commands::Classify(args) => commands::classify::execute(args, cli.json).await,
        Commands::Config => commands::config::execute(config, cli.json),
    };

    if let Err(err) = result {
        handle_error(&err, cli.json);
    }
}
