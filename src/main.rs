//! DSS backend - request admission and lifecycle for RID and SCD services.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use dss_backend::{
    cli::Cli,
    config::Config,
    server::{Server, standard_modules},
    setup_tracing,
    store::{InMemoryRecordStore, RecordStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    if let Err(e) = setup_tracing(&config.log.level, Some(config.log.format.as_str())) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    run_server(config).await
}

async fn run_server(config: Config) -> ExitCode {
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let modules = standard_modules(&config, store);

    let server = match Server::build(&config, modules).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to initialize server");
            return ExitCode::FAILURE;
        }
    };

    match server.serve(CancellationToken::new()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed to execute service");
            ExitCode::FAILURE
        }
    }
}
