mod commands;

use clap::Parser;
use course_core::{AppConfig, CatalogClient, CourseCache, FileCredentialStore, JsonFileStore, Session};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, Context};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::load();
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());

    let mut session = Session::new(FileCredentialStore::in_dir(&data_dir));
    session.load().await;

    let client = match CatalogClient::from_config(&config.api) {
        Ok(client) => client.with_credentials(session.credential_store()),
        Err(err) => {
            error!(error = %err, "failed to build HTTP client");
            return std::process::ExitCode::FAILURE;
        }
    };
    let cache = CourseCache::open(JsonFileStore::in_dir(&data_dir)).await;

    let mut ctx = Context {
        client,
        cache,
        session,
    };
    let outcome = commands::run(&mut ctx, cli.command).await;
    ctx.cache.close().await;

    match outcome {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
