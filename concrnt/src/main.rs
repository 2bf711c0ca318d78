//! Concrnt server entry point

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concrnt::{run, AppState, Args};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("concrnt={log_level},info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("configuration error: {}", e);
        return std::process::ExitCode::FAILURE;
    }

    info!("======================================");
    info!("  Concrnt - federated timeline server");
    info!("======================================");
    info!("FQDN: {}", args.fqdn);
    info!("CSID: {}", args.csid);
    info!("Dimension: {:?}", args.dimension);
    info!("Registration: {}", args.registration);
    info!("Listen: {}", args.listen);
    info!("Storage: {}", args.db_uri);
    info!("======================================");

    let state = match AppState::init(args).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("startup failed: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(state).await {
        error!("server error: {}", e);
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
