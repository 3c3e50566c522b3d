//! deFunds API - Withdrawal Orchestrator Launcher
//!
//! Loads environment configuration, initializes structured logging and
//! serves the REST API. All deployment-specific values come from
//! `DEFUNDS_*` environment variables; devnet boots with working defaults.

use defunds_backend::api::{start_server, AppState};
use defunds_backend::config::{Network, OrchestratorConfig};
use defunds_backend::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("logging init error: {}", e);
        std::process::exit(1);
    }

    if config.network == Network::Mainnet {
        if let Err(e) = config.validate_for_production() {
            error!(error = %e, "production validation failed");
            std::process::exit(1);
        }
    }

    info!(
        network = ?config.network,
        solana_rpc = %config.solana_rpc,
        router_api = %config.router_api,
        port = config.port,
        "starting deFunds withdrawal orchestrator"
    );

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to wire application state");
            std::process::exit(1);
        }
    };

    if let Err(e) = start_server(state).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
