use kube::Client;
use std::sync::Arc;
use vaihto::actuator::kube::KubeActuatorProvider;
use vaihto::controller::clock::SystemClock;
use vaihto::controller::health::HttpProber;
use vaihto::controller::RolloutManager;
use vaihto::server::{
    create_metrics, run_api_server, shutdown_channel, wait_for_signal, AppState, ReadinessState,
};
use vaihto::store::FilePlanStore;
use tracing::{error, info};

/// Default port for the operator API and health endpoints
const API_PORT: u16 = 8080;

/// Default directory for persisted plan records
const STATE_DIR: &str = "/var/lib/vaihto";

fn api_port() -> u16 {
    std::env::var("VAIHTO_API_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(API_PORT)
}

fn state_dir() -> String {
    std::env::var("VAIHTO_STATE_DIR").unwrap_or_else(|_| STATE_DIR.to_string())
}

/// Namespace used when a rollout's routing config leaves it empty
fn default_namespace() -> String {
    std::env::var("VAIHTO_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting vaihto deployment-strategy controller");

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("connected to Kubernetes cluster");

    let store = Arc::new(FilePlanStore::open(state_dir()).await?);
    let prober = Arc::new(HttpProber::new()?);
    let actuators = Arc::new(KubeActuatorProvider::new(client, default_namespace()));

    let manager = Arc::new(RolloutManager::new(
        actuators,
        prober,
        store,
        Arc::new(SystemClock),
        metrics.clone(),
        shutdown_signal.clone(),
    ));

    let resumed = manager.resume_from_store().await?;
    if resumed > 0 {
        info!(count = resumed, "resumed persisted rollouts");
    }

    let state = AppState::new(readiness.clone(), metrics, manager);
    let server = tokio::spawn(run_api_server(api_port(), state, shutdown_signal));

    readiness.set_ready();
    info!(port = api_port(), "controller ready");

    let signal = wait_for_signal().await;
    info!(signal, "shutting down");

    // Stop taking traffic first, then stop the loops and the server.
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    match server.await {
        Ok(Ok(())) => info!("API server stopped cleanly"),
        Ok(Err(e)) => error!(error = %e, "API server exited with error"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    info!("shutdown complete");
    Ok(())
}
