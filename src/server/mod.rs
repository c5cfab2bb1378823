//! HTTP surface and process lifecycle
//!
//! One axum server carries the operator API, the Kubernetes probes, and the
//! Prometheus scrape endpoint. `shutdown` wires SIGTERM/SIGINT into every
//! reconcile loop.

pub mod api;
mod health;
pub mod metrics;
pub mod shutdown;

pub use api::{build_router, run_api_server, AppState};
pub use health::ReadinessState;
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "api_test.rs"]
mod api_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
