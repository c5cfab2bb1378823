//! Graceful shutdown plumbing
//!
//! One `ShutdownController` fans out to any number of `ShutdownSignal`
//! clones over a watch channel. On SIGTERM or SIGINT the controller flips
//! the flag once; reconcile loops finish their in-flight tick and exit, the
//! API stops admitting new rollouts, and readiness goes false so probes
//! drain traffic first.

use tokio::sync::watch;
use tracing::info;

/// Cloneable handle that resolves once shutdown has been triggered
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves when shutdown is triggered. A dropped controller counts as
    /// shutdown too, so waiters never hang on a vanished sender.
    pub async fn wait(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    /// Non-blocking check, used to refuse new work during drain
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// The triggering side; there is exactly one per process
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
        info!("shutdown signal sent");
    }
}

/// Create a controller plus the first signal handle to clone from
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Block until SIGTERM or SIGINT arrives; returns the signal name
///
/// # Panics
/// Panics if the signal handlers cannot be registered, which only happens
/// under OS resource exhaustion at startup.
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("cannot register SIGTERM handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("cannot register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM");
            "SIGTERM"
        }
        _ = sigint.recv() => {
            info!("received SIGINT");
            "SIGINT"
        }
    }
}

/// Block until Ctrl+C arrives (non-Unix platforms)
///
/// # Panics
/// Panics if the Ctrl+C handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .expect("cannot register Ctrl+C handler");
    info!("received Ctrl+C");
    "CTRL_C"
}
