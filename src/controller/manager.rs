//! Rollout lifecycle management
//!
//! The manager owns one reconcile loop per service. Operators start, watch,
//! abort, and promote rollouts through it; the HTTP layer is a thin shell
//! over these methods. Each loop publishes plan snapshots on a watch
//! channel, so status reads never contend with the loop itself.

use crate::actuator::ActuatorProvider;
use crate::controller::clock::Clock;
use crate::controller::health::Prober;
use crate::controller::reconciler::{PlanControls, Reconciler};
use crate::controller::strategies::select_driver;
use crate::plan::{
    validate_config, validate_service_name, ConfigError, Pool, RolloutConfig, StrategyKind,
    TrafficPlan,
};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use crate::store::{PlanStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("a rollout for {0} is already in progress")]
    AlreadyActive(String),

    #[error("no rollout found for {0}")]
    NotFound(String),

    #[error("rollout for {0} has already finished")]
    Finished(String),

    #[error("strategy {0} does not support manual promotion")]
    PromoteUnsupported(&'static str),

    #[error("controller is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to begin a rollout for one service
#[derive(Debug, Clone)]
pub struct StartRollout {
    pub service_name: String,
    pub strategy: StrategyKind,
    pub source_pool: String,
    pub source_version: String,
    pub target_pool: String,
    pub target_version: String,
    pub config: RolloutConfig,
}

struct PlanHandle {
    snapshot: watch::Receiver<TrafficPlan>,
    controls: PlanControls,
    strategy: StrategyKind,
}

pub struct RolloutManager {
    actuators: Arc<dyn ActuatorProvider>,
    prober: Arc<dyn Prober>,
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
    metrics: SharedMetrics,
    shutdown: ShutdownSignal,
    plans: Mutex<HashMap<String, PlanHandle>>,
}

impl RolloutManager {
    pub fn new(
        actuators: Arc<dyn ActuatorProvider>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn PlanStore>,
        clock: Arc<dyn Clock>,
        metrics: SharedMetrics,
        shutdown: ShutdownSignal,
    ) -> Self {
        RolloutManager {
            actuators,
            prober,
            store,
            clock,
            metrics,
            shutdown,
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and launch a new rollout; rejects a service that already
    /// has one in flight.
    pub async fn start_rollout(&self, request: StartRollout) -> Result<TrafficPlan, OperatorError> {
        // During drain the existing loops finish, but no new ones start.
        if self.shutdown.is_shutdown() {
            return Err(OperatorError::ShuttingDown);
        }
        validate_service_name(&request.service_name)?;
        validate_config(&request.strategy, &request.config)?;

        let mut plans = self.plans.lock().await;
        if let Some(handle) = plans.get(&request.service_name) {
            if !handle.snapshot.borrow().is_terminal() {
                return Err(OperatorError::AlreadyActive(request.service_name));
            }
        }

        let plan = TrafficPlan::new(
            request.service_name.clone(),
            request.strategy,
            Pool::new(request.source_pool, request.source_version),
            Pool::new(request.target_pool, request.target_version),
            request.config,
            self.clock.now(),
        );
        self.store.save(&plan).await?;

        info!(
            service = %plan.service_name,
            strategy = plan.strategy.as_str(),
            "starting rollout"
        );
        self.spawn_loop(&mut plans, plan.clone())?;
        Ok(plan)
    }

    /// Point-in-time snapshot of a rollout, falling back to the store for
    /// plans with no running loop (finished before a restart).
    pub async fn get_status(&self, service: &str) -> Result<TrafficPlan, OperatorError> {
        if let Some(handle) = self.plans.lock().await.get(service) {
            return Ok(handle.snapshot.borrow().clone());
        }
        self.store
            .load(service)
            .await?
            .ok_or_else(|| OperatorError::NotFound(service.to_string()))
    }

    /// Request a rollback; the loop honors it on its next tick
    pub async fn abort(&self, service: &str) -> Result<(), OperatorError> {
        let plans = self.plans.lock().await;
        let handle = plans
            .get(service)
            .ok_or_else(|| OperatorError::NotFound(service.to_string()))?;
        if handle.snapshot.borrow().is_terminal() {
            return Err(OperatorError::Finished(service.to_string()));
        }
        handle.controls.request_abort();
        Ok(())
    }

    /// Request that the current soak be skipped (canary only)
    pub async fn promote(&self, service: &str) -> Result<(), OperatorError> {
        let plans = self.plans.lock().await;
        let handle = plans
            .get(service)
            .ok_or_else(|| OperatorError::NotFound(service.to_string()))?;

        let driver = select_driver(&handle.strategy);
        if !driver.supports_manual_promotion() {
            return Err(OperatorError::PromoteUnsupported(driver.name()));
        }
        if handle.snapshot.borrow().is_terminal() {
            return Err(OperatorError::Finished(service.to_string()));
        }
        handle.controls.request_promote();
        Ok(())
    }

    /// Restart every non-terminal persisted rollout; returns how many resumed
    pub async fn resume_from_store(&self) -> Result<usize, OperatorError> {
        let mut plans = self.plans.lock().await;
        let mut resumed = 0;

        for plan in self.store.list().await? {
            if plan.is_terminal() || plans.contains_key(&plan.service_name) {
                continue;
            }
            info!(
                service = %plan.service_name,
                status = ?plan.status,
                weight = plan.target_weight,
                "resuming persisted rollout"
            );
            match self.spawn_loop(&mut plans, plan) {
                Ok(()) => resumed += 1,
                // One broken record must not block the others.
                Err(error) => warn!(error = %error, "could not resume rollout"),
            }
        }
        Ok(resumed)
    }

    fn spawn_loop(
        &self,
        plans: &mut HashMap<String, PlanHandle>,
        plan: TrafficPlan,
    ) -> Result<(), OperatorError> {
        let actuator = self.actuators.actuator_for(&plan)?;
        let controls = PlanControls::new();
        let (sender, receiver) = watch::channel(plan.clone());

        let handle = PlanHandle {
            snapshot: receiver,
            controls: controls.clone(),
            strategy: plan.strategy,
        };

        let reconciler = Reconciler::new(
            plan.clone(),
            select_driver(&plan.strategy),
            actuator,
            self.prober.clone(),
            self.store.clone(),
            self.clock.clone(),
            controls,
            self.metrics.clone(),
        );

        self.metrics.plan_started();
        tokio::spawn(reconciler.run(sender, self.shutdown.clone()));
        plans.insert(plan.service_name, handle);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "manager_test.rs"]
mod tests;
