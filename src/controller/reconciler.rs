//! The reconcile loop
//!
//! One `Reconciler` owns one `TrafficPlan` for its whole lifetime. Every
//! tick it refreshes observed pool state, samples health, asks the strategy
//! driver for the next step, applies the resulting commands with retries,
//! and persists the updated plan. The loop exits when the plan reaches a
//! terminal status or the controller shuts down.

use crate::actuator::{ActuationError, Actuator};
use crate::controller::clock::Clock;
use crate::controller::health::{evaluate_window, window_for, Prober, SampleWindow};
use crate::controller::strategies::{HealthVerdict, StepDecision, StrategyDriver};
use crate::plan::{PlanStatus, StepCommand, TrafficPlan};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use crate::store::{PlanStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read pool {pool}: {source}")]
    PoolRead {
        pool: String,
        source: ActuationError,
    },

    #[error("failed to persist plan for {service}: {source}")]
    Persist {
        service: String,
        source: StoreError,
    },
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Commands were applied or the plan changed state
    Acted,
    /// Nothing to do yet (converging, soaking, or gathering samples)
    Waited,
    /// The plan is terminal; the loop should stop
    Terminal,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Acted => "acted",
            TickOutcome::Waited => "waited",
            TickOutcome::Terminal => "terminal",
        }
    }
}

/// Operator levers for a running plan, shared with the API layer
///
/// Both flags are observed at the top of the next tick; neither interrupts
/// a command already in flight.
#[derive(Clone, Default)]
pub struct PlanControls {
    abort: Arc<AtomicBool>,
    promote: Arc<AtomicBool>,
}

impl PlanControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn request_promote(&self) {
        self.promote.store(true, Ordering::SeqCst);
    }

    pub fn promote_requested(&self) -> bool {
        self.promote.load(Ordering::SeqCst)
    }

    /// The promote request is single-use: consumed by the tick that acts on it
    pub fn clear_promote(&self) {
        self.promote.store(false, Ordering::SeqCst);
    }
}

pub struct Reconciler {
    plan: TrafficPlan,
    driver: Box<dyn StrategyDriver>,
    actuator: Arc<dyn Actuator>,
    prober: Arc<dyn Prober>,
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
    controls: PlanControls,
    metrics: SharedMetrics,
    source_window: SampleWindow,
    target_window: SampleWindow,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: TrafficPlan,
        driver: Box<dyn StrategyDriver>,
        actuator: Arc<dyn Actuator>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn PlanStore>,
        clock: Arc<dyn Clock>,
        controls: PlanControls,
        metrics: SharedMetrics,
    ) -> Self {
        let source_window = window_for(&plan.config.health);
        let target_window = window_for(&plan.config.health);
        Reconciler {
            plan,
            driver,
            actuator,
            prober,
            store,
            clock,
            controls,
            metrics,
            source_window,
            target_window,
        }
    }

    pub fn plan(&self) -> &TrafficPlan {
        &self.plan
    }

    /// Run one reconcile tick
    pub async fn tick(&mut self) -> Result<TickOutcome, ReconcileError> {
        if self.plan.is_terminal() {
            return Ok(TickOutcome::Terminal);
        }

        if self.controls.abort_requested() {
            return self.abort().await;
        }

        if let Err(error) = self.refresh_pools().await {
            return match error {
                // A rejected read (unknown pool) cannot heal; terminate the
                // plan instead of spinning on the error every tick.
                ReconcileError::PoolRead { ref source, .. } if !source.is_retryable() => {
                    self.fail(error.to_string()).await
                }
                other => Err(other),
            };
        }
        let verdict = self.sample_health().await;
        self.plan.promote_requested = self.controls.promote_requested();

        let now = self.clock.now();
        let decision = self.driver.next_step(&self.plan, &verdict, now);

        let mut applied_any = false;
        for command in &decision.commands {
            if self.is_noop(command) {
                continue;
            }
            if let Err(outcome) = self.apply_with_retry(command).await {
                return outcome;
            }
            applied_any = true;
        }

        let outcome = self.commit(decision, applied_any).await?;
        self.metrics
            .record_tick(self.driver.name(), outcome.as_str());
        Ok(outcome)
    }

    /// Operator abort: restore all traffic to the source and retire the target
    async fn abort(&mut self) -> Result<TickOutcome, ReconcileError> {
        info!(service = %self.plan.service_name, "abort requested; rolling back");

        let mut commands = Vec::new();
        if self.plan.target_weight > 0 {
            commands.push(StepCommand::SetTrafficWeight {
                source_weight: 100,
                target_weight: 0,
            });
        }
        commands.push(StepCommand::ScalePool {
            pool: self.plan.target.name.clone(),
            replicas: 0,
        });

        for command in &commands {
            if let Err(outcome) = self.apply_with_retry(command).await {
                return outcome;
            }
        }

        self.plan.status = PlanStatus::RolledBack;
        self.plan.target_weight = 0;
        self.plan.failure_reason = Some("rollout aborted by operator".to_string());
        self.plan.message = Some("rolled back on operator request".to_string());
        self.plan.last_transition = self.clock.now();
        self.persist().await?;

        self.metrics
            .set_traffic_weight(&self.plan.service_name, self.plan.target_weight);
        self.metrics.record_tick(self.driver.name(), "terminal");
        Ok(TickOutcome::Terminal)
    }

    /// Refresh both pools from the orchestrator's read API
    async fn refresh_pools(&mut self) -> Result<(), ReconcileError> {
        for pool in [&mut self.plan.source, &mut self.plan.target] {
            let state = self
                .actuator
                .read_pool(&pool.name)
                .await
                .map_err(|source| ReconcileError::PoolRead {
                    pool: pool.name.clone(),
                    source,
                })?;
            pool.desired_replicas = state.desired_replicas;
            pool.ready_replicas = state.ready_replicas;
            pool.version = state.version;
        }
        Ok(())
    }

    /// Probe both endpoints, update the windows, and evaluate verdicts
    async fn sample_health(&mut self) -> HealthVerdict {
        let timeout = Duration::from_secs(self.plan.config.health.probe_timeout_seconds);

        let sample = self
            .prober
            .sample(
                &self.plan.source.name,
                &self.plan.config.source_endpoint,
                timeout,
            )
            .await;
        self.source_window.push(sample);

        let sample = self
            .prober
            .sample(
                &self.plan.target.name,
                &self.plan.config.target_endpoint,
                timeout,
            )
            .await;
        self.target_window.push(sample);

        self.plan.source.health = evaluate_window(&self.source_window, &self.plan.config.health);
        self.plan.target.health = evaluate_window(&self.target_window, &self.plan.config.health);

        HealthVerdict {
            source: self.plan.source.health,
            target: self.plan.target.health,
        }
    }

    /// A command whose values already match observed state is skipped, so a
    /// re-delivered decision (after a restart or a crashed tick) costs no
    /// orchestrator call.
    fn is_noop(&self, command: &StepCommand) -> bool {
        match command {
            StepCommand::ScalePool { pool, replicas } => {
                let observed = if *pool == self.plan.source.name {
                    self.plan.source.desired_replicas
                } else if *pool == self.plan.target.name {
                    self.plan.target.desired_replicas
                } else {
                    return false;
                };
                observed == *replicas
            }
            StepCommand::SetTrafficWeight {
                source_weight,
                target_weight,
            } => {
                *source_weight == self.plan.source_weight()
                    && *target_weight == self.plan.target_weight
            }
        }
    }

    /// Apply one command, retrying transient and conflict failures with
    /// exponential backoff. A rejection or an exhausted budget is fatal:
    /// the plan transitions to rolled_back and the tick ends.
    async fn apply_with_retry(
        &mut self,
        command: &StepCommand,
    ) -> Result<(), Result<TickOutcome, ReconcileError>> {
        let retry = self.plan.config.retry.clone();

        for attempt in 1..=retry.max_attempts {
            match self.actuator.apply(command).await {
                Ok(_) => {
                    self.metrics.record_actuation(command.kind(), "ok");
                    return Ok(());
                }
                Err(error) => {
                    self.metrics.record_actuation(command.kind(), "error");

                    if !error.is_retryable() || attempt == retry.max_attempts {
                        error!(
                            service = %self.plan.service_name,
                            command = %command,
                            attempt,
                            error = %error,
                            "actuation failed; rolling back"
                        );
                        return Err(self.fail(format!("actuation failed: {}", error)).await);
                    }

                    if error.is_conflict() {
                        // Someone else modified the resource; refresh our view
                        // of the pools before reissuing the same command.
                        if let Err(read_error) = self.refresh_pools().await {
                            warn!(error = %read_error, "pool refresh after conflict failed");
                        }
                    }

                    let delay = backoff_delay(&retry, attempt);
                    warn!(
                        service = %self.plan.service_name,
                        command = %command,
                        attempt,
                        delay_seconds = delay.as_secs(),
                        error = %error,
                        "actuation failed; retrying"
                    );
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop returns on success or on the final attempt")
    }

    /// Transition to rolled_back after an unrecoverable orchestrator error
    async fn fail(&mut self, reason: String) -> Result<TickOutcome, ReconcileError> {
        self.plan.status = PlanStatus::RolledBack;
        self.plan.failure_reason = Some(reason);
        self.plan.last_transition = self.clock.now();
        self.persist().await?;
        self.metrics.record_tick(self.driver.name(), "terminal");
        Ok(TickOutcome::Terminal)
    }

    /// Fold the decision into the plan and persist if anything changed
    async fn commit(
        &mut self,
        decision: StepDecision,
        applied_any: bool,
    ) -> Result<TickOutcome, ReconcileError> {
        let changed = decision.changes_plan() || applied_any;
        // The promote lever is consumed only by the tick that advances the
        // step or promotes; a convergence tick in between must not eat it.
        let consumed_promote =
            decision.step_index.is_some() || decision.status == Some(PlanStatus::Promoted);

        if let Some(weight) = decision.target_weight {
            self.plan.target_weight = weight;
            self.metrics
                .set_traffic_weight(&self.plan.service_name, weight);
        }
        if let Some(index) = decision.step_index {
            self.plan.step_index = Some(index);
        }
        if let Some(status) = decision.status {
            self.plan.status = status;
        }
        if decision.message.is_some() {
            self.plan.message = decision.message;
        }
        if decision.failure_reason.is_some() {
            self.plan.failure_reason = decision.failure_reason;
        }

        if changed {
            // Soak periods restart from the latest committed change.
            self.plan.last_transition = self.clock.now();
            if consumed_promote && self.plan.promote_requested {
                self.controls.clear_promote();
                self.plan.promote_requested = false;
            }
            self.persist().await?;
        }

        if self.plan.is_terminal() {
            Ok(TickOutcome::Terminal)
        } else if changed {
            Ok(TickOutcome::Acted)
        } else {
            Ok(TickOutcome::Waited)
        }
    }

    async fn persist(&self) -> Result<(), ReconcileError> {
        self.store
            .save(&self.plan)
            .await
            .map_err(|source| ReconcileError::Persist {
                service: self.plan.service_name.clone(),
                source,
            })
    }

    /// Drive the plan to completion, publishing a snapshot after every tick
    pub async fn run(mut self, snapshot: watch::Sender<TrafficPlan>, mut shutdown: ShutdownSignal) {
        let _ = snapshot.send(self.plan.clone());
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.plan.config.tick_interval_seconds.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!(service = %self.plan.service_name, "reconcile loop stopping for shutdown");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(outcome) => {
                            let _ = snapshot.send(self.plan.clone());
                            if outcome == TickOutcome::Terminal {
                                info!(
                                    service = %self.plan.service_name,
                                    status = ?self.plan.status,
                                    "rollout finished"
                                );
                                break;
                            }
                        }
                        // Transient read or persist failure: log and try
                        // again next tick rather than killing the loop.
                        Err(error) => {
                            warn!(service = %self.plan.service_name, error = %error, "tick failed");
                            let _ = snapshot.send(self.plan.clone());
                        }
                    }
                }
            }
        }

        self.metrics.plan_finished();
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped at the configured max
fn backoff_delay(retry: &crate::plan::RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let seconds = retry
        .base_delay_seconds
        .saturating_mul(1u64 << exponent)
        .min(retry.max_delay_seconds);
    Duration::from_secs(seconds)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "reconciler_test.rs"]
mod tests;
