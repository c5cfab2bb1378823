//! Blue/green strategy driver
//!
//! Scales the target pool to match the source, then performs an atomic
//! cutover: weight goes 0 to 100 in one step, never an intermediate split.
//! After the cutover the target soaks; sustained failure flips traffic
//! straight back, a clean soak retires the source pool.

use super::{soak_elapsed, HealthVerdict, StepDecision, StrategyDriver};
use crate::plan::{HealthStatus, PlanStatus, StepCommand, TrafficPlan};
use chrono::{DateTime, Utc};

pub struct BlueGreenDriver;

impl BlueGreenDriver {
    /// Replica count the target must reach before cutover: mirror the
    /// source's observed size, falling back to the configured total when
    /// the source has not been observed yet.
    fn match_replicas(plan: &TrafficPlan) -> i32 {
        if plan.source.desired_replicas > 0 {
            plan.source.desired_replicas
        } else {
            plan.config.total_replicas
        }
    }

    fn pre_cutover(&self, plan: &TrafficPlan, health: &HealthVerdict) -> StepDecision {
        let desired = Self::match_replicas(plan);

        if health.target == HealthStatus::Failed {
            // The new environment failed before ever taking traffic; there
            // is nothing to restore, just retire it.
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.target.name.clone(),
                    replicas: 0,
                }],
                status: Some(PlanStatus::RolledBack),
                failure_reason: Some(format!(
                    "target pool {} unhealthy before cutover",
                    plan.target.name
                )),
                ..Default::default()
            };
        }

        if plan.target.desired_replicas != desired {
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.target.name.clone(),
                    replicas: desired,
                }],
                message: Some(format!(
                    "scaling {} to {} replicas for cutover",
                    plan.target.name, desired
                )),
                ..Default::default()
            };
        }

        if plan.target.ready_replicas >= desired && health.target == HealthStatus::Healthy {
            return StepDecision {
                commands: vec![StepCommand::SetTrafficWeight {
                    source_weight: 0,
                    target_weight: 100,
                }],
                target_weight: Some(100),
                message: Some(format!("cutover: all traffic to {}", plan.target.name)),
                ..Default::default()
            };
        }

        StepDecision::wait(format!(
            "waiting for {} readiness ({}/{} ready)",
            plan.target.name, plan.target.ready_replicas, desired
        ))
    }

    fn post_cutover(
        &self,
        plan: &TrafficPlan,
        health: &HealthVerdict,
        now: DateTime<Utc>,
    ) -> StepDecision {
        if health.target == HealthStatus::Failed {
            // Sustained failure after cutover: restore the source instantly.
            return StepDecision {
                commands: vec![StepCommand::SetTrafficWeight {
                    source_weight: 100,
                    target_weight: 0,
                }],
                status: Some(PlanStatus::RolledBack),
                target_weight: Some(0),
                failure_reason: Some(format!(
                    "post-cutover health check failed for {}",
                    plan.target.name
                )),
                ..Default::default()
            };
        }

        if health.target == HealthStatus::Healthy && soak_elapsed(plan, now) {
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.source.name.clone(),
                    replicas: 0,
                }],
                status: Some(PlanStatus::Promoted),
                message: Some(format!(
                    "soak complete; promoted {} and retired {}",
                    plan.target.name, plan.source.name
                )),
                ..Default::default()
            };
        }

        StepDecision::wait(format!("soaking {} at 100% traffic", plan.target.name))
    }
}

impl StrategyDriver for BlueGreenDriver {
    fn name(&self) -> &'static str {
        "blue-green"
    }

    fn next_step(
        &self,
        plan: &TrafficPlan,
        health: &HealthVerdict,
        now: DateTime<Utc>,
    ) -> StepDecision {
        match plan.status {
            PlanStatus::Pending => {
                let desired = Self::match_replicas(plan);
                StepDecision {
                    commands: vec![StepCommand::ScalePool {
                        pool: plan.target.name.clone(),
                        replicas: desired,
                    }],
                    status: Some(PlanStatus::InProgress),
                    message: Some(format!(
                        "scaling {} to {} replicas for cutover",
                        plan.target.name, desired
                    )),
                    ..Default::default()
                }
            }
            PlanStatus::InProgress => {
                if plan.target_weight == 100 {
                    self.post_cutover(plan, health, now)
                } else {
                    self.pre_cutover(plan, health)
                }
            }
            // Terminal: the reconciler stops before asking, but stay inert.
            PlanStatus::Promoted | PlanStatus::RolledBack => StepDecision::default(),
        }
    }

    fn supports_manual_promotion(&self) -> bool {
        false
    }
}
