//! Canary strategy driver
//!
//! Walks the configured weight ladder one step per soak period. At every
//! step the target pool is sized proportionally to its share of traffic
//! (rounded up, source keeps the remainder) before the weight moves, so no
//! pool ever serves more traffic than it has replicas for. A failed health
//! verdict at any step rolls all traffic back to the source in one tick.

use super::{soak_elapsed, HealthVerdict, StepDecision, StrategyDriver};
use crate::plan::{
    source_share, target_share, HealthStatus, PlanStatus, StepCommand, TrafficPlan,
};
use chrono::{DateTime, Utc};

pub struct CanaryDriver;

impl CanaryDriver {
    fn rollback(plan: &TrafficPlan, step_index: usize, weight: i32) -> StepDecision {
        let mut commands = Vec::new();
        if plan.target_weight > 0 {
            commands.push(StepCommand::SetTrafficWeight {
                source_weight: 100,
                target_weight: 0,
            });
        }
        commands.push(StepCommand::ScalePool {
            pool: plan.target.name.clone(),
            replicas: 0,
        });

        StepDecision {
            commands,
            status: Some(PlanStatus::RolledBack),
            target_weight: Some(0),
            failure_reason: Some(format!(
                "health check failed at step {} ({}% traffic)",
                step_index, weight
            )),
            ..Default::default()
        }
    }

    fn ramp(&self, plan: &TrafficPlan, health: &HealthVerdict, now: DateTime<Utc>) -> StepDecision {
        let steps = &plan.config.steps;
        let total = plan.config.total_replicas;
        let step_index = plan.step_index.unwrap_or(0);
        let weight = plan.current_step_weight().unwrap_or(0);
        let t_share = target_share(weight, total);
        let s_share = source_share(weight, total);

        if health.target == HealthStatus::Failed {
            return Self::rollback(plan, step_index, weight);
        }

        // Capacity before traffic: the target must be sized and ready for
        // this step's share before its weight moves.
        if plan.target.desired_replicas != t_share {
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.target.name.clone(),
                    replicas: t_share,
                }],
                message: Some(format!(
                    "scaling {} to {} replicas for {}% traffic",
                    plan.target.name, t_share, weight
                )),
                ..Default::default()
            };
        }

        if plan.target.ready_replicas < t_share {
            return StepDecision::wait(format!(
                "waiting for {} readiness ({}/{} ready)",
                plan.target.name, plan.target.ready_replicas, t_share
            ));
        }

        if plan.target_weight != weight {
            return StepDecision {
                commands: vec![StepCommand::SetTrafficWeight {
                    source_weight: 100 - weight,
                    target_weight: weight,
                }],
                target_weight: Some(weight),
                message: Some(format!(
                    "shifted {}% of traffic to {}",
                    weight, plan.target.name
                )),
                ..Default::default()
            };
        }

        // Weight is in place; shrink the source to its remaining share.
        if plan.source.desired_replicas != s_share {
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.source.name.clone(),
                    replicas: s_share,
                }],
                message: Some(format!(
                    "scaling {} down to {} replicas",
                    plan.source.name, s_share
                )),
                ..Default::default()
            };
        }

        // Advance only once the step has soaked cleanly, or the operator
        // asked to skip the remaining soak.
        if plan.promote_requested || (health.target == HealthStatus::Healthy && soak_elapsed(plan, now))
        {
            if weight == 100 {
                return StepDecision {
                    commands: vec![StepCommand::ScalePool {
                        pool: plan.source.name.clone(),
                        replicas: 0,
                    }],
                    status: Some(PlanStatus::Promoted),
                    message: Some(format!(
                        "ramp complete; promoted {} and retired {}",
                        plan.target.name, plan.source.name
                    )),
                    ..Default::default()
                };
            }

            let next_index = step_index + 1;
            let next_weight = steps[next_index];
            let next_share = target_share(next_weight, total);
            return StepDecision {
                commands: vec![StepCommand::ScalePool {
                    pool: plan.target.name.clone(),
                    replicas: next_share,
                }],
                step_index: Some(next_index),
                message: Some(format!(
                    "advancing to step {} ({}% traffic)",
                    next_index, next_weight
                )),
                ..Default::default()
            };
        }

        StepDecision::wait(format!("soaking at {}% traffic", weight))
    }
}

impl StrategyDriver for CanaryDriver {
    fn name(&self) -> &'static str {
        "canary"
    }

    fn next_step(
        &self,
        plan: &TrafficPlan,
        health: &HealthVerdict,
        now: DateTime<Utc>,
    ) -> StepDecision {
        match plan.status {
            PlanStatus::Pending => {
                let first_weight = plan.config.steps.first().copied().unwrap_or(100);
                let first_share = target_share(first_weight, plan.config.total_replicas);
                StepDecision {
                    commands: vec![StepCommand::ScalePool {
                        pool: plan.target.name.clone(),
                        replicas: first_share,
                    }],
                    status: Some(PlanStatus::InProgress),
                    step_index: Some(0),
                    message: Some(format!(
                        "scaling {} to {} replicas for {}% traffic",
                        plan.target.name, first_share, first_weight
                    )),
                    ..Default::default()
                }
            }
            PlanStatus::InProgress => self.ramp(plan, health, now),
            PlanStatus::Promoted | PlanStatus::RolledBack => StepDecision::default(),
        }
    }

    fn supports_manual_promotion(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plan::{HealthConfig, Pool, RetryConfig, RolloutConfig, StrategyKind};
    use chrono::Utc;

    fn canary_plan(steps: Vec<i32>, total: i32) -> TrafficPlan {
        let config = RolloutConfig {
            total_replicas: total,
            steps,
            soak_seconds: 60,
            tick_interval_seconds: 10,
            source_endpoint: "http://stable/healthz".to_string(),
            target_endpoint: "http://canary/healthz".to_string(),
            health: HealthConfig::default(),
            retry: RetryConfig::default(),
            routing: None,
        };
        let mut source = Pool::new("web-stable", "v1");
        source.desired_replicas = total;
        source.ready_replicas = total;

        TrafficPlan::new(
            "web",
            StrategyKind::Canary,
            source,
            Pool::new("web-canary", "v2"),
            config,
            Utc::now(),
        )
    }

    /// Put the plan mid-ramp at the given step, with both pools converged
    /// on that step's shares and the weight already applied.
    fn at_step(mut plan: TrafficPlan, step_index: usize) -> TrafficPlan {
        let weight = plan.config.steps[step_index];
        let total = plan.config.total_replicas;
        plan.status = PlanStatus::InProgress;
        plan.step_index = Some(step_index);
        plan.target_weight = weight;
        plan.target.desired_replicas = target_share(weight, total);
        plan.target.ready_replicas = plan.target.desired_replicas;
        plan.source.desired_replicas = source_share(weight, total);
        plan.source.ready_replicas = plan.source.desired_replicas;
        plan
    }

    fn healthy() -> HealthVerdict {
        HealthVerdict {
            source: HealthStatus::Healthy,
            target: HealthStatus::Healthy,
        }
    }

    #[test]
    fn test_pending_scales_target_for_first_step() {
        let plan = canary_plan(vec![25, 50, 100], 4);
        let decision = CanaryDriver.next_step(&plan, &healthy(), Utc::now());

        // 25% of 4 replicas rounds up to 1.
        assert_eq!(
            decision.commands,
            vec![StepCommand::ScalePool {
                pool: "web-canary".to_string(),
                replicas: 1,
            }]
        );
        assert_eq!(decision.status, Some(PlanStatus::InProgress));
        assert_eq!(decision.step_index, Some(0));
    }

    #[test]
    fn test_weight_waits_for_target_readiness() {
        let mut plan = canary_plan(vec![25, 50, 100], 4);
        plan.status = PlanStatus::InProgress;
        plan.step_index = Some(0);
        plan.target.desired_replicas = 1;
        plan.target.ready_replicas = 0;

        let decision = CanaryDriver.next_step(&plan, &healthy(), Utc::now());
        assert!(decision.commands.is_empty());
        assert_eq!(decision.target_weight, None);
    }

    #[test]
    fn test_weight_shifts_once_target_ready() {
        let mut plan = canary_plan(vec![25, 50, 100], 4);
        plan.status = PlanStatus::InProgress;
        plan.step_index = Some(0);
        plan.target.desired_replicas = 1;
        plan.target.ready_replicas = 1;

        let decision = CanaryDriver.next_step(&plan, &healthy(), Utc::now());
        assert_eq!(
            decision.commands,
            vec![StepCommand::SetTrafficWeight {
                source_weight: 75,
                target_weight: 25,
            }]
        );
        assert_eq!(decision.target_weight, Some(25));
    }

    #[test]
    fn test_source_shrinks_after_weight_applied() {
        let mut plan = canary_plan(vec![25, 50, 100], 4);
        plan.status = PlanStatus::InProgress;
        plan.step_index = Some(0);
        plan.target_weight = 25;
        plan.target.desired_replicas = 1;
        plan.target.ready_replicas = 1;

        let decision = CanaryDriver.next_step(&plan, &healthy(), Utc::now());
        // Source keeps total minus the target's rounded-up share: 4 - 1 = 3.
        assert_eq!(
            decision.commands,
            vec![StepCommand::ScalePool {
                pool: "web-stable".to_string(),
                replicas: 3,
            }]
        );
    }

    #[test]
    fn test_soak_gates_step_advance() {
        let plan = at_step(canary_plan(vec![25, 50, 100], 4), 0);

        let midway = plan.last_transition + chrono::Duration::seconds(30);
        let decision = CanaryDriver.next_step(&plan, &healthy(), midway);
        assert!(decision.commands.is_empty());
        assert!(!decision.changes_plan());

        let done = plan.last_transition + chrono::Duration::seconds(61);
        let decision = CanaryDriver.next_step(&plan, &healthy(), done);
        assert_eq!(decision.step_index, Some(1));
        // 50% of 4 replicas is 2.
        assert_eq!(
            decision.commands,
            vec![StepCommand::ScalePool {
                pool: "web-canary".to_string(),
                replicas: 2,
            }]
        );
    }

    #[test]
    fn test_promote_request_skips_remaining_soak() {
        let mut plan = at_step(canary_plan(vec![25, 50, 100], 4), 0);
        plan.promote_requested = true;

        // Well inside the soak period, yet the step advances.
        let decision = CanaryDriver.next_step(&plan, &healthy(), plan.last_transition);
        assert_eq!(decision.step_index, Some(1));
    }

    #[test]
    fn test_final_step_promotes_and_retires_source() {
        let plan = at_step(canary_plan(vec![25, 50, 100], 4), 2);

        let done = plan.last_transition + chrono::Duration::seconds(61);
        let decision = CanaryDriver.next_step(&plan, &healthy(), done);
        assert_eq!(decision.status, Some(PlanStatus::Promoted));
        assert_eq!(
            decision.commands,
            vec![StepCommand::ScalePool {
                pool: "web-stable".to_string(),
                replicas: 0,
            }]
        );
    }

    #[test]
    fn test_failure_mid_ramp_rolls_all_traffic_back() {
        let plan = at_step(canary_plan(vec![25, 50, 100], 4), 1);

        let verdict = HealthVerdict {
            source: HealthStatus::Healthy,
            target: HealthStatus::Failed,
        };
        let decision = CanaryDriver.next_step(&plan, &verdict, Utc::now());

        assert_eq!(
            decision.commands,
            vec![
                StepCommand::SetTrafficWeight {
                    source_weight: 100,
                    target_weight: 0,
                },
                StepCommand::ScalePool {
                    pool: "web-canary".to_string(),
                    replicas: 0,
                },
            ]
        );
        assert_eq!(decision.status, Some(PlanStatus::RolledBack));
        assert_eq!(decision.target_weight, Some(0));
        assert_eq!(
            decision.failure_reason.as_deref(),
            Some("health check failed at step 1 (50% traffic)")
        );
    }

    #[test]
    fn test_failure_before_any_weight_skips_traffic_command() {
        let mut plan = canary_plan(vec![25, 50, 100], 4);
        plan.status = PlanStatus::InProgress;
        plan.step_index = Some(0);
        plan.target.desired_replicas = 1;
        plan.target.ready_replicas = 1;

        let verdict = HealthVerdict {
            source: HealthStatus::Healthy,
            target: HealthStatus::Failed,
        };
        let decision = CanaryDriver.next_step(&plan, &verdict, Utc::now());

        // Weight never moved, so only the scale-down is issued.
        assert_eq!(
            decision.commands,
            vec![StepCommand::ScalePool {
                pool: "web-canary".to_string(),
                replicas: 0,
            }]
        );
        assert_eq!(decision.status, Some(PlanStatus::RolledBack));
    }

    #[test]
    fn test_rounding_favors_target_on_odd_totals() {
        // 50% of 3 replicas: target rounds up to 2, source keeps 1.
        let plan = at_step(canary_plan(vec![50, 100], 3), 0);
        assert_eq!(plan.target.desired_replicas, 2);
        assert_eq!(plan.source.desired_replicas, 1);
        assert_eq!(
            plan.target.desired_replicas + plan.source.desired_replicas,
            3
        );
    }

    #[test]
    fn test_degraded_target_soaks_without_advancing() {
        let plan = at_step(canary_plan(vec![25, 50, 100], 4), 0);

        let verdict = HealthVerdict {
            source: HealthStatus::Healthy,
            target: HealthStatus::Degraded,
        };
        // Soak elapsed, but a degraded verdict is not healthy enough to
        // advance; it is also not failed, so no rollback.
        let done = plan.last_transition + chrono::Duration::seconds(61);
        let decision = CanaryDriver.next_step(&plan, &verdict, done);
        assert!(decision.commands.is_empty());
        assert_eq!(decision.status, None);
    }
}
