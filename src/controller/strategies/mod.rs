//! Strategy drivers for traffic-shifting decisions
//!
//! A driver is a pure decision function: given the plan, the latest health
//! verdicts, and the current time, it returns the next step. The reconciler
//! owns all side effects (issuing commands, retrying, persisting), so the
//! same driver logic serves every loop and every test without mocking.

pub mod blue_green;
pub mod canary;

use crate::plan::{HealthStatus, PlanStatus, StepCommand, StrategyKind, TrafficPlan};
use chrono::{DateTime, Utc};

pub use blue_green::BlueGreenDriver;
pub use canary::CanaryDriver;

/// Health verdicts for both pools, computed from their sample windows
#[derive(Debug, Clone, Copy)]
pub struct HealthVerdict {
    pub source: HealthStatus,
    pub target: HealthStatus,
}

/// The outcome of one strategy decision
///
/// Commands are applied in order before any of the plan mutations are
/// committed; a decision with no commands and no mutations means "wait".
#[derive(Debug, Default)]
pub struct StepDecision {
    pub commands: Vec<StepCommand>,
    pub status: Option<PlanStatus>,
    pub step_index: Option<usize>,
    pub target_weight: Option<i32>,
    pub message: Option<String>,
    pub failure_reason: Option<String>,
}

impl StepDecision {
    /// A decision that changes nothing and issues nothing
    pub fn wait(message: impl Into<String>) -> Self {
        StepDecision {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn changes_plan(&self) -> bool {
        self.status.is_some() || self.step_index.is_some() || self.target_weight.is_some()
    }
}

/// Strategy contract shared by blue/green and canary
///
/// `next_step` must be pure: no side effects, and the same inputs always
/// produce the same decision.
pub trait StrategyDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn next_step(&self, plan: &TrafficPlan, health: &HealthVerdict, now: DateTime<Utc>)
        -> StepDecision;

    /// Whether the operator can skip the remaining soak for this strategy
    fn supports_manual_promotion(&self) -> bool;
}

/// Pick the driver for a plan's strategy kind
pub fn select_driver(kind: &StrategyKind) -> Box<dyn StrategyDriver> {
    match kind {
        StrategyKind::BlueGreen => Box::new(BlueGreenDriver),
        StrategyKind::Canary => Box::new(CanaryDriver),
    }
}

/// Has the plan stayed in its current state for the configured soak period?
pub(crate) fn soak_elapsed(plan: &TrafficPlan, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(plan.last_transition);
    elapsed.num_seconds() >= plan.config.soak_seconds as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_driver_by_kind() {
        assert_eq!(select_driver(&StrategyKind::BlueGreen).name(), "blue-green");
        assert_eq!(select_driver(&StrategyKind::Canary).name(), "canary");
    }

    #[test]
    fn test_manual_promotion_is_canary_only() {
        assert!(select_driver(&StrategyKind::Canary).supports_manual_promotion());
        assert!(!select_driver(&StrategyKind::BlueGreen).supports_manual_promotion());
    }

    #[test]
    fn test_wait_decision_changes_nothing() {
        let decision = StepDecision::wait("soaking");
        assert!(decision.commands.is_empty());
        assert!(!decision.changes_plan());
        assert_eq!(decision.message.as_deref(), Some("soaking"));
    }
}
