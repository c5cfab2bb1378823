//! Actuation seam between the reconciler and the external orchestrator
//!
//! The reconciler never talks to Kubernetes directly: it hands `StepCommand`s
//! to an `Actuator` and reads pool state back through it. `KubeActuator` is
//! the production adapter; `InMemoryActuator` backs tests and dry runs.

pub mod kube;
pub mod memory;

use crate::plan::{ConfigError, StepCommand, TrafficPlan};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure taxonomy for orchestration calls
///
/// `Rejected` is the only non-retryable kind: the request itself is invalid
/// (unknown pool, malformed patch) and retrying cannot help.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("transient orchestration error: {0}")]
    Transient(String),

    #[error("request rejected by orchestrator: {0}")]
    Rejected(String),

    #[error("conflicting concurrent modification: {0}")]
    Conflict(String),

    #[error("orchestration call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ActuationError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActuationError::Rejected(_))
    }

    /// Conflicts require a fresh read of observed state before retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, ActuationError::Conflict(_))
    }
}

/// Confirmation that a step command was accepted by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Observed state of one pool, as reported by the orchestrator's read API
#[derive(Debug, Clone, PartialEq)]
pub struct PoolState {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub version: String,
}

/// Applies computed steps against the external orchestration API
///
/// Implementations must be idempotent: applying a command whose values
/// already match observed state is a no-op on the orchestrator side.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn apply(&self, command: &StepCommand) -> Result<Ack, ActuationError>;

    async fn read_pool(&self, name: &str) -> Result<PoolState, ActuationError>;
}

/// Builds an actuator bound to one rollout's routing configuration
///
/// Plans for different services may route through different HTTPRoutes and
/// namespaces, so the manager asks for a per-plan actuator at start time.
pub trait ActuatorProvider: Send + Sync {
    fn actuator_for(&self, plan: &TrafficPlan) -> Result<Arc<dyn Actuator>, ConfigError>;
}
