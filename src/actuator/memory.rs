//! In-memory actuator for tests and dry runs
//!
//! Behaves like an orchestrator that converges instantly: scaling a pool
//! makes the new replicas ready in the same call. Tests can disable instant
//! convergence to exercise wait-for-ready paths, and can queue failures to
//! exercise the retry budget.

use super::{Ack, ActuationError, Actuator, ActuatorProvider, PoolState};
use crate::plan::{ConfigError, StepCommand, TrafficPlan};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MemoryState {
    pools: HashMap<String, PoolState>,
    weights: (i32, i32),
    applied: Vec<StepCommand>,
    queued_failures: VecDeque<ActuationError>,
    applies: usize,
    reads: usize,
}

pub struct InMemoryActuator {
    state: Mutex<MemoryState>,
    /// When true (the default) scaled replicas become ready immediately
    converge_instantly: bool,
}

impl Default for InMemoryActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryActuator {
    pub fn new() -> Self {
        InMemoryActuator {
            state: Mutex::new(MemoryState {
                weights: (100, 0),
                ..Default::default()
            }),
            converge_instantly: true,
        }
    }

    /// An actuator whose scaled replicas stay unready until `set_ready`
    pub fn with_slow_convergence() -> Self {
        InMemoryActuator {
            converge_instantly: false,
            ..Self::new()
        }
    }

    pub fn insert_pool(&self, name: &str, desired: i32, ready: i32, version: &str) {
        self.lock().pools.insert(
            name.to_string(),
            PoolState {
                desired_replicas: desired,
                ready_replicas: ready,
                version: version.to_string(),
            },
        );
    }

    pub fn set_ready(&self, name: &str, ready: i32) {
        if let Some(pool) = self.lock().pools.get_mut(name) {
            pool.ready_replicas = ready;
        }
    }

    /// Queue an error to be returned by the next `apply` calls, in order
    pub fn queue_failure(&self, error: ActuationError) {
        self.lock().queued_failures.push_back(error);
    }

    pub fn applied(&self) -> Vec<StepCommand> {
        self.lock().applied.clone()
    }

    /// Number of `apply` calls that reached the orchestrator (including failures)
    pub fn apply_count(&self) -> usize {
        self.lock().applies
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn weights(&self) -> (i32, i32) {
        self.lock().weights
    }

    pub fn pool(&self, name: &str) -> Option<PoolState> {
        self.lock().pools.get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Actuator for InMemoryActuator {
    async fn apply(&self, command: &StepCommand) -> Result<Ack, ActuationError> {
        let mut state = self.lock();
        state.applies += 1;

        if let Some(error) = state.queued_failures.pop_front() {
            return Err(error);
        }

        match command {
            StepCommand::ScalePool { pool, replicas } => {
                let entry = state
                    .pools
                    .get_mut(pool)
                    .ok_or_else(|| ActuationError::Rejected(format!("unknown pool {:?}", pool)))?;
                entry.desired_replicas = *replicas;
                if self.converge_instantly {
                    entry.ready_replicas = *replicas;
                }
            }
            StepCommand::SetTrafficWeight {
                source_weight,
                target_weight,
            } => {
                state.weights = (*source_weight, *target_weight);
            }
        }

        state.applied.push(command.clone());
        Ok(Ack)
    }

    async fn read_pool(&self, name: &str) -> Result<PoolState, ActuationError> {
        let mut state = self.lock();
        state.reads += 1;
        state
            .pools
            .get(name)
            .cloned()
            .ok_or_else(|| ActuationError::Rejected(format!("unknown pool {:?}", name)))
    }
}

/// Provider that hands out one shared actuator for every plan
pub struct StaticActuatorProvider {
    actuator: Arc<dyn Actuator>,
}

impl StaticActuatorProvider {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        StaticActuatorProvider { actuator }
    }
}

impl ActuatorProvider for StaticActuatorProvider {
    fn actuator_for(&self, _plan: &TrafficPlan) -> Result<Arc<dyn Actuator>, ConfigError> {
        Ok(self.actuator.clone())
    }
}
