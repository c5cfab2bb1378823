//! Rollout control plane
//!
//! The `manager` owns one `reconciler` loop per service; each loop asks a
//! `strategies` driver for decisions, judges pools through `health`, and
//! measures soak periods with `clock`.

pub mod clock;
pub mod health;
pub mod manager;
pub mod reconciler;
pub mod strategies;

pub use manager::{OperatorError, RolloutManager, StartRollout};
pub use reconciler::{PlanControls, ReconcileError, Reconciler, TickOutcome};
