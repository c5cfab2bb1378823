//! Traffic plan data model and rollout configuration
//!
//! A `TrafficPlan` is the declarative record of one rollout: which two pools
//! are involved, how traffic is currently split, and where the rollout is in
//! its lifecycle (`pending → in_progress → {promoted | rolled_back}`).

pub mod model;
pub mod validation;

pub use model::*;
pub use validation::{parse_duration, validate_config, validate_service_name, ConfigError};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "model_test.rs"]
mod tests;
