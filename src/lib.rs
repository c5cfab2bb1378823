//! vaihto: a deployment-strategy controller
//!
//! Manages blue/green cutovers and canary traffic ramps for services behind
//! an external orchestrator. Each rollout is a `TrafficPlan` driven by a
//! periodic reconcile loop: observe pool state, judge health, compute the
//! next step, actuate it, persist. Health regressions and operator aborts
//! roll all traffic back to the source pool.

pub mod actuator;
pub mod controller;
pub mod plan;
pub mod server;
pub mod store;
