use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which strategy drives a rollout
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Two full environments, instant cutover
    BlueGreen,
    /// Progressive weight ramp through configured steps
    Canary,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::BlueGreen => "blue_green",
            StrategyKind::Canary => "canary",
        }
    }
}

/// Lifecycle state of a traffic plan
///
/// `Promoted` and `RolledBack` are terminal: once reached, the reconcile
/// loop stops and no further step commands are ever issued.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Promoted,
    RolledBack,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Promoted | PlanStatus::RolledBack)
    }
}

/// Health verdict for a pool, derived from its sample window
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Not enough samples yet to judge
    #[default]
    Unknown,
    Healthy,
    /// Some errors observed, but still under thresholds
    Degraded,
    /// Error rate or latency over thresholds
    Failed,
}

impl HealthStatus {
    /// Degraded still passes: thresholds decide, not individual failures.
    pub fn is_passing(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// A named, versioned replica group behind the traffic split
///
/// `desired_replicas` and `ready_replicas` are the orchestrator's view,
/// refreshed from the actuator read API at the top of every tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// Workload name in the orchestrator (e.g. the ReplicaSet name)
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub desired_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub health: HealthStatus,
}

impl Pool {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Pool {
            name: name.into(),
            version: version.into(),
            desired_replicas: 0,
            ready_replicas: 0,
            health: HealthStatus::Unknown,
        }
    }
}

/// A single imperative instruction handed to the actuator
///
/// Ephemeral: produced by a strategy driver during one tick, consumed
/// immediately, never persisted. Both variants are idempotent: reissuing
/// them with the same values is safe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepCommand {
    ScalePool { pool: String, replicas: i32 },
    SetTrafficWeight { source_weight: i32, target_weight: i32 },
}

impl StepCommand {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StepCommand::ScalePool { .. } => "scale_pool",
            StepCommand::SetTrafficWeight { .. } => "set_traffic_weight",
        }
    }
}

impl std::fmt::Display for StepCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepCommand::ScalePool { pool, replicas } => {
                write!(f, "scale {} to {} replicas", pool, replicas)
            }
            StepCommand::SetTrafficWeight {
                source_weight,
                target_weight,
            } => write!(f, "set traffic split {}/{}", source_weight, target_weight),
        }
    }
}

/// Health evaluation parameters for one rollout
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    /// Error rate over the window above which the pool is failed (0.0..=1.0)
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Latency p95 ceiling over the window, in milliseconds
    #[serde(default = "default_max_latency_p95_ms")]
    pub max_latency_p95_ms: f64,

    /// Sliding window capacity in samples
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Samples required before a verdict other than Unknown is given.
    /// This is the "sustained" guard: one bad probe never rolls back.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Per-probe timeout; a timed-out probe counts as a failed sample
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,

    /// Optional age bound on window samples: anything older is pruned, so
    /// the window is "last N samples, no older than T"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_max_age_seconds: Option<u64>,
}

fn default_max_error_rate() -> f64 {
    0.01
}
fn default_max_latency_p95_ms() -> f64 {
    500.0
}
fn default_window_size() -> usize {
    20
}
fn default_min_samples() -> usize {
    3
}
fn default_probe_timeout_seconds() -> u64 {
    2
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            max_error_rate: default_max_error_rate(),
            max_latency_p95_ms: default_max_latency_p95_ms(),
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
            sample_max_age_seconds: None,
        }
    }
}

/// Retry budget for actuation failures
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: u64,

    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,

    /// Total attempts including the first; exhausting the budget is fatal
    /// and transitions the plan to `rolled_back`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_seconds() -> u64 {
    2
}
fn default_max_delay_seconds() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Traffic routing coordinates for the Kubernetes actuator
///
/// Passed explicitly instead of relying on ambient kubectl context.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Namespace holding the workloads and the HTTPRoute.
    /// Empty means "use the controller's default namespace".
    #[serde(default)]
    pub namespace: String,

    /// Name of the HTTPRoute whose backend weights are patched
    pub http_route: String,

    /// Service selecting source pods (first backend ref)
    pub source_service: String,

    /// Service selecting target pods (second backend ref)
    pub target_service: String,

    #[serde(default = "default_port")]
    pub port: i32,
}

fn default_port() -> i32 {
    80
}

/// Per-rollout configuration, validated at start time
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutConfig {
    /// Total desired replicas across both pools
    pub total_replicas: i32,

    /// Canary weight ladder; ignored by blue/green
    #[serde(default = "default_steps")]
    pub steps: Vec<i32>,

    /// How long a pool must stay healthy before advancing or promoting
    #[serde(default = "default_soak_seconds")]
    pub soak_seconds: u64,

    /// Reconcile interval
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Health-check URL for the source pool
    pub source_endpoint: String,

    /// Health-check URL for the target pool
    pub target_endpoint: String,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Required when actuating against Kubernetes; omitted in dry runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RouteConfig>,
}

pub fn default_steps() -> Vec<i32> {
    vec![25, 50, 75, 100]
}
fn default_soak_seconds() -> u64 {
    60
}
fn default_tick_interval_seconds() -> u64 {
    10
}

/// Replica share for the target pool at a given weight, rounded up.
///
/// Rounding up biases capacity toward the canary so regressions surface
/// early; the source share is always `total - target_share`, which keeps
/// the combined count exact.
pub fn target_share(weight: i32, total: i32) -> i32 {
    (weight * total + 99) / 100
}

/// Replica share left for the source pool at a given weight
pub fn source_share(weight: i32, total: i32) -> i32 {
    total - target_share(weight, total)
}

/// The persisted record of one rollout
///
/// Owned exclusively by its reconcile loop; readers see point-in-time
/// snapshots. Contains everything needed to resume after a restart without
/// repeating destructive steps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPlan {
    pub service_name: String,
    pub strategy: StrategyKind,
    pub source: Pool,
    pub target: Pool,

    /// Share of traffic on the target pool; the source always carries the
    /// complement, so `source_weight() + target_weight == 100` at every
    /// observed instant.
    #[serde(default)]
    pub target_weight: i32,

    pub status: PlanStatus,

    /// Current canary step index; None for blue/green and before the first step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,

    /// When the plan last changed state (weight, step, or status).
    /// Soak periods are measured from here.
    #[serde(rename = "lastTransitionTimestamp")]
    pub last_transition: DateTime<Utc>,

    /// Human-readable summary of the latest decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Diagnostic reason attached when the plan rolled back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Operator asked to skip the remaining soak (canary only)
    #[serde(default)]
    pub promote_requested: bool,

    pub config: RolloutConfig,
}

impl TrafficPlan {
    pub fn new(
        service_name: impl Into<String>,
        strategy: StrategyKind,
        source: Pool,
        target: Pool,
        config: RolloutConfig,
        now: DateTime<Utc>,
    ) -> Self {
        TrafficPlan {
            service_name: service_name.into(),
            strategy,
            source,
            target,
            target_weight: 0,
            status: PlanStatus::Pending,
            step_index: None,
            last_transition: now,
            message: None,
            failure_reason: None,
            promote_requested: false,
            config,
        }
    }

    pub fn source_weight(&self) -> i32 {
        100 - self.target_weight
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Weight of the current canary step, if any
    pub fn current_step_weight(&self) -> Option<i32> {
        self.step_index
            .and_then(|i| self.config.steps.get(i).copied())
    }
}
