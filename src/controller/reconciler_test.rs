use super::*;
use crate::actuator::memory::InMemoryActuator;
use crate::controller::clock::MockClock;
use crate::controller::health::ScriptedProber;
use crate::controller::strategies::select_driver;
use crate::plan::{
    HealthConfig, Pool, RetryConfig, RolloutConfig, StrategyKind, TrafficPlan,
};
use crate::server::metrics::create_metrics;
use crate::store::{MemoryPlanStore, PlanStore};
use chrono::Utc;

/// A reconciler wired to in-memory fakes, plus handles to drive them
struct Fixture {
    reconciler: Reconciler,
    actuator: Arc<InMemoryActuator>,
    prober: Arc<ScriptedProber>,
    store: Arc<MemoryPlanStore>,
    clock: Arc<MockClock>,
    controls: PlanControls,
}

fn test_config(total: i32, steps: Vec<i32>, soak_seconds: u64) -> RolloutConfig {
    RolloutConfig {
        total_replicas: total,
        steps,
        soak_seconds,
        tick_interval_seconds: 1,
        source_endpoint: "http://stable/healthz".to_string(),
        target_endpoint: "http://canary/healthz".to_string(),
        // One sample is enough for a verdict in these tests; the sustained
        // guard has its own coverage in the health module.
        health: HealthConfig {
            min_samples: 1,
            ..Default::default()
        },
        retry: RetryConfig::default(),
        routing: None,
    }
}

fn fixture(strategy: StrategyKind, config: RolloutConfig) -> Fixture {
    let (source_name, target_name) = match strategy {
        StrategyKind::BlueGreen => ("web-blue", "web-green"),
        StrategyKind::Canary => ("web-stable", "web-canary"),
    };

    let actuator = Arc::new(InMemoryActuator::new());
    actuator.insert_pool(source_name, config.total_replicas, config.total_replicas, "v1");
    actuator.insert_pool(target_name, 0, 0, "v2");

    let prober = Arc::new(ScriptedProber::always_healthy());
    let store = Arc::new(MemoryPlanStore::new());
    let clock = Arc::new(MockClock::new(Utc::now()));
    let controls = PlanControls::new();

    let plan = TrafficPlan::new(
        "web",
        strategy,
        Pool::new(source_name, "v1"),
        Pool::new(target_name, "v2"),
        config,
        clock.now(),
    );

    let reconciler = Reconciler::new(
        plan,
        select_driver(&strategy),
        actuator.clone(),
        prober.clone(),
        store.clone(),
        clock.clone(),
        controls.clone(),
        create_metrics().expect("metrics registry"),
    );

    Fixture {
        reconciler,
        actuator,
        prober,
        store,
        clock,
        controls,
    }
}

fn blue_green() -> Fixture {
    fixture(StrategyKind::BlueGreen, test_config(3, vec![], 0))
}

fn canary(steps: Vec<i32>, soak_seconds: u64) -> Fixture {
    fixture(StrategyKind::Canary, test_config(4, steps, soak_seconds))
}

#[tokio::test]
async fn test_blue_green_promotes_in_three_ticks() {
    let mut f = blue_green();

    // Tick 1: scale the green pool up.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.reconciler.plan().status, PlanStatus::InProgress);
    assert_eq!(f.actuator.pool("web-green").unwrap().desired_replicas, 3);
    assert_eq!(f.actuator.weights(), (100, 0));

    // Tick 2: green is ready and healthy, cut all traffic over.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.reconciler.plan().target_weight, 100);
    assert_eq!(f.actuator.weights(), (0, 100));

    // Tick 3: soak (zero here) has elapsed, promote and retire blue.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    assert_eq!(f.reconciler.plan().status, PlanStatus::Promoted);
    assert_eq!(f.actuator.pool("web-blue").unwrap().desired_replicas, 0);
}

#[tokio::test]
async fn test_blue_green_soak_gates_promotion() {
    let mut f = fixture(StrategyKind::BlueGreen, test_config(3, vec![], 120));

    f.reconciler.tick().await.unwrap();
    f.reconciler.tick().await.unwrap();
    assert_eq!(f.reconciler.plan().target_weight, 100);

    // Still soaking: nothing applied, nothing changed.
    let applies_before = f.actuator.apply_count();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Waited);
    assert_eq!(f.actuator.apply_count(), applies_before);

    f.clock.advance(chrono::Duration::seconds(121));
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    assert_eq!(f.reconciler.plan().status, PlanStatus::Promoted);
}

#[tokio::test]
async fn test_canary_ramps_and_rolls_back_on_failure_at_fifty_percent() {
    let mut f = canary(vec![25, 50, 100], 0);
    // Healthy for the ramp to 50%, failing from there on.
    f.prober.script_pool("web-canary", std::iter::repeat(true).take(6));
    f.prober.fail_pool_forever("web-canary");

    let mut seen_weights = Vec::new();
    for _ in 0..12 {
        let outcome = f.reconciler.tick().await.unwrap();
        let (source, target) = f.actuator.weights();
        assert_eq!(source + target, 100, "weights must always sum to 100");
        seen_weights.push(target);
        if outcome == TickOutcome::Terminal {
            break;
        }
    }

    let plan = f.reconciler.plan();
    assert_eq!(plan.status, PlanStatus::RolledBack);
    assert_eq!(plan.target_weight, 0);
    assert_eq!(
        plan.failure_reason.as_deref(),
        Some("health check failed at step 1 (50% traffic)")
    );

    // Traffic walked up the ladder and never overshot the failing step.
    assert!(seen_weights.contains(&25));
    assert!(seen_weights.contains(&50));
    assert!(seen_weights.iter().all(|w| *w <= 50));
    assert_eq!(*seen_weights.last().unwrap(), 0);

    // The canary pool is retired; the source got all traffic back.
    assert_eq!(f.actuator.weights(), (100, 0));
    assert_eq!(f.actuator.pool("web-canary").unwrap().desired_replicas, 0);
}

#[tokio::test]
async fn test_canary_completes_full_ramp() {
    let mut f = canary(vec![25, 50, 100], 0);

    let mut outcome = TickOutcome::Waited;
    for _ in 0..20 {
        outcome = f.reconciler.tick().await.unwrap();
        if outcome == TickOutcome::Terminal {
            break;
        }
    }

    assert_eq!(outcome, TickOutcome::Terminal);
    assert_eq!(f.reconciler.plan().status, PlanStatus::Promoted);
    assert_eq!(f.actuator.weights(), (0, 100));
    assert_eq!(f.actuator.pool("web-stable").unwrap().desired_replicas, 0);
    assert_eq!(f.actuator.pool("web-canary").unwrap().desired_replicas, 4);
}

#[tokio::test]
async fn test_capacity_precedes_traffic_at_every_step() {
    let mut f = canary(vec![25, 50, 100], 0);

    for _ in 0..20 {
        if f.reconciler.tick().await.unwrap() == TickOutcome::Terminal {
            break;
        }
        // Whenever weight moved, the canary pool must already hold enough
        // ready replicas for that share of traffic.
        let (_, target_weight) = f.actuator.weights();
        let ready = f.actuator.pool("web-canary").unwrap().ready_replicas;
        let needed = crate::plan::target_share(target_weight, 4);
        assert!(
            ready >= needed,
            "weight {} with only {} ready replicas",
            target_weight,
            ready
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let mut f = blue_green();
    for _ in 0..3 {
        f.actuator
            .queue_failure(ActuationError::Transient("api unavailable".to_string()));
    }

    // The first tick's scale command fails three times, then lands.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.actuator.apply_count(), 4);
    assert_eq!(f.reconciler.plan().status, PlanStatus::InProgress);
    assert_eq!(f.actuator.pool("web-green").unwrap().desired_replicas, 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retry_budget_rolls_back() {
    let mut f = fixture(
        StrategyKind::BlueGreen,
        RolloutConfig {
            retry: RetryConfig {
                base_delay_seconds: 1,
                max_delay_seconds: 4,
                max_attempts: 2,
            },
            ..test_config(3, vec![], 0)
        },
    );
    for _ in 0..2 {
        f.actuator
            .queue_failure(ActuationError::Transient("api unavailable".to_string()));
    }

    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    let plan = f.reconciler.plan();
    assert_eq!(plan.status, PlanStatus::RolledBack);
    assert!(plan
        .failure_reason
        .as_deref()
        .unwrap()
        .starts_with("actuation failed:"));
    assert_eq!(f.actuator.apply_count(), 2);
}

#[tokio::test]
async fn test_rejected_command_fails_without_retry() {
    let mut f = blue_green();
    f.actuator
        .queue_failure(ActuationError::Rejected("no such resource".to_string()));

    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    assert_eq!(f.reconciler.plan().status, PlanStatus::RolledBack);
    assert_eq!(f.actuator.apply_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_refreshes_pools_before_retrying() {
    let mut f = blue_green();
    f.actuator
        .queue_failure(ActuationError::Conflict("resource version stale".to_string()));

    let reads_before = f.actuator.read_count();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);

    // Tick refresh reads two pools; the conflict forces two more.
    assert!(f.actuator.read_count() >= reads_before + 4);
    assert_eq!(f.reconciler.plan().status, PlanStatus::InProgress);
}

#[tokio::test]
async fn test_abort_rolls_back_on_the_next_tick() {
    let mut f = blue_green();
    f.reconciler.tick().await.unwrap();
    f.reconciler.tick().await.unwrap();
    assert_eq!(f.reconciler.plan().target_weight, 100);

    f.controls.request_abort();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);

    let plan = f.reconciler.plan();
    assert_eq!(plan.status, PlanStatus::RolledBack);
    assert_eq!(plan.target_weight, 0);
    assert_eq!(
        plan.failure_reason.as_deref(),
        Some("rollout aborted by operator")
    );
    assert_eq!(f.actuator.weights(), (100, 0));
    assert_eq!(f.actuator.pool("web-green").unwrap().desired_replicas, 0);
}

#[tokio::test]
async fn test_abort_before_any_traffic_skips_weight_command() {
    let mut f = blue_green();
    f.reconciler.tick().await.unwrap();

    f.controls.request_abort();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);

    // Only the scale-down was applied; the split was never touched.
    assert_eq!(f.actuator.weights(), (100, 0));
    assert!(!f
        .actuator
        .applied()
        .iter()
        .any(|c| matches!(c, StepCommand::SetTrafficWeight { .. })));
}

#[tokio::test]
async fn test_promote_skips_remaining_soak_once() {
    let mut f = canary(vec![50, 100], 3600);

    // Converge on the first step: scale up, shift weight, shrink source.
    for _ in 0..3 {
        f.reconciler.tick().await.unwrap();
    }
    assert_eq!(f.reconciler.plan().target_weight, 50);
    assert_eq!(f.reconciler.plan().step_index, Some(0));

    // Soak is an hour; without a promote request nothing moves.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Waited);

    f.controls.request_promote();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.reconciler.plan().step_index, Some(1));

    // The request was consumed: the next step soaks normally again.
    assert!(!f.controls.promote_requested());
    f.reconciler.tick().await.unwrap(); // weight to 100
    f.reconciler.tick().await.unwrap(); // source to 0... still gated
    assert_ne!(f.reconciler.plan().status, PlanStatus::Promoted);
}

#[tokio::test]
async fn test_promote_requested_during_convergence_is_not_lost() {
    let mut f = canary(vec![50, 100], 3600);

    // Tick 1 scales the canary up; the operator promotes while the step is
    // still converging.
    f.reconciler.tick().await.unwrap();
    f.controls.request_promote();

    // The weight shift and the source shrink both change the plan, but
    // neither acts on the request, so it must survive them.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert!(f.controls.promote_requested());
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.reconciler.plan().target_weight, 50);
    assert!(f.controls.promote_requested());

    // With the step converged, the pending request skips the hour-long soak
    // and is consumed by the advance.
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Acted);
    assert_eq!(f.reconciler.plan().step_index, Some(1));
    assert!(!f.controls.promote_requested());
}

#[tokio::test]
async fn test_missing_pool_terminates_the_plan() {
    let actuator = Arc::new(InMemoryActuator::new());
    actuator.insert_pool("web-blue", 3, 3, "v1");
    // web-green was never created in the orchestrator.

    let clock = Arc::new(MockClock::new(Utc::now()));
    let plan = TrafficPlan::new(
        "web",
        StrategyKind::BlueGreen,
        Pool::new("web-blue", "v1"),
        Pool::new("web-green", "v2"),
        test_config(3, vec![], 0),
        clock.now(),
    );
    let store = Arc::new(MemoryPlanStore::new());
    let mut reconciler = Reconciler::new(
        plan,
        select_driver(&StrategyKind::BlueGreen),
        actuator,
        Arc::new(ScriptedProber::always_healthy()),
        store.clone(),
        clock,
        PlanControls::new(),
        create_metrics().expect("metrics registry"),
    );

    // The read API rejects the unknown pool; that cannot heal, so the very
    // first tick ends the plan instead of erroring forever.
    assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    let plan = reconciler.plan();
    assert_eq!(plan.status, PlanStatus::RolledBack);
    assert!(plan.failure_reason.as_deref().unwrap().contains("web-green"));

    // The terminal state was persisted and later ticks stay inert.
    let saved = store.load("web").await.unwrap().expect("saved on failure");
    assert_eq!(saved.status, PlanStatus::RolledBack);
    assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Terminal);
}

#[tokio::test]
async fn test_terminal_plan_ticks_are_inert() {
    let mut f = blue_green();
    for _ in 0..3 {
        f.reconciler.tick().await.unwrap();
    }
    assert_eq!(f.reconciler.plan().status, PlanStatus::Promoted);

    let applies = f.actuator.apply_count();
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Terminal);
    assert_eq!(f.actuator.apply_count(), applies);
}

#[tokio::test]
async fn test_waiting_ticks_issue_no_commands() {
    let mut f = fixture(StrategyKind::BlueGreen, test_config(3, vec![], 600));
    f.reconciler.tick().await.unwrap();
    f.reconciler.tick().await.unwrap();

    // Mid-soak: repeated ticks must not touch the orchestrator.
    let applies = f.actuator.apply_count();
    for _ in 0..5 {
        assert_eq!(f.reconciler.tick().await.unwrap(), TickOutcome::Waited);
    }
    assert_eq!(f.actuator.apply_count(), applies);
}

#[tokio::test]
async fn test_every_state_change_is_persisted() {
    let mut f = blue_green();

    f.reconciler.tick().await.unwrap();
    let saved = f.store.load("web").await.unwrap().expect("saved after tick");
    assert_eq!(saved.status, PlanStatus::InProgress);

    f.reconciler.tick().await.unwrap();
    let saved = f.store.load("web").await.unwrap().expect("saved after tick");
    assert_eq!(saved.target_weight, 100);

    f.reconciler.tick().await.unwrap();
    let saved = f.store.load("web").await.unwrap().expect("saved after tick");
    assert_eq!(saved.status, PlanStatus::Promoted);
}

#[tokio::test]
async fn test_unhealthy_target_before_cutover_never_receives_traffic() {
    let mut f = blue_green();
    f.prober.fail_pool_forever("web-green");

    let mut outcome = TickOutcome::Waited;
    for _ in 0..5 {
        outcome = f.reconciler.tick().await.unwrap();
        assert_eq!(f.actuator.weights(), (100, 0));
        if outcome == TickOutcome::Terminal {
            break;
        }
    }

    assert_eq!(outcome, TickOutcome::Terminal);
    assert_eq!(f.reconciler.plan().status, PlanStatus::RolledBack);
    assert_eq!(f.actuator.pool("web-green").unwrap().desired_replicas, 0);
}
