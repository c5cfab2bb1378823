//! Prometheus metrics for the controller
//!
//! All metrics live on a private registry so tests never collide on the
//! global default. The registry is exposed in text format via `/metrics`.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,

    /// Reconcile ticks by strategy and outcome (acted / waited / terminal)
    ticks_total: IntCounterVec,

    /// Step commands applied, by command kind and result (ok / error)
    actuations_total: IntCounterVec,

    /// Retries spent on transient or conflicting actuation failures
    actuation_retries_total: IntCounter,

    /// Current target-pool traffic weight per service
    traffic_weight: IntGaugeVec,

    /// Reconcile loops currently running
    plans_active: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ticks_total = IntCounterVec::new(
            Opts::new("vaihto_ticks_total", "Reconcile ticks by strategy and outcome"),
            &["strategy", "outcome"],
        )?;
        let actuations_total = IntCounterVec::new(
            Opts::new(
                "vaihto_actuations_total",
                "Step commands applied, by kind and result",
            ),
            &["command", "result"],
        )?;
        let actuation_retries_total = IntCounter::new(
            "vaihto_actuation_retries_total",
            "Retries spent on failed actuation calls",
        )?;
        let traffic_weight = IntGaugeVec::new(
            Opts::new(
                "vaihto_target_traffic_weight",
                "Current target-pool traffic weight per service",
            ),
            &["service"],
        )?;
        let plans_active =
            IntGauge::new("vaihto_plans_active", "Reconcile loops currently running")?;

        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(actuations_total.clone()))?;
        registry.register(Box::new(actuation_retries_total.clone()))?;
        registry.register(Box::new(traffic_weight.clone()))?;
        registry.register(Box::new(plans_active.clone()))?;

        Ok(ControllerMetrics {
            registry,
            ticks_total,
            actuations_total,
            actuation_retries_total,
            traffic_weight,
            plans_active,
        })
    }

    pub fn record_tick(&self, strategy: &str, outcome: &str) {
        self.ticks_total.with_label_values(&[strategy, outcome]).inc();
    }

    pub fn record_actuation(&self, command: &str, result: &str) {
        self.actuations_total
            .with_label_values(&[command, result])
            .inc();
    }

    pub fn record_retry(&self) {
        self.actuation_retries_total.inc();
    }

    pub fn set_traffic_weight(&self, service: &str, weight: i32) {
        self.traffic_weight
            .with_label_values(&[service])
            .set(weight as i64);
    }

    pub fn plan_started(&self) {
        self.plans_active.inc();
    }

    pub fn plan_finished(&self) {
        self.plans_active.dec();
    }

    /// Encode the registry in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Build the shared metrics handle used across the controller
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}
