//! Plan persistence
//!
//! One record per service. The reconciler saves after every state-changing
//! tick so a restarted controller resumes from the last persisted step
//! instead of starting over. `FilePlanStore` is the production backend;
//! `MemoryPlanStore` backs tests.

pub mod file;

use crate::plan::TrafficPlan;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub use file::FilePlanStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize plan for {service}: {source}")]
    Serialize {
        service: String,
        source: serde_json::Error,
    },

    #[error("failed to deserialize plan from {path}: {source}")]
    Deserialize {
        path: String,
        source: serde_json::Error,
    },
}

/// Durable record of plans, keyed by service name
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn save(&self, plan: &TrafficPlan) -> Result<(), StoreError>;

    async fn load(&self, service: &str) -> Result<Option<TrafficPlan>, StoreError>;

    /// All persisted plans, terminal ones included
    async fn list(&self) -> Result<Vec<TrafficPlan>, StoreError>;

    async fn remove(&self, service: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: Mutex<HashMap<String, TrafficPlan>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrafficPlan>> {
        match self.plans.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn save(&self, plan: &TrafficPlan) -> Result<(), StoreError> {
        self.lock().insert(plan.service_name.clone(), plan.clone());
        Ok(())
    }

    async fn load(&self, service: &str) -> Result<Option<TrafficPlan>, StoreError> {
        Ok(self.lock().get(service).cloned())
    }

    async fn list(&self) -> Result<Vec<TrafficPlan>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn remove(&self, service: &str) -> Result<(), StoreError> {
        self.lock().remove(service);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plan::{Pool, RolloutConfig, StrategyKind};
    use chrono::Utc;

    fn sample_plan(service: &str) -> TrafficPlan {
        let config = RolloutConfig {
            total_replicas: 3,
            steps: vec![25, 50, 100],
            soak_seconds: 60,
            tick_interval_seconds: 10,
            source_endpoint: "http://stable/healthz".to_string(),
            target_endpoint: "http://canary/healthz".to_string(),
            health: Default::default(),
            retry: Default::default(),
            routing: None,
        };
        TrafficPlan::new(
            service,
            StrategyKind::Canary,
            Pool::new(format!("{service}-stable"), "v1"),
            Pool::new(format!("{service}-canary"), "v2"),
            config,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryPlanStore::new();
        let plan = sample_plan("web");

        store.save(&plan).await.unwrap();
        let loaded = store.load("web").await.unwrap().expect("plan saved");
        assert_eq!(loaded, plan);

        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_save_overwrites() {
        let store = MemoryPlanStore::new();
        let mut plan = sample_plan("web");
        store.save(&plan).await.unwrap();

        plan.target_weight = 50;
        store.save(&plan).await.unwrap();

        let loaded = store.load("web").await.unwrap().expect("plan saved");
        assert_eq!(loaded.target_weight, 50);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_remove() {
        let store = MemoryPlanStore::new();
        store.save(&sample_plan("web")).await.unwrap();
        store.remove("web").await.unwrap();
        assert!(store.load("web").await.unwrap().is_none());
    }
}
