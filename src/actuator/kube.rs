//! Kubernetes actuator
//!
//! Scales ReplicaSets and patches Gateway API HTTPRoute backend weights.
//! All coordinates (namespace, route, service names) are passed explicitly
//! at construction; nothing is read from ambient kubectl state.

use super::{Ack, ActuationError, Actuator, ActuatorProvider, PoolState};
use crate::plan::{ConfigError, StepCommand, TrafficPlan};
use async_trait::async_trait;
use gateway_api::apis::standard::httproutes::HTTPRouteRulesBackendRefs;
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::api::{Api, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pool version label on the managed ReplicaSets
pub const VERSION_LABEL: &str = "vaihto.io/version";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicit coordinates for one rollout's orchestration objects
#[derive(Debug, Clone)]
pub struct KubeActuatorConfig {
    pub namespace: String,
    /// HTTPRoute whose first rule carries the weighted backend refs
    pub http_route: String,
    pub source_service: String,
    pub target_service: String,
    pub port: i32,
    /// Every API call is bounded by this; a timeout is its own error kind
    pub call_timeout: Duration,
}

pub struct KubeActuator {
    client: kube::Client,
    config: KubeActuatorConfig,
}

impl KubeActuator {
    pub fn new(client: kube::Client, config: KubeActuatorConfig) -> Self {
        KubeActuator { client, config }
    }

    fn replicasets(&self) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn httproutes(&self) -> Api<DynamicObject> {
        let ar = ApiResource {
            group: "gateway.networking.k8s.io".to_string(),
            version: "v1".to_string(),
            api_version: "gateway.networking.k8s.io/v1".to_string(),
            kind: "HTTPRoute".to_string(),
            plural: "httproutes".to_string(),
        };
        Api::namespaced_with(self.client.clone(), &self.config.namespace, &ar)
    }

    async fn scale_pool(&self, pool: &str, replicas: i32) -> Result<Ack, ActuationError> {
        let patch = serde_json::json!({
            "spec": { "replicas": replicas }
        });

        self.bounded(self.replicasets().patch(
            pool,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        ))
        .await?;

        info!(pool = %pool, replicas, "scaled pool");
        Ok(Ack)
    }

    async fn set_traffic_weight(
        &self,
        source_weight: i32,
        target_weight: i32,
    ) -> Result<Ack, ActuationError> {
        let backend_refs = self.weighted_backend_refs(source_weight, target_weight);
        let patch = serde_json::json!({
            "spec": {
                "rules": [{
                    "backendRefs": backend_refs
                }]
            }
        });

        self.bounded(self.httproutes().patch(
            &self.config.http_route,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        ))
        .await?;

        info!(
            httproute = %self.config.http_route,
            source_weight,
            target_weight,
            "updated traffic split"
        );
        Ok(Ack)
    }

    fn weighted_backend_refs(
        &self,
        source_weight: i32,
        target_weight: i32,
    ) -> Vec<HTTPRouteRulesBackendRefs> {
        vec![
            HTTPRouteRulesBackendRefs {
                name: self.config.source_service.clone(),
                port: Some(self.config.port),
                weight: Some(source_weight),
                kind: Some("Service".to_string()),
                group: Some("".to_string()),
                namespace: None,
                filters: None,
            },
            HTTPRouteRulesBackendRefs {
                name: self.config.target_service.clone(),
                port: Some(self.config.port),
                weight: Some(target_weight),
                kind: Some("Service".to_string()),
                group: Some("".to_string()),
                namespace: None,
                filters: None,
            },
        ]
    }

    /// Bound a Kubernetes call by the configured timeout and map its errors
    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, ActuationError> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_kube_error(e)),
            Err(_) => Err(ActuationError::Timeout(self.config.call_timeout)),
        }
    }
}

fn map_kube_error(error: kube::Error) -> ActuationError {
    match &error {
        kube::Error::Api(response) if response.code == 404 => {
            ActuationError::Rejected(format!("object not found: {}", response.message))
        }
        kube::Error::Api(response) if response.code == 409 => {
            ActuationError::Conflict(response.message.clone())
        }
        kube::Error::Api(response) if response.code == 400 || response.code == 422 => {
            ActuationError::Rejected(response.message.clone())
        }
        _ => ActuationError::Transient(error.to_string()),
    }
}

#[async_trait]
impl Actuator for KubeActuator {
    async fn apply(&self, command: &StepCommand) -> Result<Ack, ActuationError> {
        debug!(command = %command, "applying step command");
        match command {
            StepCommand::ScalePool { pool, replicas } => self.scale_pool(pool, *replicas).await,
            StepCommand::SetTrafficWeight {
                source_weight,
                target_weight,
            } => self.set_traffic_weight(*source_weight, *target_weight).await,
        }
    }

    async fn read_pool(&self, name: &str) -> Result<PoolState, ActuationError> {
        let rs = self.bounded(self.replicasets().get(name)).await?;

        let desired_replicas = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let ready_replicas = rs
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let version = rs
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(VERSION_LABEL))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(PoolState {
            desired_replicas,
            ready_replicas,
            version,
        })
    }
}

/// Builds a `KubeActuator` per plan from its routing configuration
pub struct KubeActuatorProvider {
    client: kube::Client,
    default_namespace: String,
    call_timeout: Duration,
}

impl KubeActuatorProvider {
    pub fn new(client: kube::Client, default_namespace: impl Into<String>) -> Self {
        KubeActuatorProvider {
            client,
            default_namespace: default_namespace.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ActuatorProvider for KubeActuatorProvider {
    fn actuator_for(&self, plan: &TrafficPlan) -> Result<Arc<dyn Actuator>, ConfigError> {
        let routing = plan.config.routing.as_ref().ok_or(ConfigError::MissingRouting)?;

        let namespace = if routing.namespace.is_empty() {
            self.default_namespace.clone()
        } else {
            routing.namespace.clone()
        };

        Ok(Arc::new(KubeActuator::new(
            self.client.clone(),
            KubeActuatorConfig {
                namespace,
                http_route: routing.http_route.clone(),
                source_service: routing.source_service.clone(),
                target_service: routing.target_service.clone(),
                port: routing.port,
                call_timeout: self.call_timeout,
            },
        )))
    }
}
