//! Health probing and sliding-window evaluation
//!
//! A `Prober` produces one `HealthSample` per pool per tick; samples live in
//! a bounded ring buffer owned by the reconcile loop. Probing never blocks
//! longer than the configured timeout and fails closed: a timed-out or
//! unreachable probe counts as a failed sample.

use crate::plan::{HealthConfig, HealthStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// One probe result for one pool
///
/// Timestamps are monotonic; samples are discarded once they fall outside
/// the window and are never shared across loops.
#[derive(Debug, Clone)]
pub struct HealthSample {
    pub pool: String,
    pub taken_at: Instant,
    pub success: bool,
    pub latency_ms: f64,
}

/// Bounded ring buffer of the most recent samples for one pool
#[derive(Debug)]
pub struct SampleWindow {
    samples: VecDeque<HealthSample>,
    capacity: usize,
    max_age: Option<Duration>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        SampleWindow {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            max_age: None,
        }
    }

    /// Additionally drop samples older than `max_age` on every push
    pub fn with_max_age(capacity: usize, max_age: Duration) -> Self {
        SampleWindow {
            max_age: Some(max_age),
            ..Self::new(capacity)
        }
    }

    pub fn push(&mut self, sample: HealthSample) {
        let now = sample.taken_at;
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        if let Some(max_age) = self.max_age {
            while let Some(front) = self.samples.front() {
                if now.duration_since(front.taken_at) > max_age {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fraction of failed samples in the window (0.0 when empty)
    pub fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|s| !s.success).count();
        failures as f64 / self.samples.len() as f64
    }

    /// 95th percentile latency over all samples in the window
    pub fn latency_p95(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut latencies: Vec<f64> = self.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((latencies.len() as f64) * 0.95).ceil() as usize;
        latencies[rank.saturating_sub(1).min(latencies.len() - 1)]
    }
}

/// Build the sample window a pool's health config calls for
pub fn window_for(config: &HealthConfig) -> SampleWindow {
    match config.sample_max_age_seconds {
        Some(age) => SampleWindow::with_max_age(config.window_size, Duration::from_secs(age)),
        None => SampleWindow::new(config.window_size),
    }
}

/// Evaluate a pool's window against its thresholds
///
/// Below `min_samples` the verdict is `Unknown`; strategies treat that as
/// "not yet healthy" rather than as a failure, so a fresh pool is never
/// rolled back before it has been observed.
pub fn evaluate_window(window: &SampleWindow, config: &HealthConfig) -> HealthStatus {
    if window.len() < config.min_samples {
        return HealthStatus::Unknown;
    }

    let error_rate = window.error_rate();
    let latency_p95 = window.latency_p95();

    if error_rate > config.max_error_rate || latency_p95 > config.max_latency_p95_ms {
        HealthStatus::Failed
    } else if error_rate > 0.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Probes one pool endpoint and reports a sample
///
/// Side-effect free beyond the sample itself; safe to run concurrently with
/// step actuation.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn sample(&self, pool: &str, endpoint: &str, timeout: Duration) -> HealthSample;
}

/// HTTP prober: GET the endpoint, 2xx within the timeout counts as success
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpProber { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn sample(&self, pool: &str, endpoint: &str, timeout: Duration) -> HealthSample {
        let started = Instant::now();
        let success = match self.client.get(endpoint).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            // Timeout, refused connection, DNS failure: all fail closed
            Err(error) => {
                debug!(pool = %pool, endpoint = %endpoint, error = %error, "probe failed");
                false
            }
        };

        HealthSample {
            pool: pool.to_string(),
            taken_at: Instant::now(),
            success,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Scripted prober for tests: per-pool queues of verdicts, healthy once empty
#[cfg(test)]
pub struct ScriptedProber {
    script: std::sync::Mutex<std::collections::HashMap<String, VecDeque<bool>>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl ScriptedProber {
    pub fn always_healthy() -> Self {
        ScriptedProber {
            script: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Queue explicit verdicts for a pool; once drained, probes succeed
    pub fn script_pool(&self, pool: &str, verdicts: impl IntoIterator<Item = bool>) {
        self.script
            .lock()
            .expect("ScriptedProber lock poisoned")
            .entry(pool.to_string())
            .or_default()
            .extend(verdicts);
    }

    /// Make every future probe of a pool fail
    pub fn fail_pool_forever(&self, pool: &str) {
        // A long queue of failures outlives any test's tick count.
        self.script_pool(pool, std::iter::repeat(false).take(10_000));
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::expect_used)]
impl Prober for ScriptedProber {
    async fn sample(&self, pool: &str, _endpoint: &str, _timeout: Duration) -> HealthSample {
        let success = self
            .script
            .lock()
            .expect("ScriptedProber lock poisoned")
            .get_mut(pool)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(true);

        HealthSample {
            pool: pool.to_string(),
            taken_at: Instant::now(),
            success,
            latency_ms: 10.0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "health_test.rs"]
mod tests;
