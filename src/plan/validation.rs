use crate::plan::model::{RolloutConfig, StrategyKind};
use std::time::Duration;
use thiserror::Error;

/// Invalid strategy parameters, rejected at start time. The plan is never
/// created and no loop is started.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("totalReplicas must be >= 1, got {0}")]
    InvalidReplicas(i32),

    #[error("canary steps must not be empty")]
    EmptySteps,

    #[error("steps[{index}] must be 1-100, got {weight}")]
    InvalidStepWeight { index: usize, weight: i32 },

    #[error("steps[{index}] must be greater than the previous step")]
    NonMonotonicSteps { index: usize },

    #[error("the final canary step must be 100, got {0}")]
    IncompleteRamp(i32),

    #[error("maxErrorRate must be in (0, 1], got {0}")]
    InvalidErrorRate(f64),

    #[error("maxLatencyP95Ms must be > 0, got {0}")]
    InvalidLatencyCeiling(f64),

    #[error("minSamples must be >= 1 and <= windowSize ({window}), got {min}")]
    InvalidSampleWindow { min: usize, window: usize },

    #[error("sampleMaxAgeSeconds must be >= 1 when set")]
    InvalidSampleAge,

    #[error("retry maxAttempts must be >= 1")]
    InvalidRetryAttempts,

    #[error("retry baseDelaySeconds must be >= 1 and <= maxDelaySeconds")]
    InvalidRetryDelays,

    #[error("{0} endpoint must not be empty")]
    MissingEndpoint(&'static str),

    #[error("tickIntervalSeconds must be >= 1")]
    InvalidTickInterval,

    #[error("routing configuration is required for this actuator")]
    MissingRouting,

    #[error("invalid duration {0:?}: expected e.g. \"30s\", \"5m\", \"2h\"")]
    InvalidDuration(String),

    #[error("service name {0:?} must be non-empty lowercase alphanumeric with '-'")]
    InvalidServiceName(String),
}

/// Validate a rollout configuration for the given strategy
///
/// Runtime constraints that the type system cannot enforce. Called at
/// `start_rollout`; a failure here means the plan is never created.
pub fn validate_config(strategy: &StrategyKind, config: &RolloutConfig) -> Result<(), ConfigError> {
    if config.total_replicas < 1 {
        return Err(ConfigError::InvalidReplicas(config.total_replicas));
    }

    if matches!(strategy, StrategyKind::Canary) {
        if config.steps.is_empty() {
            return Err(ConfigError::EmptySteps);
        }

        let mut previous = 0;
        for (index, &weight) in config.steps.iter().enumerate() {
            if !(1..=100).contains(&weight) {
                return Err(ConfigError::InvalidStepWeight { index, weight });
            }
            if weight <= previous && index > 0 {
                return Err(ConfigError::NonMonotonicSteps { index });
            }
            previous = weight;
        }

        // The ramp must end at full weight, otherwise the plan can never promote.
        let last = *config.steps.last().unwrap_or(&0);
        if last != 100 {
            return Err(ConfigError::IncompleteRamp(last));
        }
    }

    let health = &config.health;
    if !(health.max_error_rate > 0.0 && health.max_error_rate <= 1.0) {
        return Err(ConfigError::InvalidErrorRate(health.max_error_rate));
    }
    if health.max_latency_p95_ms <= 0.0 {
        return Err(ConfigError::InvalidLatencyCeiling(health.max_latency_p95_ms));
    }
    if health.min_samples < 1 || health.min_samples > health.window_size {
        return Err(ConfigError::InvalidSampleWindow {
            min: health.min_samples,
            window: health.window_size,
        });
    }
    if health.sample_max_age_seconds == Some(0) {
        return Err(ConfigError::InvalidSampleAge);
    }

    let retry = &config.retry;
    if retry.max_attempts < 1 {
        return Err(ConfigError::InvalidRetryAttempts);
    }
    if retry.base_delay_seconds < 1 || retry.base_delay_seconds > retry.max_delay_seconds {
        return Err(ConfigError::InvalidRetryDelays);
    }

    if config.source_endpoint.is_empty() {
        return Err(ConfigError::MissingEndpoint("source"));
    }
    if config.target_endpoint.is_empty() {
        return Err(ConfigError::MissingEndpoint("target"));
    }

    if config.tick_interval_seconds < 1 {
        return Err(ConfigError::InvalidTickInterval);
    }

    Ok(())
}

/// Validate a service name for use as a plan key and store filename
pub fn validate_service_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidServiceName(name.to_string()))
    }
}

/// Parse a duration string like "30s", "5m", "2h" into a `Duration`
///
/// Bounded to catch typos: seconds and minutes up to 24h, hours up to one
/// week. Zero durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let trimmed = input.trim();
    if trimmed.len() < 2 {
        return Err(invalid());
    }

    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let number: u64 = trimmed[..trimmed.len() - 1].parse().map_err(|_| invalid())?;
    if number == 0 {
        return Err(invalid());
    }

    let seconds = match unit {
        's' if number <= 86_400 => number,
        'm' if number <= 1_440 => number * 60,
        'h' if number <= 168 => number * 3_600,
        _ => return Err(invalid()),
    };

    Ok(Duration::from_secs(seconds))
}
