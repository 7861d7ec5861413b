//! Concurrent health verification with per-target timeout and retry.
//!
//! Each target is checked on its own thread (fan-out bounded by the
//! configured concurrency cap) so slow targets never block independent ones.
//! A target is retried per the retry policy before being marked unhealthy;
//! the worst case per target is bounded by timeout × attempts plus backoff.

use crate::config::{HealthConfig, HealthTargetConfig};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateHealthReport {
    pub overall: HealthStatus,
    pub reports: Vec<HealthReport>,
}

impl AggregateHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }
}

// ---------------------------------------------------------------------------
// Checking
// ---------------------------------------------------------------------------

/// Run one check cycle across all configured targets.
pub fn check(config: &HealthConfig) -> Result<AggregateHealthReport> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| crate::ShipwayError::HealthCheckFailed(e.to_string()))?;

    let cap = config.concurrency_cap.max(1);
    let mut reports = Vec::with_capacity(config.targets.len());
    for chunk in config.targets.chunks(cap) {
        let chunk_reports: Vec<HealthReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|target| {
                    let client = &client;
                    scope.spawn(move || check_one(client, target, config))
                })
                .collect();
            handles
                .into_iter()
                .zip(chunk)
                .map(|(handle, target)| {
                    handle.join().unwrap_or_else(|_| HealthReport {
                        name: target.name.clone(),
                        status: HealthStatus::Unhealthy,
                        latency_ms: 0,
                        error: Some("health check thread panicked".to_string()),
                        required: target.required,
                    })
                })
                .collect()
        });
        reports.extend(chunk_reports);
    }

    let overall = aggregate(&reports);
    Ok(AggregateHealthReport { overall, reports })
}

/// Check a single named target; `None` name filter handled by the caller.
pub fn check_target(config: &HealthConfig, name: &str) -> Result<AggregateHealthReport> {
    let filtered = HealthConfig {
        targets: config
            .targets
            .iter()
            .filter(|t| t.name == name)
            .cloned()
            .collect(),
        ..config.clone()
    };
    check(&filtered)
}

fn check_one(
    client: &reqwest::blocking::Client,
    target: &HealthTargetConfig,
    config: &HealthConfig,
) -> HealthReport {
    let started = Instant::now();
    let outcome = config.retry.run(|attempt| {
        let attempt_start = Instant::now();
        let result = client.get(&target.url).send();
        match result {
            Ok(resp) if resp.status().is_success() => Ok(attempt_start.elapsed()),
            Ok(resp) => {
                tracing::debug!(target = %target.name, attempt, status = %resp.status(), "health probe failed");
                Err(format!("status {}", resp.status()))
            }
            Err(e) => {
                tracing::debug!(target = %target.name, attempt, error = %e, "health probe failed");
                Err(probe_error(&e))
            }
        }
    });

    match outcome {
        Ok(latency) => {
            let latency_ms = latency.as_millis() as u64;
            let status = if latency_ms > config.degraded_threshold_ms {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            HealthReport {
                name: target.name.clone(),
                status,
                latency_ms,
                error: None,
                required: target.required,
            }
        }
        Err(error) => HealthReport {
            name: target.name.clone(),
            status: HealthStatus::Unhealthy,
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
            required: target.required,
        },
    }
}

fn probe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        "connection refused".to_string()
    } else {
        e.to_string()
    }
}

/// Worst-case aggregation: a failed required target is unhealthy; any
/// degradation (or a failed optional target) degrades the composite; all
/// healthy otherwise.
pub fn aggregate(reports: &[HealthReport]) -> HealthStatus {
    if reports
        .iter()
        .any(|r| r.required && r.status == HealthStatus::Unhealthy)
    {
        return HealthStatus::Unhealthy;
    }
    if reports.iter().any(|r| r.status != HealthStatus::Healthy) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
