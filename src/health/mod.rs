//! C9 Health Manager: concurrent checker fan-out, worst-case aggregation,
//! and liveness/readiness semantics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::HealthConfig;

pub mod checkers;

/// Ordered worst-to-best for the aggregate's worst-case pass:
/// `Unhealthy` > `Unknown` > `Degraded` > `Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unknown,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub critical: bool,
    pub message: Option<String>,
    pub duration_ms: u128,
    pub suggestions: Vec<String>,
    pub details: serde_json::Value,
}

/// A named probe contributing to the aggregate health picture.
/// Implementations wrap the Service Registry, Plugin Manager, or any other
/// subsystem.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;
    fn critical(&self) -> bool;
    async fn check(&self) -> CheckResult;
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub timed_out: Vec<String>,
}

/// Runs every registered `Checker` concurrently under `global_timeout`,
/// then aggregates by worst-case status and healthy-fraction thresholds
/// from `HealthConfig`.
pub struct HealthManager {
    checkers: Vec<Arc<dyn Checker>>,
    config: HealthConfig,
}

impl HealthManager {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            checkers: Vec::new(),
            config,
        }
    }

    pub fn register(&mut self, checker: Arc<dyn Checker>) {
        self.checkers.push(checker);
    }

    pub async fn run_checks(&self) -> AggregateReport {
        self.run_checks_filtered(false).await
    }

    /// Runs only the critical checkers, for the `quick_check_interval`
    /// background loop.
    pub async fn run_critical_checks(&self) -> AggregateReport {
        self.run_checks_filtered(true).await
    }

    async fn run_checks_filtered(&self, critical_only: bool) -> AggregateReport {
        let global_timeout = Duration::from_secs(self.config.global_timeout_secs);
        let futures = self
            .checkers
            .iter()
            .filter(|checker| !critical_only || checker.critical())
            .map(|checker| {
                let checker = checker.clone();
                async move {
                    let start = Instant::now();
                    let outcome = match tokio::time::timeout(global_timeout, checker.check()).await {
                        Ok(mut result) => {
                            result.duration_ms = start.elapsed().as_millis();
                            Ok(result)
                        }
                        Err(_) => Err(CheckResult {
                            name: checker.name().to_string(),
                            status: HealthStatus::Unhealthy,
                            critical: checker.critical(),
                            message: Some("check timed out".to_string()),
                            duration_ms: global_timeout.as_millis(),
                            suggestions: vec!["investigate the slow dependency this checker probes".to_string()],
                            details: serde_json::Value::Null,
                        }),
                    };
                    let result = match &outcome {
                        Ok(r) => r,
                        Err(r) => r,
                    };
                    crate::metrics::record_health_check(
                        &result.name,
                        &format!("{:?}", result.status).to_lowercase(),
                        result.duration_ms as f64 / 1000.0,
                    );
                    outcome
                }
            });

        let outcomes = futures::future::join_all(futures).await;

        let mut checks = Vec::with_capacity(outcomes.len());
        let mut timed_out = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => checks.push(result),
                Err(result) => {
                    timed_out.push(result.name.clone());
                    checks.push(result);
                }
            }
        }

        AggregateReport {
            status: self.aggregate_status(&checks),
            checks,
            timed_out,
        }
    }

    /// Worst-case-per-checker, then further degraded by healthy-fraction
    /// thresholds. A single unhealthy critical checker already produces a
    /// worst-case of `Unhealthy`; the fraction pass can only push a
    /// merely-degraded worst-case further down, never up.
    fn aggregate_status(&self, checks: &[CheckResult]) -> HealthStatus {
        if checks.is_empty() {
            return HealthStatus::Healthy;
        }

        let worst_case = checks
            .iter()
            .filter(|c| c.critical)
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let healthy = checks.iter().filter(|c| c.status == HealthStatus::Healthy).count();
        let fraction = healthy as f64 / checks.len() as f64;
        let fraction_floor = if fraction < self.config.unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if fraction < self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        worst_case.max(fraction_floor)
    }

    /// `GET /health/ready`: all critical checkers healthy.
    pub async fn readiness(&self) -> bool {
        let report = self.run_checks().await;
        report
            .checks
            .iter()
            .filter(|c| c.critical)
            .all(|c| c.status == HealthStatus::Healthy)
    }

    /// `GET /health/live`: overall status is not `Unhealthy`.
    pub async fn liveness(&self) -> bool {
        self.run_checks().await.status != HealthStatus::Unhealthy
    }
}

/// Background loop running `run_critical_checks` on `quick_check_interval`
/// and the full `run_checks` on `full_check_interval`, publishing each
/// report onto the given sink. Runs until `cancellation` is triggered;
/// never panics the process.
pub async fn run_background_loop(
    manager: Arc<HealthManager>,
    cancellation: tokio_util::sync::CancellationToken,
    on_report: impl Fn(AggregateReport, bool) + Send + 'static,
) {
    let mut quick_ticker = tokio::time::interval(Duration::from_secs(manager.config.quick_check_interval_secs));
    let mut full_ticker = tokio::time::interval(Duration::from_secs(manager.config.full_check_interval_secs));
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = quick_ticker.tick() => {
                let report = manager.run_critical_checks().await;
                on_report(report, false);
            }
            _ = full_ticker.tick() => {
                let report = manager.run_checks().await;
                on_report(report, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysHealthy;
    #[async_trait]
    impl Checker for AlwaysHealthy {
        fn name(&self) -> &str {
            "always-healthy"
        }
        fn critical(&self) -> bool {
            true
        }
        async fn check(&self) -> CheckResult {
            CheckResult {
                name: self.name().to_string(),
                status: HealthStatus::Healthy,
                critical: true,
                message: None,
                duration_ms: 0,
                suggestions: vec![],
                details: serde_json::Value::Null,
            }
        }
    }

    struct AlwaysUnhealthy {
        critical: bool,
    }
    #[async_trait]
    impl Checker for AlwaysUnhealthy {
        fn name(&self) -> &str {
            "always-unhealthy"
        }
        fn critical(&self) -> bool {
            self.critical
        }
        async fn check(&self) -> CheckResult {
            CheckResult {
                name: self.name().to_string(),
                status: HealthStatus::Unhealthy,
                critical: self.critical,
                message: Some("simulated failure".to_string()),
                duration_ms: 0,
                suggestions: vec![],
                details: serde_json::Value::Null,
            }
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            unhealthy_threshold: 0.5,
            degraded_threshold: 0.9,
            quick_check_interval_secs: 5,
            full_check_interval_secs: 30,
            global_timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn critical_failure_forces_unhealthy_overall() {
        let mut manager = HealthManager::new(config());
        manager.register(Arc::new(AlwaysHealthy));
        manager.register(Arc::new(AlwaysUnhealthy { critical: true }));
        let report = manager.run_checks().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!manager.readiness().await);
    }

    #[tokio::test]
    async fn non_critical_failure_degrades_but_stays_live() {
        let mut manager = HealthManager::new(config());
        manager.register(Arc::new(AlwaysHealthy));
        manager.register(Arc::new(AlwaysUnhealthy { critical: false }));
        let report = manager.run_checks().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(manager.liveness().await);
    }

    #[tokio::test]
    async fn empty_checker_set_is_healthy() {
        let manager = HealthManager::new(config());
        let report = manager.run_checks().await;
        assert_eq!(report.status, HealthStatus::Healthy);
    }
}
