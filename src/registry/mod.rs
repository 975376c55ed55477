//! C7 Service Registry: authoritative in-memory directory of backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::errors::GatewayError;

pub type ServiceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Active,
    Inactive,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
}

/// Accepted endpoint schemes.
const VALID_SCHEMES: &[&str] = &["http", "https", "plugin"];

#[derive(Debug, Default)]
pub struct CounterSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub in_flight: i64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    in_flight: AtomicI64,
    total_latency_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    recent_results: Mutex<Vec<bool>>,
}

const RECENT_WINDOW: usize = 20;
const CONSECUTIVE_UNHEALTHY_THRESHOLD: u32 = 5;
const DEGRADED_FAILURE_RATE: f64 = 0.3;

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        let success = self.success_count.load(Ordering::Relaxed);
        let failure = self.failure_count.load(Ordering::Relaxed);
        let total = success + failure;
        let avg = if total == 0 {
            0.0
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
        };
        CounterSnapshot {
            success_count: success,
            failure_count: failure,
            in_flight: self.in_flight.load(Ordering::Relaxed),
            avg_latency_ms: avg,
        }
    }

    fn record_success(&self, duration: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.push_recent(true);
    }

    fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.push_recent(false);
    }

    fn push_recent(&self, ok: bool) {
        let mut recent = self.recent_results.lock().expect("recent_results poisoned");
        recent.push(ok);
        if recent.len() > RECENT_WINDOW {
            recent.remove(0);
        }
    }

    fn failure_rate(&self) -> f64 {
        let recent = self.recent_results.lock().expect("recent_results poisoned");
        if recent.is_empty() {
            return 0.0;
        }
        let failures = recent.iter().filter(|ok| !**ok).count();
        failures as f64 / recent.len() as f64
    }

    /// Healthy iff last check succeeded within the window; Degraded iff
    /// recent failure rate >= threshold but some successes; Unhealthy iff N
    /// consecutive failures.
    fn classify(&self) -> ServiceHealth {
        if self.consecutive_failures.load(Ordering::Relaxed) >= CONSECUTIVE_UNHEALTHY_THRESHOLD {
            return ServiceHealth::Unhealthy;
        }
        let recent = self.recent_results.lock().expect("recent_results poisoned");
        if recent.is_empty() {
            return ServiceHealth::Unknown;
        }
        let last_ok = *recent.last().expect("checked non-empty");
        drop(recent);
        if self.failure_rate() >= DEGRADED_FAILURE_RATE && self.success_count.load(Ordering::Relaxed) > 0 {
            return ServiceHealth::Degraded;
        }
        if last_ok {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Degraded
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    pub status: ServiceStatus,
    pub health: ServiceHealth,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub name: String,
    pub type_: String,
    pub version: String,
    pub endpoint: String,
    pub capabilities: CapabilitySet,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// Selection criteria for `Select`.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub strategy: Option<LoadBalancingStrategy>,
    pub metadata_hint: Option<(String, String)>,
}

struct Entry {
    record: RwLock<ServiceRecord>,
    counters: Counters,
}

pub struct ServiceRegistry {
    entries: RwLock<HashMap<ServiceId, Arc<Entry>>>,
    /// (name, type) -> id, enforces "name unique within type".
    identity_index: RwLock<HashMap<(String, String), ServiceId>>,
    round_robin_cursors: Mutex<HashMap<String, usize>>,
    default_strategy: LoadBalancingStrategy,
}

impl ServiceRegistry {
    pub fn new(default_strategy: LoadBalancingStrategy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            identity_index: RwLock::new(HashMap::new()),
            round_robin_cursors: Mutex::new(HashMap::new()),
            default_strategy,
        }
    }

    fn validate_endpoint(endpoint: &str) -> Result<(), GatewayError> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid endpoint uri: {e}")))?;
        if !VALID_SCHEMES.contains(&url.scheme()) {
            return Err(GatewayError::validation(format!(
                "unsupported endpoint scheme \"{}\"; expected one of {:?}",
                url.scheme(),
                VALID_SCHEMES
            )));
        }
        Ok(())
    }

    /// Register a backend. Idempotent on `(name, type, endpoint)`; fails
    /// `Conflict` when a record with the same identity but a different
    /// endpoint already exists.
    pub fn register(&self, req: RegisterRequest) -> Result<ServiceId, GatewayError> {
        Self::validate_endpoint(&req.endpoint)?;

        let key = (req.name.clone(), req.type_.clone());
        {
            let index = self.identity_index.read().expect("identity_index poisoned");
            if let Some(existing_id) = index.get(&key) {
                let entries = self.entries.read().expect("entries poisoned");
                if let Some(entry) = entries.get(existing_id) {
                    let record = entry.record.read().expect("record poisoned");
                    if record.endpoint == req.endpoint {
                        return Ok(record.id.clone());
                    }
                    return Err(GatewayError::conflict(format!(
                        "service \"{}\" of type \"{}\" already registered with a different endpoint",
                        req.name, req.type_
                    )));
                }
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = ServiceRecord {
            id: id.clone(),
            name: req.name.clone(),
            type_: req.type_.clone(),
            version: req.version,
            endpoint: req.endpoint,
            capabilities: req.capabilities,
            status: ServiceStatus::Active,
            health: ServiceHealth::Unknown,
            registered_at: now,
            last_seen: now,
            tags: req.tags,
            metadata: req.metadata,
        };

        let entry = Arc::new(Entry {
            record: RwLock::new(record),
            counters: Counters::default(),
        });

        self.entries
            .write()
            .expect("entries poisoned")
            .insert(id.clone(), entry);
        self.identity_index
            .write()
            .expect("identity_index poisoned")
            .insert(key, id.clone());

        Ok(id)
    }

    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.entries.write().expect("entries poisoned").remove(id);
        if let Some(entry) = removed {
            let record = entry.record.read().expect("record poisoned");
            self.identity_index
                .write()
                .expect("identity_index poisoned")
                .remove(&(record.name.clone(), record.type_.clone()));
            true
        } else {
            false
        }
    }

    /// Returns the single record if `name` is globally unique; otherwise
    /// callers must use `list_by_type`.
    pub fn get(&self, name: &str) -> Option<ServiceRecord> {
        let entries = self.entries.read().expect("entries poisoned");
        let mut found = None;
        for entry in entries.values() {
            let record = entry.record.read().expect("record poisoned");
            if record.name == name {
                if found.is_some() {
                    return None;
                }
                found = Some(record.clone());
            }
        }
        found
    }

    pub fn list_by_type(&self, type_: &str) -> Vec<ServiceRecord> {
        let entries = self.entries.read().expect("entries poisoned");
        entries
            .values()
            .filter_map(|e| {
                let record = e.record.read().expect("record poisoned");
                (record.type_ == type_).then(|| record.clone())
            })
            .collect()
    }

    pub fn list_all(&self) -> Vec<ServiceRecord> {
        let entries = self.entries.read().expect("entries poisoned");
        entries
            .values()
            .map(|e| e.record.read().expect("record poisoned").clone())
            .collect()
    }

    /// Updates lifecycle/health. Transitions require a monotonic `last_seen`
    /// timestamp.
    pub fn observe(&self, id: &str, status: Option<ServiceStatus>, health: Option<ServiceHealth>) {
        let entries = self.entries.read().expect("entries poisoned");
        if let Some(entry) = entries.get(id) {
            let mut record = entry.record.write().expect("record poisoned");
            let now = Utc::now();
            if now < record.last_seen {
                return;
            }
            if let Some(s) = status {
                record.status = s;
            }
            if let Some(h) = health {
                if h == ServiceHealth::Unhealthy && record.health != ServiceHealth::Unhealthy {
                    tracing::warn!(service = %record.name, "service transitioned to unhealthy");
                }
                record.health = h;
            }
            record.last_seen = now;
        }
    }

    /// Called by the Router after a successful backend dispatch.
    pub fn record_success(&self, id: &str, duration: Duration) {
        let entries = self.entries.read().expect("entries poisoned");
        if let Some(entry) = entries.get(id) {
            entry.counters.record_success(duration);
            let health = entry.counters.classify();
            drop(entries);
            self.observe(id, None, Some(health));
        }
    }

    /// Called by the Router after a failed backend dispatch.
    pub fn record_failure(&self, id: &str) {
        let entries = self.entries.read().expect("entries poisoned");
        if let Some(entry) = entries.get(id) {
            entry.counters.record_failure();
            let health = entry.counters.classify();
            drop(entries);
            self.observe(id, None, Some(health));
        }
    }

    pub fn begin_in_flight(&self, id: &str) -> InFlightGuard<'_> {
        let entries = self.entries.read().expect("entries poisoned");
        if let Some(entry) = entries.get(id) {
            entry.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        }
        InFlightGuard {
            registry: self,
            id: id.to_string(),
        }
    }

    pub fn counters(&self, id: &str) -> Option<CounterSnapshot> {
        let entries = self.entries.read().expect("entries poisoned");
        entries.get(id).map(|e| e.counters.snapshot())
    }

    /// Select a backend by type under a load-balancing strategy. Tie-breaks:
    /// prefer healthy candidates; when all are unhealthy, fail `Unavailable`.
    pub fn select(
        &self,
        type_: &str,
        criteria: &SelectionCriteria,
    ) -> Result<ServiceRecord, GatewayError> {
        let mut candidates: Vec<ServiceRecord> = self
            .list_by_type(type_)
            .into_iter()
            .filter(|r| r.status == ServiceStatus::Active)
            .collect();

        if let Some((k, v)) = &criteria.metadata_hint {
            candidates.retain(|r| {
                r.metadata
                    .as_ref()
                    .and_then(|m| m.get(k))
                    .and_then(|v| v.as_str())
                    .is_some_and(|found| found == v)
            });
        }

        if candidates.is_empty() {
            return Err(GatewayError::unavailable(format!(
                "no active services registered for type \"{type_}\""
            )));
        }

        let healthy: Vec<&ServiceRecord> = candidates
            .iter()
            .filter(|r| r.health == ServiceHealth::Healthy)
            .collect();
        let degraded: Vec<&ServiceRecord> = candidates
            .iter()
            .filter(|r| r.health == ServiceHealth::Degraded || r.health == ServiceHealth::Unknown)
            .collect();

        let pool: Vec<&ServiceRecord> = if !healthy.is_empty() {
            healthy
        } else if !degraded.is_empty() {
            degraded
        } else {
            return Err(GatewayError::unavailable(format!(
                "all services of type \"{type_}\" are unhealthy"
            )));
        };

        let strategy = criteria.strategy.unwrap_or(self.default_strategy);
        let chosen = match strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(type_, &pool),
            LoadBalancingStrategy::LeastLoaded => self.select_least_loaded(&pool),
            LoadBalancingStrategy::Random => self.select_random(&pool),
        };

        Ok(chosen.clone())
    }

    fn select_round_robin<'a>(&self, type_: &str, pool: &[&'a ServiceRecord]) -> &'a ServiceRecord {
        let mut cursors = self.round_robin_cursors.lock().expect("cursors poisoned");
        let cursor = cursors.entry(type_.to_string()).or_insert(0);
        let chosen = pool[*cursor % pool.len()];
        *cursor = (*cursor + 1) % pool.len().max(1);
        chosen
    }

    /// `argmin(in_flight, then error_rate, then avg_latency)`.
    fn select_least_loaded<'a>(&self, pool: &[&'a ServiceRecord]) -> &'a ServiceRecord {
        pool.iter()
            .min_by(|a, b| {
                let sa = self.counters(&a.id).unwrap_or_default();
                let sb = self.counters(&b.id).unwrap_or_default();
                sa.in_flight
                    .cmp(&sb.in_flight)
                    .then_with(|| error_rate(&sa).total_cmp(&error_rate(&sb)))
                    .then_with(|| sa.avg_latency_ms.total_cmp(&sb.avg_latency_ms))
            })
            .copied()
            .expect("pool is non-empty")
    }

    fn select_random<'a>(&self, pool: &[&'a ServiceRecord]) -> &'a ServiceRecord {
        let idx = rand::rng().random_range(0..pool.len());
        pool[idx]
    }
}

fn error_rate(c: &CounterSnapshot) -> f64 {
    let total = c.success_count + c.failure_count;
    if total == 0 {
        0.0
    } else {
        c.failure_count as f64 / total as f64
    }
}

/// RAII guard decrementing `in_flight` on drop, used by the Router around a
/// backend dispatch attempt.
pub struct InFlightGuard<'a> {
    registry: &'a ServiceRegistry,
    id: ServiceId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let entries = self.registry.entries.read().expect("entries poisoned");
        if let Some(entry) = entries.get(&self.id) {
            entry.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Helper used by tests and the retry loop to time a dispatch attempt.
pub fn time_it<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, type_: &str, endpoint: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            type_: type_.to_string(),
            version: "1.0.0".to_string(),
            endpoint: endpoint.to_string(),
            capabilities: CapabilitySet::default(),
            tags: None,
            metadata: None,
        }
    }

    #[test]
    fn register_then_get_round_trips_endpoint() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        registry
            .register(req("svc-a", "tool_provider", "https://a.example/mcp"))
            .unwrap();
        let got = registry.get("svc-a").unwrap();
        assert_eq!(got.endpoint, "https://a.example/mcp");
    }

    #[test]
    fn register_deregister_round_trip_leaves_empty_registry() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        let id = registry
            .register(req("svc-a", "tool_provider", "https://a.example/mcp"))
            .unwrap();
        assert!(registry.deregister(&id));
        assert!(registry.get("svc-a").is_none());
        assert!(registry.list_all().is_empty());
    }

    #[test]
    fn duplicate_identity_different_endpoint_conflicts() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        registry
            .register(req("svc-a", "tool_provider", "https://a.example/mcp"))
            .unwrap();
        let err = registry
            .register(req("svc-a", "tool_provider", "https://b.example/mcp"))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Conflict);
    }

    #[test]
    fn invalid_scheme_rejected_at_registration() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        let err = registry
            .register(req("svc-a", "tool_provider", "ftp://a.example/mcp"))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Validation);
    }

    #[test]
    fn round_robin_distributes_evenly_over_k_calls() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        for i in 0..3 {
            let id = registry
                .register(req(&format!("svc-{i}"), "tool_provider", &format!("https://{i}.example/mcp")))
                .unwrap();
            registry.observe(&id, None, Some(ServiceHealth::Healthy));
        }
        let mut counts = HashMap::new();
        for _ in 0..9 {
            let chosen = registry
                .select("tool_provider", &SelectionCriteria::default())
                .unwrap();
            *counts.entry(chosen.name).or_insert(0) += 1;
        }
        assert!(counts.values().all(|c| *c == 3));
    }

    #[test]
    fn select_fails_unavailable_when_all_unhealthy() {
        let registry = ServiceRegistry::new(LoadBalancingStrategy::RoundRobin);
        let id = registry
            .register(req("svc-a", "tool_provider", "https://a.example/mcp"))
            .unwrap();
        registry.observe(&id, None, Some(ServiceHealth::Unhealthy));
        let err = registry
            .select("tool_provider", &SelectionCriteria::default())
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Unavailable);
    }
}
