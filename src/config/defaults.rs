//! Default value helpers for serde deserialization in config structs.

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_false() -> bool {
    false
}

pub(crate) fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

// ----------------- Router defaults -----------------

pub(crate) fn default_request_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}

pub(crate) fn default_load_balancing_strategy() -> crate::registry::LoadBalancingStrategy {
    crate::registry::LoadBalancingStrategy::RoundRobin
}

pub(crate) fn default_retry_attempts() -> u32 {
    3
}

pub(crate) fn default_retry_backoff_ms() -> u64 {
    1000
}

// ----------------- RBAC defaults -----------------

pub(crate) fn default_cache_ttl_secs() -> u64 {
    300
}

pub(crate) fn default_cache_capacity() -> usize {
    1000
}

pub(crate) fn default_clock_skew_secs() -> u64 {
    300
}

// ----------------- Health defaults -----------------

pub(crate) fn default_unhealthy_threshold() -> f64 {
    0.6
}

pub(crate) fn default_degraded_threshold() -> f64 {
    0.8
}

pub(crate) fn default_quick_check_interval_secs() -> u64 {
    10
}

pub(crate) fn default_full_check_interval_secs() -> u64 {
    60
}

pub(crate) fn default_global_timeout_secs() -> u64 {
    5
}

// ----------------- Plugin Manager / Communication defaults -----------------

pub(crate) fn default_max_retries() -> u32 {
    3
}

pub(crate) fn default_event_buffer_size() -> usize {
    1000
}

pub(crate) fn default_event_processing_timeout_secs() -> u64 {
    10
}

pub(crate) fn default_audit_retention_entries() -> usize {
    10_000
}

pub(crate) fn default_audit_retention_secs() -> u64 {
    3600
}
