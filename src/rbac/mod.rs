//! C3 RBAC / Capability Filter: bearer token to effective capability set.

pub mod policy_store;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::policy::Permission;
use crate::config::{JwtConfig, RbacConfig};
use crate::errors::GatewayError;
use crate::metrics;

pub use policy_store::PolicyStore;

/// Claims extracted from an RS256 JWT.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

/// Effective capabilities derived from a token and policy application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub user_id: String,
    pub roles: Vec<String>,
    pub plugins: HashMap<String, HashSet<Permission>>,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Capabilities {
    /// `expires_at` strictly in the future.
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }

    /// `HasPermission(plugin, action)`: checks the plugin-specific row,
    /// falling back to `"*"`.
    pub fn has_permission(&self, plugin: &str, action: Permission) -> bool {
        if let Some(perms) = self.plugins.get(plugin)
            && perms.contains(&action)
        {
            return true;
        }
        self.plugins
            .get("*")
            .is_some_and(|perms| perms.contains(&action))
    }

    /// An anonymous, policy-default capability set used when authentication
    /// is not required.
    pub fn anonymous(default_policy: &HashMap<String, HashSet<Permission>>) -> Self {
        Self {
            user_id: "anonymous".to_string(),
            roles: vec![],
            plugins: default_policy.clone(),
            session_id: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }
}

/// Classification of a tool's required permission level, by name substring.
pub fn classify_tool_permission(tool_name: &str) -> Permission {
    let lower = tool_name.to_ascii_lowercase();
    const DESTRUCTIVE: &[&str] = &["delete", "clear", "remove", "drop", "destroy"];
    const WRITE: &[&str] = &["store", "save", "create", "update", "set", "put", "post", "write"];
    if DESTRUCTIVE.iter().any(|s| lower.contains(s)) {
        // Destructive tools additionally require `admin`; callers must check
        // both `Write` and `Admin` via `is_destructive_tool`.
        Permission::Write
    } else if WRITE.iter().any(|s| lower.contains(s)) {
        Permission::Write
    } else {
        Permission::Read
    }
}

pub fn is_destructive_tool(tool_name: &str) -> bool {
    let lower = tool_name.to_ascii_lowercase();
    ["delete", "clear", "remove", "drop", "destroy"]
        .iter()
        .any(|s| lower.contains(s))
}

struct CacheEntry {
    capabilities: Capabilities,
    inserted_at: Instant,
}

pub struct RbacEngine {
    policy_store: PolicyStore,
    decoding_key: Option<DecodingKey>,
    issuer: Option<String>,
    audience: Option<String>,
    clock_skew: Duration,
    cache_ttl: Duration,
    cache_capacity: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl RbacEngine {
    pub fn new(rbac: &RbacConfig, policy_store: PolicyStore) -> Result<Self, GatewayError> {
        let decoding_key = match &rbac.jwt.public_key_path {
            Some(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| GatewayError::internal(format!("failed to read JWT public key: {e}")))?;
                Some(
                    DecodingKey::from_rsa_pem(&pem)
                        .map_err(|e| GatewayError::internal(format!("invalid JWT public key: {e}")))?,
                )
            }
            None => None,
        };

        Ok(Self {
            policy_store,
            decoding_key,
            issuer: rbac.jwt.issuer.clone(),
            audience: rbac.jwt.audience.clone(),
            clock_skew: Duration::from_secs(rbac.jwt.clock_skew_secs),
            cache_ttl: Duration::from_secs(rbac.cache_ttl_secs),
            cache_capacity: rbac.cache_capacity,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// For tests and anonymous-only deployments: an engine with no signature
    /// verification configured (`process_token` always fails `Unauthorized`).
    pub fn without_jwt(jwt: &JwtConfig, policy_store: PolicyStore) -> Self {
        Self {
            policy_store,
            decoding_key: None,
            issuer: jwt.issuer.clone(),
            audience: jwt.audience.clone(),
            clock_skew: Duration::from_secs(jwt.clock_skew_secs),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1000,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_capabilities(&self) -> HashMap<String, HashSet<Permission>> {
        self.policy_store.default_permissions()
    }

    /// Verifies an RS256 JWT and returns the effective capability set, using
    /// a token->capabilities cache with TTL and lazy eviction.
    pub fn process_token(&self, token: &str) -> Result<Capabilities, GatewayError> {
        if let Some(cached) = self.cache_lookup(token) {
            metrics::record_rbac_cache(true);
            return Ok(cached);
        }
        metrics::record_rbac_cache(false);

        let Some(decoding_key) = &self.decoding_key else {
            return Err(GatewayError::unauthorized("Authentication failed"));
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_aud = self.audience.is_some();
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss.clone()]);
        }
        if let Some(aud) = &self.audience {
            validation.set_audience(&[aud.clone()]);
        }

        let token_data = decode::<Claims>(token, decoding_key, &validation)
            .map_err(|_| GatewayError::unauthorized("Authentication failed"))?;
        let claims = token_data.claims;

        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| GatewayError::unauthorized("Authentication failed"))?;

        let plugins = self.policy_store.permissions_for_roles(&claims.roles);

        let capabilities = Capabilities {
            user_id: claims.sub,
            roles: claims.roles,
            plugins,
            session_id: claims.sid,
            expires_at,
        };

        self.cache_insert(token, capabilities.clone());
        Ok(capabilities)
    }

    fn cache_lookup(&self, token: &str) -> Option<Capabilities> {
        let mut cache = self.cache.lock().expect("rbac cache poisoned");
        match cache.get(token) {
            Some(entry)
                if entry.inserted_at.elapsed() < self.cache_ttl && entry.capabilities.is_valid() =>
            {
                Some(entry.capabilities.clone())
            }
            Some(_) => {
                cache.remove(token);
                None
            }
            None => None,
        }
    }

    fn cache_insert(&self, token: &str, capabilities: Capabilities) {
        let mut cache = self.cache.lock().expect("rbac cache poisoned");
        cache.retain(|_, entry| {
            entry.inserted_at.elapsed() < self.cache_ttl && entry.capabilities.is_valid()
        });
        if cache.len() >= self.cache_capacity {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(
            token.to_string(),
            CacheEntry {
                capabilities,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::{Policy, PolicyFile, PolicyRule};

    fn policy_store() -> PolicyStore {
        let mut policies = HashMap::new();
        policies.insert(
            "admin".to_string(),
            Policy {
                description: None,
                rules: vec![PolicyRule {
                    plugin: "*".to_string(),
                    permissions: vec!["read".into(), "write".into(), "execute".into(), "admin".into()],
                    conditions: None,
                }],
            },
        );
        policies.insert(
            "viewer".to_string(),
            Policy {
                description: None,
                rules: vec![PolicyRule {
                    plugin: "memory".to_string(),
                    permissions: vec!["read".into()],
                    conditions: None,
                }],
            },
        );
        PolicyStore::new(PolicyFile {
            policies,
            default: Some("viewer".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn union_across_roles_is_monotonic() {
        let store = policy_store();
        let only_viewer = store.permissions_for_roles(&["viewer".to_string()]);
        let both = store.permissions_for_roles(&["viewer".to_string(), "admin".to_string()]);
        let viewer_read = only_viewer.get("memory").unwrap();
        let both_memory = both.get("memory").cloned().unwrap_or_default();
        for p in viewer_read {
            assert!(both_memory.contains(p) || both.get("*").is_some_and(|w| w.contains(p)));
        }
        assert!(both.get("*").is_some());
    }

    #[test]
    fn classify_destructive_tools_by_substring() {
        assert!(is_destructive_tool("memory.clear"));
        assert!(!is_destructive_tool("memory.get"));
        assert_eq!(classify_tool_permission("memory.store"), Permission::Write);
        assert_eq!(classify_tool_permission("memory.get"), Permission::Read);
    }

    #[test]
    fn unknown_role_falls_back_to_default_policy() {
        let store = policy_store();
        let caps = store.permissions_for_roles(&["no-such-role".to_string()]);
        assert!(caps.get("memory").is_some());
    }
}
