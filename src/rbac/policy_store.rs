//! Policy application: role name -> policy -> plugin permission rows,
//! union-merged across roles.

use std::collections::{HashMap, HashSet};

use crate::config::policy::{Permission, Policy, PolicyFile};
use crate::errors::GatewayError;

pub struct PolicyStore {
    policies: HashMap<String, Policy>,
    default_policy: Option<String>,
}

impl PolicyStore {
    pub fn new(file: PolicyFile) -> Result<Self, GatewayError> {
        if let Some(default) = &file.default
            && !file.policies.contains_key(default)
        {
            return Err(GatewayError::validation(format!(
                "default policy \"{default}\" is not defined"
            )));
        }
        Ok(Self {
            policies: file.policies,
            default_policy: file.default,
        })
    }

    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
            default_policy: None,
        }
    }

    /// Permission set union over all matching role policies.
    /// If no role matches a defined policy, the configured default policy
    /// applies instead.
    pub fn permissions_for_roles(&self, roles: &[String]) -> HashMap<String, HashSet<Permission>> {
        let mut merged: HashMap<String, HashSet<Permission>> = HashMap::new();
        let mut matched_any = false;

        for role in roles {
            if let Some(policy) = self.policies.get(role) {
                matched_any = true;
                merge_policy(&mut merged, policy);
            }
        }

        if !matched_any && let Some(default_name) = &self.default_policy {
            if let Some(policy) = self.policies.get(default_name) {
                merge_policy(&mut merged, policy);
            }
        }

        merged
    }

    pub fn default_permissions(&self) -> HashMap<String, HashSet<Permission>> {
        let mut merged = HashMap::new();
        if let Some(default_name) = &self.default_policy
            && let Some(policy) = self.policies.get(default_name)
        {
            merge_policy(&mut merged, policy);
        }
        merged
    }
}

fn merge_policy(merged: &mut HashMap<String, HashSet<Permission>>, policy: &Policy) {
    for rule in &policy.rules {
        let entry = merged.entry(rule.plugin.clone()).or_default();
        for perm_str in &rule.permissions {
            match Permission::parse(perm_str) {
                Some(p) => {
                    entry.insert(p);
                }
                None => tracing::warn!(permission = %perm_str, "ignoring unknown permission string"),
            }
        }
    }
}
