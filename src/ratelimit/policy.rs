//! Configured limiter instances.

use std::sync::Arc;

use tracing::debug;

use super::limiter::{LimitDecision, LimiterConfig, RateLimiter};
use super::rules::LimiterRule;
use super::scope::{KeyParts, Scope};
use crate::error::Result;
use crate::store::StoreError;

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "tollgate";

/// A named limiter: one scope, one quota, one key namespace.
///
/// Built once at startup and shared by handle; immutable afterwards.
#[derive(Debug)]
pub struct AdmissionPolicy {
    name: String,
    scope: Scope,
    config: LimiterConfig,
    key_prefix: String,
    namespace: String,
    limiter: RateLimiter,
}

impl AdmissionPolicy {
    /// Create a policy. The namespace defaults to `name`.
    pub fn new(
        name: impl Into<String>,
        scope: Scope,
        config: LimiterConfig,
        limiter: RateLimiter,
    ) -> Self {
        let name = name.into();
        Self {
            namespace: name.clone(),
            name,
            scope,
            config,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            limiter,
        }
    }

    /// Build a policy from a configured rule.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the rule's quota is invalid.
    pub fn from_rule(rule: &LimiterRule, key_prefix: &str, limiter: RateLimiter) -> Result<Self> {
        let config = rule.limiter_config()?;
        Ok(Self::new(rule.name.clone(), rule.scope, config, limiter)
            .with_namespace(rule.namespace())
            .with_key_prefix(key_prefix))
    }

    /// Use a different key namespace. Policies sharing a namespace and scope
    /// share counters.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Use a different store key prefix.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Wrap the policy in an `Arc` for sharing between layers.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Full store key for a request.
    pub fn key(&self, parts: &KeyParts<'_>) -> String {
        format!(
            "{}:{}:{}",
            self.key_prefix,
            self.namespace,
            self.scope.key(parts)
        )
    }

    /// Count the request and decide.
    ///
    /// # Errors
    ///
    /// Propagates counter store errors.
    pub async fn check(&self, parts: &KeyParts<'_>) -> std::result::Result<LimitDecision, StoreError> {
        let key = self.key(parts);
        let decision = self.limiter.check_with(&key, &self.config).await?;

        debug!(
            limiter = %self.name,
            key = %key,
            remaining = decision.remaining,
            limited = decision.limited,
            "Rate limit checked"
        );

        Ok(decision)
    }
}
