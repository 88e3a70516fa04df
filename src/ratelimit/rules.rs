//! Limiter rule configuration.
//!
//! A deployment declares an ordered list of rules; each becomes one
//! independent admission layer. Rules are validated as a set at startup so a
//! bad quota stops the process before it serves traffic.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::limiter::LimiterConfig;
use super::scope::Scope;
use crate::error::{Result, TollgateError};

/// One configured limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterRule {
    /// Unique name, used in logs and as the default key namespace.
    pub name: String,
    /// Dimensions the quota is counted over
    pub scope: Scope,
    /// Requests allowed per window
    pub limit: i64,
    /// Window length
    pub window: WindowSetting,
    /// Key namespace. Rules sharing a namespace and scope share counters.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Window length as a named unit or a number of seconds, at most
/// [`MAX_WINDOW`](crate::store::MAX_WINDOW).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowSetting {
    Unit(TimeUnit),
    Seconds(u64),
}

/// Named window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl WindowSetting {
    /// Get the window length.
    pub fn duration(&self) -> Duration {
        match self {
            WindowSetting::Unit(unit) => unit.duration(),
            WindowSetting::Seconds(secs) => Duration::from_secs(*secs),
        }
    }
}

impl LimiterRule {
    /// Key namespace for this rule: the explicit namespace, else the name.
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.name)
    }

    /// Validate the quota and turn it into a [`LimiterConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] naming the rule if its limit or
    /// window is invalid.
    pub fn limiter_config(&self) -> Result<LimiterConfig> {
        LimiterConfig::new(self.limit, self.window.duration())
            .map_err(|e| TollgateError::Config(format!("limiter '{}': {}", self.name, e)))
    }
}

/// Validate a set of rules.
///
/// Names must be unique and, like explicit namespaces, made of ASCII
/// letters, digits, `-`, `_` or `.` since they end up in store keys.
///
/// # Errors
///
/// Returns [`TollgateError::Config`] describing the first invalid rule.
pub fn validate_rules(rules: &[LimiterRule]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rules.len());

    for rule in rules {
        if !is_valid_identifier(&rule.name) {
            return Err(TollgateError::Config(format!(
                "invalid limiter name '{}'",
                rule.name
            )));
        }
        if let Some(namespace) = &rule.namespace {
            if !is_valid_identifier(namespace) {
                return Err(TollgateError::Config(format!(
                    "limiter '{}': invalid namespace '{}'",
                    rule.name, namespace
                )));
            }
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(TollgateError::Config(format!(
                "duplicate limiter name '{}'",
                rule.name
            )));
        }
        rule.limiter_config()?;
    }

    Ok(())
}

fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
