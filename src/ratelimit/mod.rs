//! Rate limiting logic: key scheme, limiter engine and configured policies.

mod limiter;
mod policy;
mod rules;
mod scope;

pub use limiter::{LimitDecision, LimiterConfig, RateLimiter};
pub use policy::{AdmissionPolicy, DEFAULT_KEY_PREFIX};
pub use rules::{validate_rules, LimiterRule, TimeUnit, WindowSetting};
pub use scope::{KeyParts, Scope};

pub use crate::store::MAX_WINDOW;
