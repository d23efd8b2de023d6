//! Rate-limit policies and route rules
//!
//! A [`RateLimitPolicy`] is static configuration for one class of routes: the
//! window length, the sustained ceiling, the burst ceiling, and the identity
//! strategy. Policies are looked up through a [`PolicyTable`]: an explicit,
//! ordered list of `(matcher, policy)` rules evaluated in priority order with
//! a declared default, so overlapping prefixes resolve predictably instead of
//! by accident of map iteration.

use super::Error;
use super::identity::IdentityStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_WINDOW_SECS: u64 = 60;

/// Static rate-limit configuration for one route class.
///
/// `burst_capacity` and `max_requests` are two independent trip-wires; the
/// policy does not require one to be below the other. See
/// [`SlidingWindowLimiter::admit`](super::SlidingWindowLimiter::admit) for how
/// they combine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Scope name; part of the state key, so distinct scopes have independent
    /// windows for the same client.
    pub scope: String,
    /// Length of the sliding window.
    pub window: Duration,
    /// Sustained ceiling for the window.
    pub max_requests: u32,
    /// Burst ceiling, checked jointly with `max_requests`.
    pub burst_capacity: u32,
    /// How to identify the client.
    #[serde(default)]
    pub identity_strategy: IdentityStrategy,
}

impl RateLimitPolicy {
    /// Create a policy with the default 60-second window.
    pub fn new(scope: impl Into<String>, max_requests: u32, burst_capacity: u32) -> Self {
        RateLimitPolicy {
            scope: scope.into(),
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            max_requests,
            burst_capacity,
            identity_strategy: IdentityStrategy::Default,
        }
    }

    /// Override the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Override the identity strategy.
    pub fn with_identity_strategy(mut self, strategy: IdentityStrategy) -> Self {
        self.identity_strategy = strategy;
        self
    }

    /// Check the policy is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.window.as_secs() == 0 {
            return Err(Error::InvalidPolicy("window must be at least one second"));
        }
        if self.max_requests == 0 {
            return Err(Error::InvalidPolicy("max_requests must be positive"));
        }
        if self.burst_capacity == 0 {
            return Err(Error::InvalidPolicy("burst_capacity must be positive"));
        }
        Ok(())
    }
}

/// Route matching for policy lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMatcher {
    /// The route must equal the path exactly.
    Exact(String),
    /// The route must start with the prefix.
    Prefix(String),
}

impl RouteMatcher {
    /// Whether this matcher covers the given route.
    pub fn matches(&self, route: &str) -> bool {
        match self {
            RouteMatcher::Exact(path) => route == path,
            RouteMatcher::Prefix(prefix) => route.starts_with(prefix.as_str()),
        }
    }
}

/// Ordered policy rules with an explicit default.
///
/// Rules are evaluated in insertion order; the first match wins. Routes no
/// rule covers get the default policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<(RouteMatcher, RateLimitPolicy)>,
    default_policy: RateLimitPolicy,
}

impl PolicyTable {
    /// Create a table with only the default policy.
    pub fn new(default_policy: RateLimitPolicy) -> Self {
        PolicyTable {
            rules: Vec::new(),
            default_policy,
        }
    }

    /// Append a rule. Earlier rules take priority.
    pub fn with_rule(mut self, matcher: RouteMatcher, policy: RateLimitPolicy) -> Self {
        self.rules.push((matcher, policy));
        self
    }

    /// Append a rule in place.
    pub fn push_rule(&mut self, matcher: RouteMatcher, policy: RateLimitPolicy) {
        self.rules.push((matcher, policy));
    }

    /// Resolve the policy for a route.
    pub fn resolve(&self, route: &str) -> &RateLimitPolicy {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(route))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default_policy)
    }

    /// The fallback policy for unmatched routes.
    pub fn default_policy(&self) -> &RateLimitPolicy {
        &self.default_policy
    }

    /// Validate every policy in the table.
    pub fn validate(&self) -> Result<(), Error> {
        self.default_policy.validate()?;
        for (_, policy) in &self.rules {
            policy.validate()?;
        }
        Ok(())
    }
}
