//! Server configuration and CLI argument parsing
//!
//! Configuration follows the usual precedence: CLI arguments override
//! environment variables (all prefixed `TIDEGATE_`), which override
//! defaults.
//!
//! # Example Usage
//!
//! ```bash
//! # Defaults: 100 requests / 60s window, burst ceiling 20, on port 8080
//! tidegate
//!
//! # Tighter policy for search, looser default, fail-closed enforcement
//! tidegate --rule /api/search=30:10 --max-requests 200 --fail-closed
//!
//! # Via environment
//! export TIDEGATE_PORT=9090
//! export TIDEGATE_RULES=/api/search=30:10,/api/export=5:5:300
//! tidegate
//! ```

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::str::FromStr;
use std::time::Duration;
use tidegate::{
    FailurePolicy, LimiterConfig, PolicyTable, RateLimitPolicy, RouteMatcher,
};

/// One route rule: a path prefix with its own ceilings.
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// Path prefix the rule covers
    pub prefix: String,
    /// Sustained ceiling
    pub max_requests: u32,
    /// Burst ceiling
    pub burst_capacity: u32,
    /// Window override in seconds; the default window applies when absent
    pub window_secs: Option<u64>,
}

impl FromStr for RouteRule {
    type Err = anyhow::Error;

    /// Parse `PREFIX=MAX:BURST` or `PREFIX=MAX:BURST:WINDOW`.
    fn from_str(s: &str) -> Result<Self> {
        let (prefix, limits) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("rule {s:?} is missing '='; expected PREFIX=MAX:BURST[:WINDOW]"))?;
        if prefix.is_empty() {
            return Err(anyhow!("rule {s:?} has an empty path prefix"));
        }

        let parts: Vec<&str> = limits.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(anyhow!(
                "rule {s:?} must give MAX:BURST or MAX:BURST:WINDOW after '='"
            ));
        }

        let max_requests: u32 = parts[0]
            .parse()
            .with_context(|| format!("rule {s:?}: bad MAX {:?}", parts[0]))?;
        let burst_capacity: u32 = parts[1]
            .parse()
            .with_context(|| format!("rule {s:?}: bad BURST {:?}", parts[1]))?;
        let window_secs = match parts.get(2) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .with_context(|| format!("rule {s:?}: bad WINDOW {raw:?}"))?,
            ),
            None => None,
        };

        if max_requests == 0 || burst_capacity == 0 {
            return Err(anyhow!("rule {s:?}: ceilings must be positive"));
        }
        if window_secs == Some(0) {
            return Err(anyhow!("rule {s:?}: window must be positive"));
        }

        Ok(RouteRule {
            prefix: prefix.to_string(),
            max_requests,
            burst_capacity,
            window_secs,
        })
    }
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// TIDEGATE_ prefix; CLI arguments take precedence.
#[derive(Parser, Debug)]
#[command(
    name = "tidegate",
    about = "HTTP rate-limiting service with sliding windows and progressive bans",
    long_about = "An HTTP rate-limiting service over the tidegate core.\n\nRequests are checked against an ordered list of route rules (first match wins) with a default policy fallback. Repeated burst violations escalate into timed bans.\n\nEnvironment variables with the TIDEGATE_ prefix are supported; CLI arguments take precedence."
)]
pub struct Args {
    // HTTP listener
    #[arg(
        long,
        value_name = "HOST",
        help = "Bind host",
        default_value = "127.0.0.1",
        env = "TIDEGATE_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "Bind port",
        default_value_t = 8080,
        env = "TIDEGATE_PORT"
    )]
    pub port: u16,

    // Default policy
    #[arg(
        long,
        value_name = "SECS",
        help = "Default sliding window length",
        default_value_t = 60,
        env = "TIDEGATE_WINDOW_SECS"
    )]
    pub window_secs: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Default sustained ceiling per window",
        default_value_t = 100,
        env = "TIDEGATE_MAX_REQUESTS"
    )]
    pub max_requests: u32,
    #[arg(
        long,
        value_name = "N",
        help = "Default burst ceiling",
        default_value_t = 20,
        env = "TIDEGATE_BURST_CAPACITY"
    )]
    pub burst_capacity: u32,

    // Route rules
    #[arg(
        long = "rule",
        value_name = "PREFIX=MAX:BURST[:WINDOW]",
        help = "Route rule, repeatable; evaluated in order, first match wins",
        env = "TIDEGATE_RULES",
        value_delimiter = ','
    )]
    pub rules: Vec<String>,

    // Ban escalation
    #[arg(
        long,
        value_name = "N",
        help = "Burst violations before a ban",
        default_value_t = 5,
        env = "TIDEGATE_BAN_THRESHOLD"
    )]
    pub ban_threshold: u32,
    #[arg(
        long,
        value_name = "SECS",
        help = "Ban duration",
        default_value_t = 3600,
        env = "TIDEGATE_BAN_DURATION_SECS"
    )]
    pub ban_duration_secs: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "TTL on window state records",
        default_value_t = 120,
        env = "TIDEGATE_STATE_TTL_SECS"
    )]
    pub state_ttl_secs: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "TTL on abuse counters",
        default_value_t = 3600,
        env = "TIDEGATE_ABUSE_TTL_SECS"
    )]
    pub abuse_ttl_secs: u64,

    // Storage behavior
    #[arg(
        long,
        help = "Reject requests when storage fails (default is to admit them)",
        env = "TIDEGATE_FAIL_CLOSED"
    )]
    pub fail_closed: bool,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial store capacity",
        default_value_t = 100_000,
        env = "TIDEGATE_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Store cleanup interval",
        default_value_t = 300,
        env = "TIDEGATE_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "TIDEGATE_LOG_LEVEL"
    )]
    pub log_level: String,
}

/// Parsed, validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub window: Duration,
    pub max_requests: u32,
    pub burst_capacity: u32,
    pub rules: Vec<RouteRule>,
    pub ban_threshold: u32,
    pub ban_duration: Duration,
    pub state_ttl: Duration,
    pub abuse_ttl: Duration,
    pub fail_closed: bool,
    pub store_capacity: usize,
    pub store_cleanup_interval: Duration,
    pub log_level: String,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Build configuration from already-parsed arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let rules = args
            .rules
            .iter()
            .map(|raw| raw.parse::<RouteRule>())
            .collect::<Result<Vec<_>>>()?;

        let config = Config {
            host: args.host,
            port: args.port,
            window: Duration::from_secs(args.window_secs),
            max_requests: args.max_requests,
            burst_capacity: args.burst_capacity,
            rules,
            ban_threshold: args.ban_threshold,
            ban_duration: Duration::from_secs(args.ban_duration_secs),
            state_ttl: Duration::from_secs(args.state_ttl_secs),
            abuse_ttl: Duration::from_secs(args.abuse_ttl_secs),
            fail_closed: args.fail_closed,
            store_capacity: args.store_capacity,
            store_cleanup_interval: Duration::from_secs(args.store_cleanup_interval),
            log_level: args.log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// The ordered policy table this configuration describes. Rule scopes are
    /// their path prefixes, so each rule has an independent window per client.
    pub fn policy_table(&self) -> PolicyTable {
        let default_policy =
            RateLimitPolicy::new("default", self.max_requests, self.burst_capacity)
                .with_window(self.window);
        let mut table = PolicyTable::new(default_policy);
        for rule in &self.rules {
            let window = rule
                .window_secs
                .map(Duration::from_secs)
                .unwrap_or(self.window);
            table.push_rule(
                RouteMatcher::Prefix(rule.prefix.clone()),
                RateLimitPolicy::new(rule.prefix.clone(), rule.max_requests, rule.burst_capacity)
                    .with_window(window),
            );
        }
        table
    }

    /// Limiter tuning derived from this configuration.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            ban_threshold: self.ban_threshold,
            ban_duration: self.ban_duration,
            state_ttl: self.state_ttl,
            abuse_ttl: self.abuse_ttl,
            failure_policy: if self.fail_closed {
                FailurePolicy::Closed
            } else {
                FailurePolicy::Open
            },
            ..LimiterConfig::default()
        }
    }

    fn validate(&self) -> Result<()> {
        self.policy_table()
            .validate()
            .map_err(|e| anyhow!("invalid policy configuration: {e}"))?;
        if self.ban_threshold == 0 {
            return Err(anyhow!("ban threshold must be positive"));
        }
        if self.ban_duration.is_zero() {
            return Err(anyhow!("ban duration must be positive"));
        }
        Ok(())
    }
}
