//! Executor, discovery and temp-user tuning.

use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Hard ceiling on the page size discovery requests.
pub const MAX_PAGE_SIZE: usize = 500;

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Operations run in parallel within one stage.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operations: usize,

    /// Deadline for one operation, retries and post-condition included.
    #[serde(default = "default_operation_timeout", with = "super::duration")]
    pub operation_timeout: Duration,

    /// Deadline for a single service call.
    #[serde(default = "default_call_timeout", with = "super::duration")]
    pub call_timeout: Duration,

    /// Delay between readiness polls.
    #[serde(default = "default_poll_interval", with = "super::duration")]
    pub poll_interval: Duration,

    /// How long to wait for an asynchronously provisioned resource.
    #[serde(default = "default_post_condition_timeout", with = "super::duration")]
    pub post_condition_timeout: Duration,

    /// Per-kind operation deadline overrides.
    #[serde(default = "default_kind_timeouts", with = "super::duration::map")]
    pub kind_timeouts: BTreeMap<ResourceKind, Duration>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: default_max_concurrent(),
            operation_timeout: default_operation_timeout(),
            call_timeout: default_call_timeout(),
            poll_interval: default_poll_interval(),
            post_condition_timeout: default_post_condition_timeout(),
            kind_timeouts: default_kind_timeouts(),
            retry: RetryConfig::default(),
        }
    }
}

impl ExecutionConfig {
    /// Operation deadline for a kind, honoring overrides.
    pub fn operation_timeout_for(&self, kind: ResourceKind) -> Duration {
        self.kind_timeouts
            .get(&kind)
            .copied()
            .unwrap_or(self.operation_timeout)
    }
}

/// Backoff policy for retryable service errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "super::duration")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "super::duration")]
    pub max_delay: Duration,

    /// Backoff multiplier applied on rate-limit errors.
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exp);
        if rate_limited {
            delay = delay.saturating_mul(self.rate_limit_multiplier.max(1));
        }
        delay.min(self.max_delay)
    }
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: default_discovery_concurrency(),
            page_size: default_page_size(),
        }
    }
}

impl DiscoveryConfig {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Temporary database user settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempUsersConfig {
    #[serde(default = "default_temp_ttl", with = "super::duration")]
    pub ttl: Duration,

    #[serde(default = "default_auth_database")]
    pub auth_database: String,
}

impl Default for TempUsersConfig {
    fn default() -> Self {
        Self {
            ttl: default_temp_ttl(),
            auth_database: default_auth_database(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_post_condition_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_kind_timeouts() -> BTreeMap<ResourceKind, Duration> {
    BTreeMap::from([
        (ResourceKind::Cluster, Duration::from_secs(45 * 60)),
        (ResourceKind::NetworkPeering, Duration::from_secs(20 * 60)),
    ])
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_rate_limit_multiplier() -> u32 {
    4
}

fn default_discovery_concurrency() -> usize {
    8
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_temp_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_auth_database() -> String {
    "admin".to_string()
}
