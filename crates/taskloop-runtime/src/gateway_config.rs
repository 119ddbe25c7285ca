use std::collections::BTreeMap;
use std::time::Duration;

use taskloop_return_loop::AgentHandle;
use thiserror::Error;

pub const GATEWAY_URL_ENV: &str = "OPENCLAW_GATEWAY_URL";
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";
pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PUBLIC_URL: &str = "https://void.tycho.ca";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENCLAW_POLLER_INTERVAL_MS must be >= {min} (got {0})", min = MIN_POLL_INTERVAL_MS)]
    PollIntervalTooSmall(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Resolved `{url, token}` pair for one agent's gateway.
pub struct GatewayEndpoint {
    pub base_url: String,
    pub token: String,
}

impl GatewayEndpoint {
    pub fn tools_invoke_url(&self) -> String {
        format!("{}/tools/invoke", self.base_url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Per-handle gateway endpoints. Handles without both url and token are absent.
pub struct GatewaySettings {
    endpoints: BTreeMap<AgentHandle, GatewayEndpoint>,
}

impl GatewaySettings {
    /// Resolves every known handle through `lookup`.
    ///
    /// `OPENCLAW_GATEWAY_URL_<HANDLE>` wins over `OPENCLAW_GATEWAY_URL` whenever
    /// it is set, even to an empty value; tokens follow the same rule.
    pub fn from_env_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        for handle in AgentHandle::ALL {
            let suffix = handle.env_suffix();
            let url = lookup(&format!("{GATEWAY_URL_ENV}_{suffix}"))
                .or_else(|| lookup(GATEWAY_URL_ENV))
                .unwrap_or_default();
            let token = lookup(&format!("{GATEWAY_TOKEN_ENV}_{suffix}"))
                .or_else(|| lookup(GATEWAY_TOKEN_ENV))
                .unwrap_or_default();
            settings = settings.with_endpoint(handle, &url, &token);
        }
        settings
    }

    /// Adds or replaces an endpoint; empty url or token removes it.
    pub fn with_endpoint(mut self, handle: AgentHandle, url: &str, token: &str) -> Self {
        let base_url = url.trim().trim_end_matches('/');
        let token = token.trim();
        if base_url.is_empty() || token.is_empty() {
            self.endpoints.remove(&handle);
        } else {
            self.endpoints.insert(
                handle,
                GatewayEndpoint {
                    base_url: base_url.to_string(),
                    token: token.to_string(),
                },
            );
        }
        self
    }

    pub fn endpoint(&self, handle: AgentHandle) -> Option<&GatewayEndpoint> {
        self.endpoints.get(&handle)
    }

    pub fn is_gateway_configured(&self, handle: AgentHandle) -> bool {
        self.endpoints.contains_key(&handle)
    }

    pub fn configured_handles(&self) -> Vec<AgentHandle> {
        self.endpoints.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PollerConfig {
    /// The interval floor only applies to an enabled poller.
    pub fn new(enabled: bool, interval_ms: u64) -> Result<Self, ConfigError> {
        if enabled && interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::PollIntervalTooSmall(interval_ms));
        }
        Ok(Self {
            enabled,
            interval: Duration::from_millis(interval_ms),
        })
    }

    /// Builds the config from raw flag values; only `"0"` disables.
    pub fn from_flags(enabled_flag: Option<&str>, interval_ms: u64) -> Result<Self, ConfigError> {
        Self::new(enabled_flag.map(str::trim) != Some("0"), interval_ms)
    }

    pub fn interval_ms(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub public_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            public_url: DEFAULT_PUBLIC_URL.to_string(),
        }
    }
}

impl DispatchConfig {
    /// Empty values fall back to the default public url.
    pub fn new(public_url: Option<&str>) -> Self {
        let public_url = public_url
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_PUBLIC_URL);
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    // Points at the dashboard until tasks get addressable pages.
    pub fn task_link(&self, _task_id: &str) -> String {
        format!("{}/dashboard", self.public_url)
    }
}
