//! Gateway settings read from the environment.

use std::net::SocketAddr;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::options::TransportOptions;

pub const DEFAULT_ENV: &str = "development";
pub const DEFAULT_API_PREFIX: &str = "/assistant";
pub const DEFAULT_CRUD_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_AGENT: &str = "simple";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:8000";
pub const USER_AGENT: &str = concat!("assistant-gateway/", env!("CARGO_PKG_VERSION"));

static ENV_LOADER: Once = Once::new();

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            reason: reason.to_string(),
        }
    }
}

/// Settings shared by the orchestrator, the agents and the HTTP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub env: String,
    /// Mount point of the gateway routes, e.g. `/assistant`.
    pub api_prefix: String,
    /// Base URL of the CRUD backend the REST tools call.
    pub crud_base_url: String,
    pub crud_api_key: Option<String>,
    pub crud_bearer_token: Option<String>,
    /// Proxy for requests to the CRUD backend.
    pub crud_proxy: Option<String>,
    /// Agent used when a request does not name one.
    pub default_agent: String,
    pub anthropic_api_key: Option<String>,
    pub claude_model: String,
    pub gateway_addr: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            crud_base_url: DEFAULT_CRUD_BASE_URL.to_string(),
            crud_api_key: None,
            crud_bearer_token: None,
            crud_proxy: None,
            default_agent: DEFAULT_AGENT.to_string(),
            anthropic_api_key: None,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            gateway_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

impl Settings {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        ENV_LOADER.call_once(|| {
            if let Ok(path) = dotenvy::dotenv() {
                debug!(path = %path.display(), "Loaded environment file");
            }
        });
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let api_prefix = or_default("API_PREFIX", DEFAULT_API_PREFIX);
        if !api_prefix.starts_with('/') {
            return Err(ConfigError::invalid("API_PREFIX", "must start with '/'"));
        }

        let crud_base_url = or_default("CRUD_BASE_URL", DEFAULT_CRUD_BASE_URL);
        reqwest::Url::parse(&crud_base_url)
            .map_err(|e| ConfigError::invalid("CRUD_BASE_URL", e))?;

        let gateway_addr = or_default("GATEWAY_ADDR", DEFAULT_GATEWAY_ADDR)
            .parse()
            .map_err(|e| ConfigError::invalid("GATEWAY_ADDR", e))?;

        Ok(Self {
            env: or_default("APP_ENV", DEFAULT_ENV),
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            crud_base_url,
            crud_api_key: get("CRUD_API_KEY"),
            crud_bearer_token: get("CRUD_BEARER_TOKEN"),
            crud_proxy: get("CRUD_PROXY"),
            default_agent: or_default("DEFAULT_AGENT", DEFAULT_AGENT),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            claude_model: or_default("CLAUDE_MODEL", DEFAULT_CLAUDE_MODEL),
            gateway_addr,
        })
    }

    /// Options for the transport the REST tools send backend requests through.
    pub fn transport_options(&self) -> TransportOptions {
        let options = TransportOptions::new().with_user_agent(USER_AGENT);
        match &self.crud_proxy {
            Some(proxy) => options.with_proxy(proxy.clone()),
            None => options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.gateway_addr.to_string(), DEFAULT_GATEWAY_ADDR);
    }

    #[test]
    fn values_are_read_and_empty_ones_ignored() {
        let settings = Settings::from_lookup(lookup(&[
            ("CRUD_BASE_URL", "http://backend:9000/api"),
            ("CRUD_API_KEY", "k"),
            ("CRUD_BEARER_TOKEN", ""),
            ("DEFAULT_AGENT", "echo"),
            ("API_PREFIX", "/gw/"),
        ]))
        .unwrap();
        assert_eq!(settings.crud_base_url, "http://backend:9000/api");
        assert_eq!(settings.crud_api_key.as_deref(), Some("k"));
        assert_eq!(settings.crud_bearer_token, None);
        assert_eq!(settings.default_agent, "echo");
        assert_eq!(settings.api_prefix, "/gw");
    }

    #[test]
    fn transport_options_follow_settings() {
        let options = Settings::default().transport_options();
        assert_eq!(options.user_agent.as_deref(), Some(USER_AGENT));
        assert_eq!(options.proxy, None);

        let settings = Settings::from_lookup(lookup(&[("CRUD_PROXY", "http://proxy:3128")])).unwrap();
        assert_eq!(
            settings.transport_options().proxy.as_deref(),
            Some("http://proxy:3128")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Settings::from_lookup(lookup(&[("GATEWAY_ADDR", "nowhere")])).unwrap_err();
        assert!(err.to_string().starts_with("GATEWAY_ADDR:"));

        let err = Settings::from_lookup(lookup(&[("API_PREFIX", "assistant")])).unwrap_err();
        assert_eq!(err.to_string(), "API_PREFIX: must start with '/'");

        assert!(Settings::from_lookup(lookup(&[("CRUD_BASE_URL", "not a url")])).is_err());
    }
}
