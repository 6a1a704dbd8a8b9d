//! Proxy configuration.
//!
//! Resolves a pack's declarative proxy config into a concrete
//! `(url, username, password)` triple a client can dial, via a small
//! registry of named providers. Ships one built-in provider (the
//! Oxylabs residential-proxy URL/username pattern); additional providers
//! can be registered by name at startup.

use std::env;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::pack::model::{ProxyConfig, ProxyMode};

#[derive(Debug, Clone)]
pub struct ResolvedProxy {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Builds a `ResolvedProxy` from a pack's `ProxyConfig` plus the engine's
/// ambient credentials (environment variables, by default).
pub trait ProxyProvider: Send + Sync {
    fn resolve(&self, config: &ProxyConfig) -> EngineResult<ResolvedProxy>;
}

/// `http://pr.oxylabs.io:7777`, username `customer-<user>[-cc-<CC>][-sessid-<hex>-sesstime-<minutes>]`.
pub struct OxylabsProvider {
    pub endpoint: String,
    pub user: String,
    pub password: String,
}

impl OxylabsProvider {
    pub fn from_env() -> EngineResult<Self> {
        let user = env::var("SHOWRUN_PROXY_USERNAME")
            .map_err(|_| EngineError::Operational("SHOWRUN_PROXY_USERNAME is not set".to_string()))?;
        let password = env::var("SHOWRUN_PROXY_PASSWORD")
            .map_err(|_| EngineError::Operational("SHOWRUN_PROXY_PASSWORD is not set".to_string()))?;
        Ok(Self {
            endpoint: "http://pr.oxylabs.io:7777".to_string(),
            user,
            password,
        })
    }
}

impl ProxyProvider for OxylabsProvider {
    fn resolve(&self, config: &ProxyConfig) -> EngineResult<ResolvedProxy> {
        let mut username = format!("customer-{}", self.user);
        if let Some(country) = &config.country {
            username.push_str(&format!("-cc-{}", country.to_uppercase()));
        }
        if config.mode == ProxyMode::Random {
            let session_id = Uuid::new_v4().simple().to_string();
            username.push_str(&format!("-sessid-{}-sesstime-10", &session_id[..16]));
        }
        Ok(ResolvedProxy {
            url: self.endpoint.clone(),
            username,
            password: self.password.clone(),
        })
    }
}

/// Registry of named proxy providers, keyed by `SHOWRUN_PROXY_PROVIDER`
/// (default `"oxylabs"`).
#[derive(Default)]
pub struct ProxyRegistry {
    providers: DashMap<String, Box<dyn ProxyProvider>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, provider: Box<dyn ProxyProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn resolve(&self, config: &ProxyConfig) -> EngineResult<Option<ResolvedProxy>> {
        if !config.enabled {
            return Ok(None);
        }
        let name = env::var("SHOWRUN_PROXY_PROVIDER").unwrap_or_else(|_| "oxylabs".to_string());
        let provider = self
            .providers
            .get(&name)
            .ok_or_else(|| EngineError::Operational(format!("unknown proxy provider '{}'", name)))?;
        provider.resolve(config).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oxylabs_username_includes_country_and_session() {
        let provider = OxylabsProvider {
            endpoint: "http://pr.oxylabs.io:7777".to_string(),
            user: "acct1".to_string(),
            password: "pw".to_string(),
        };
        let config = ProxyConfig {
            enabled: true,
            mode: ProxyMode::Random,
            country: Some("us".to_string()),
        };
        let resolved = provider.resolve(&config).unwrap();
        assert!(resolved.username.starts_with("customer-acct1-cc-US-sessid-"));
    }

    #[test]
    fn registry_errors_on_unknown_provider() {
        let registry = ProxyRegistry::new();
        let config = ProxyConfig {
            enabled: true,
            mode: ProxyMode::Session,
            country: None,
        };
        assert!(registry.resolve(&config).is_err());
    }

    #[test]
    fn disabled_config_resolves_to_none() {
        let registry = ProxyRegistry::new();
        let config = ProxyConfig {
            enabled: false,
            mode: ProxyMode::Session,
            country: None,
        };
        assert!(registry.resolve(&config).unwrap().is_none());
    }
}
