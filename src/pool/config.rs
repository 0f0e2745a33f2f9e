//! Pool configuration structs. Loading them from files or the environment is
//! up to the caller; JSON and YAML text can be parsed directly.

use crate::resilience::HealthConfig;
use crate::transport::Credential;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub credential: Credential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl AccountConfig {
    pub fn new(id: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: id.into(),
            name: None,
            credential,
            proxy: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("account id must not be empty".to_string()));
        }
        if self.credential.is_empty() {
            return Err(Error::Validation(format!(
                "account '{}' has an empty primary credential",
                self.id
            )));
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).map_err(|e| {
                Error::configuration(format!("invalid proxy url for account '{}': {}", self.id, e))
                    .with_source("pool_config")
            })?;
        }
        Ok(())
    }
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_cooldown_secs")]
    pub unhealthy_cooldown_seconds: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            unhealthy_cooldown_seconds: default_cooldown_secs(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl PoolSettings {
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig::new()
            .with_failure_threshold(self.max_consecutive_failures)
            .with_cooldown(Duration::from_secs(self.unhealthy_cooldown_seconds))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub settings: PoolSettings,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl PoolConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: PoolConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: PoolConfig = serde_yaml::from_str(text).map_err(|e| {
            Error::configuration(format!("invalid pool yaml: {}", e)).with_source("pool_config")
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Every account valid and ids unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate()?;
            if !seen.insert(account.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate account id '{}'",
                    account.id
                )));
            }
        }
        Ok(())
    }
}
