//! Client configuration.
//!
//! The core reads no files or environment variables; callers deserialize a
//! `ClientConfig` from whatever source they use and turn it into a client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::WebDavClient;
use crate::error::{Error, Result};

fn default_port() -> u16 {
    80
}

fn default_timeout_secs() -> u64 {
    5
}

/// Connection settings for one WebDAV server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Sent as the `Host` header, and connected to unless `server_addr` is set.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Address to connect to when it differs from `host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: default_timeout_secs(),
            server_addr: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn into_client(self) -> Result<WebDavClient> {
        self.validate()?;
        let client = WebDavClient::new(&self.host, self.port, self.timeout());
        Ok(match self.server_addr.as_deref() {
            Some(addr) => client.with_server_addr(addr),
            None => client,
        })
    }
}
