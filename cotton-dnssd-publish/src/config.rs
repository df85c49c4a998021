use anyhow::{Context, Result};
use cotton_dnssd::{DriverConfig, PublishOptions};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<PublishOptions>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// In-process bookkeeping only; nothing reaches the network
    Local,
    #[default]
    MdnsSd,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[cfg(feature = "mdns-sd")]
    #[serde(default)]
    pub mdns: cotton_dnssd::MdnsSdConfig,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            poll_interval_ms: default_poll_interval(),
            #[cfg(feature = "mdns-sd")]
            mdns: cotton_dnssd::MdnsSdConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read config file: {}", path.display())
        })?;

        Self::parse(&contents).with_context(|| {
            format!("Failed to parse config file: {}", path.display())
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
