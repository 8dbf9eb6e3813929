//! Daemon configuration, loaded once at startup from a TOML file.

use crate::model::NodeKind;
use crate::profile::{ClusterProfile, ProfileError};
use eyre::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawConfig {
    bind_addr: String,
    #[serde(default = "default_worker_count")]
    worker_count: usize,
    managed_hosts: Vec<String>,
    #[serde(default = "default_docker_port")]
    docker_port: u16,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    kind: NodeKind,
    #[serde(default)]
    default: BTreeMap<String, String>,
    #[serde(default)]
    overrides: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_worker_count() -> usize {
    4
}

fn default_docker_port() -> u16 {
    4243
}

/// The daemon's resolved, immutable-after-startup configuration.
pub struct Config {
    pub bind_addr: String,
    pub worker_count: usize,
    pub managed_hosts: std::collections::BTreeSet<String>,
    pub docker_port: u16,
    pub profiles: BTreeMap<String, ClusterProfile>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("profile '{0}': {1}")]
    Profile(String, #[source] ProfileError),
    #[error("managed_hosts: {0}")]
    ManagedHosts(#[source] crate::rangeset::RangeError),
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        Self::from_raw(raw).map_err(Into::into)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let managed_hosts =
            crate::hosts::parse_hosts(&raw.managed_hosts).map_err(ConfigError::ManagedHosts)?;

        let mut profiles = BTreeMap::new();
        for (name, raw_profile) in raw.profiles {
            let profile = ClusterProfile::new(
                raw_profile.kind,
                raw_profile.default,
                raw_profile.overrides.into_iter().collect(),
            )
            .map_err(|e| ConfigError::Profile(name.clone(), e))?;
            profiles.insert(name, profile);
        }

        Ok(Self {
            bind_addr: raw.bind_addr,
            worker_count: raw.worker_count,
            managed_hosts,
            docker_port: raw.docker_port,
            profiles,
        })
    }
}
