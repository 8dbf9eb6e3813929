//! Per-host, per-kind driver handles, created lazily and reopened whenever
//! a health probe reports the handle dead.
//!
//! Private to one Worker: no cross-worker sharing, so the cache itself
//! needs no internal locking.

use crate::container_driver::ContainerDriver;
use crate::driver::HostDriver;
use crate::hypervisor_driver::HypervisorDriver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds the pair of driver handles for one host. Split out of
/// `ConnectionCache` so a test can swap in mock-backed drivers without a
/// real Docker daemon or libvirt endpoint to discover against.
#[cfg_attr(test, mockall::automock)]
pub trait DriverFactory: Send + Sync {
    fn container(&self, host: &str) -> Arc<dyn HostDriver>;
    fn hypervisor(&self, host: &str) -> Arc<dyn HostDriver>;
}

/// The production [`DriverFactory`]: concrete `ContainerDriver`/
/// `HypervisorDriver` handles talking to the real managed host.
pub struct RealDriverFactory {
    docker_port: u16,
}

impl RealDriverFactory {
    pub fn new(docker_port: u16) -> Self {
        Self { docker_port }
    }
}

impl DriverFactory for RealDriverFactory {
    fn container(&self, host: &str) -> Arc<dyn HostDriver> {
        Arc::new(ContainerDriver::new(host, self.docker_port))
    }

    fn hypervisor(&self, host: &str) -> Arc<dyn HostDriver> {
        Arc::new(HypervisorDriver::new(host))
    }
}

/// One host's pair of driver handles. Both are created together on first
/// touch since neither is expensive to hold — the cost is in the calls made
/// through them, not the handle itself.
struct HostEntry {
    container: Arc<dyn HostDriver>,
    hypervisor: Arc<dyn HostDriver>,
}

pub struct ConnectionCache {
    factory: Arc<dyn DriverFactory>,
    entries: HashMap<String, HostEntry>,
}

impl ConnectionCache {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            factory,
            entries: HashMap::new(),
        }
    }

    fn open(&self, host: &str) -> HostEntry {
        info!(%host, "opening driver handles");
        HostEntry {
            container: self.factory.container(host),
            hypervisor: self.factory.hypervisor(host),
        }
    }

    /// Returns the container driver for `host`, (re)creating it if absent or
    /// if the cached handle's last-known liveness probe failed.
    pub async fn container(&mut self, host: &str) -> Arc<dyn HostDriver> {
        if let Some(entry) = self.entries.get(host) {
            if entry.container.alive().await {
                return entry.container.clone();
            }
            info!(%host, "container driver handle unhealthy, reopening");
        }
        let entry = self.open(host);
        let handle = entry.container.clone();
        self.entries.insert(host.to_string(), entry);
        handle
    }

    /// Returns the hypervisor driver for `host`, with the same lazy-open
    /// and reopen-on-failed-probe behavior as [`Self::container`].
    pub async fn hypervisor(&mut self, host: &str) -> Arc<dyn HostDriver> {
        if let Some(entry) = self.entries.get(host) {
            if entry.hypervisor.alive().await {
                return entry.hypervisor.clone();
            }
            info!(%host, "hypervisor driver handle unhealthy, reopening");
        }
        let entry = self.open(host);
        let handle = entry.hypervisor.clone();
        self.entries.insert(host.to_string(), entry);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_lazily_and_caches_per_host() {
        let mut cache = ConnectionCache::new(Arc::new(RealDriverFactory::new(4243)));
        assert!(cache.entries.is_empty());
        let _ = cache.container("hostA").await;
        assert!(cache.entries.contains_key("hostA"));
    }
}
