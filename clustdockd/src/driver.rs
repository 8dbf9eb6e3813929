//! `HostDriver`: the capability set bound to one managed host for one
//! runtime (container or hypervisor). Business logic (the Worker, fan-out)
//! is written against this trait so it can be tested without a real Docker
//! daemon or hypervisor.

use crate::error::Result;
use crate::model::{NodeSnapshot, NodeSpec};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostDriver: Send + Sync {
    /// Enumerates every node the driver knows about on its host, including
    /// stopped ones when `include_stopped` is set.
    async fn list_nodes(&self, include_stopped: bool) -> Result<Vec<NodeSnapshot>>;

    /// Idempotent-by-name creation: fails with `AlreadyExists` when a node
    /// with `spec.name` exists and isn't stopped, `BaseMissing` when the
    /// base image/domain is unknown. On a mid-step failure the driver
    /// best-effort cleans up its own partial artifacts before returning.
    async fn start(&self, spec: &NodeSpec) -> Result<()>;

    /// Force-destroys and undefines the named node. Idempotent; stopping a
    /// missing node returns `NotFound` rather than succeeding silently, so
    /// the fan-out layer can report it without treating it as fatal.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Returns the node's first globally scoped IPv4 address, or an empty
    /// string when it isn't known yet.
    async fn query_ip(&self, name: &str) -> Result<String>;

    /// Cheap health probe. A `false` result causes the owning
    /// `ConnectionCache` to reopen the driver before the next use.
    async fn alive(&self) -> bool;
}
