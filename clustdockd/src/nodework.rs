//! Per-node spawn/stop sequencing: hook → driver call → hook. This is the
//! body [`crate::executor::NodeExecutor`] runs once per node — factored out
//! so it's testable against a mock `HostDriver` independent of whether the
//! call happens in this process (unit tests) or a re-exec'd child (real
//! fan-out, see `executor::run_child`).

use crate::driver::HostDriver;
use crate::error::{Error, Result};
use crate::hooks;
use crate::model::{NodeKind, NodeSpec};
use std::sync::Arc;

pub async fn spawn_one(driver: Arc<dyn HostDriver>, spec: &NodeSpec) -> Result<()> {
    hooks::run_optional_hook(&spec.hooks.before_start, &spec.name, spec.kind_tag(), &spec.host)
        .await?;
    driver.start(spec).await?;
    hooks::run_optional_hook(&spec.hooks.after_start, &spec.name, spec.kind_tag(), &spec.host)
        .await?;
    Ok(())
}

pub async fn stop_one(
    driver: Arc<dyn HostDriver>,
    name: &str,
    kind: NodeKind,
    host: &str,
    after_end: Option<&str>,
) -> Result<()> {
    driver.stop(name).await?;
    hooks::run_optional_hook(&after_end.map(str::to_string), name, kind, host).await?;
    Ok(())
}

/// Builds the concrete driver a re-exec'd child uses for its single node
/// op — the child has no `ConnectionCache` of its own, so this always opens
/// a fresh handle rather than looking one up.
pub fn driver_for(kind: NodeKind, host: &str, docker_port: u16) -> Arc<dyn HostDriver> {
    match kind {
        NodeKind::Container => Arc::new(crate::container_driver::ContainerDriver::new(host, docker_port)),
        NodeKind::Vm => Arc::new(crate::hypervisor_driver::HypervisorDriver::new(host)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockHostDriver;
    use crate::model::{Hooks, NodeSpecKind};

    fn spec(hooks: Hooks) -> NodeSpec {
        NodeSpec {
            name: "web0".to_string(),
            clustername: "web".to_string(),
            idx: Some(0),
            host: "hostA".to_string(),
            add_ifaces: Vec::new(),
            hooks,
            kind: NodeSpecKind::Container {
                image: "debian:bookworm".to_string(),
                run_options: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn spawn_one_calls_driver_start_when_no_hooks() {
        let mut mock = MockHostDriver::new();
        mock.expect_start().times(1).returning(|_| Ok(()));
        let result = spawn_one(Arc::new(mock), &spec(Hooks::default())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn spawn_one_propagates_driver_start_failure() {
        let mut mock = MockHostDriver::new();
        mock.expect_start()
            .times(1)
            .returning(|spec| Err(Error::AlreadyExists(spec.name.clone())));
        let result = spawn_one(Arc::new(mock), &spec(Hooks::default())).await;
        assert!(matches!(result, Err(Error::AlreadyExists(name)) if name == "web0"));
    }

    #[tokio::test]
    async fn spawn_one_before_start_hook_failure_short_circuits_driver_start() {
        let mut mock = MockHostDriver::new();
        mock.expect_start().times(0);
        let hooks = Hooks {
            before_start: Some("/nonexistent/clustdock-test-hook".to_string()),
            after_start: None,
            after_end: None,
        };
        let result = spawn_one(Arc::new(mock), &spec(hooks)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_one_propagates_driver_stop_failure() {
        let mut mock = MockHostDriver::new();
        mock.expect_stop()
            .times(1)
            .returning(|name| Err(Error::NotFound(name.to_string())));
        let result = stop_one(Arc::new(mock), "web0", NodeKind::Container, "hostA", None).await;
        assert!(matches!(result, Err(Error::NotFound(name)) if name == "web0"));
    }
}
