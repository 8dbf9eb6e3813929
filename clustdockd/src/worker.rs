//! Executes one client request end to end: discovery → placement →
//! fan-out → aggregation. Single-threaded per worker; many workers run in
//! parallel behind the Dispatcher and share nothing mutable with each
//! other.
//!
//! Fan-out (`spawn`, `stop_nodes`) drives every node through a
//! [`NodeExecutor`], not a `HostDriver` directly — in production that's
//! [`crate::executor::SubprocessExecutor`], which re-execs the daemon as an
//! isolated child process per node so a crash or hang in one can't poison
//! its siblings.

use crate::connection_cache::ConnectionCache;
use crate::error::Error;
use crate::executor::NodeExecutor;
use crate::model::{NodeKind, NodeSnapshot};
use crate::profile::ClusterProfile;
use crate::wire::{Reply, Request};
use crate::{placement, rangeset};
use futures_util::future::join_all;
use rand::seq::IteratorRandom;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct Worker {
    cache: ConnectionCache,
    executor: Arc<dyn NodeExecutor>,
    profiles: Arc<BTreeMap<String, ClusterProfile>>,
    managed_hosts: Arc<BTreeSet<String>>,
}

impl Worker {
    pub fn new(
        cache: ConnectionCache,
        executor: Arc<dyn NodeExecutor>,
        profiles: Arc<BTreeMap<String, ClusterProfile>>,
        managed_hosts: Arc<BTreeSet<String>>,
    ) -> Self {
        Self {
            cache,
            executor,
            profiles,
            managed_hosts,
        }
    }

    #[instrument(skip(self))]
    pub async fn handle(&mut self, request: Request) -> Reply {
        match request {
            Request::List { include_stopped } => self.list(include_stopped).await,
            Request::Spawn { profile, clustername, n, host } => {
                self.spawn(&profile, &clustername, n, host).await
            }
            Request::StopNodes { nodeset } => self.stop_nodes(&nodeset).await,
            Request::GetIp { nodeset } => self.get_ip(&nodeset).await,
        }
    }

    async fn list(&mut self, include_stopped: bool) -> Reply {
        let mut mapping = BTreeMap::new();
        for host in self.managed_hosts.iter() {
            let mut nodes = Vec::new();
            match self.cache.container(host).await.list_nodes(include_stopped).await {
                Ok(mut v) => nodes.append(&mut v),
                Err(e) => warn!(%host, error = %e, "skipping host: container discovery failed"),
            }
            match self.cache.hypervisor(host).await.list_nodes(include_stopped).await {
                Ok(mut v) => nodes.append(&mut v),
                Err(e) => warn!(%host, error = %e, "skipping host: hypervisor discovery failed"),
            }
            if !nodes.is_empty() {
                mapping.insert(host.clone(), nodes);
            }
        }
        Reply::List(mapping)
    }

    /// Lists every node across every managed host, regardless of status,
    /// used for discovery ahead of placement/stop/get_ip.
    async fn discover_all(&mut self) -> Vec<NodeSnapshot> {
        let mut all = Vec::new();
        let hosts: Vec<String> = self.managed_hosts.iter().cloned().collect();
        for host in hosts {
            match self.cache.container(&host).await.list_nodes(true).await {
                Ok(mut v) => all.append(&mut v),
                Err(e) => warn!(%host, error = %e, "skipping host: container discovery failed"),
            }
            match self.cache.hypervisor(&host).await.list_nodes(true).await {
                Ok(mut v) => all.append(&mut v),
                Err(e) => warn!(%host, error = %e, "skipping host: hypervisor discovery failed"),
            }
        }
        all
    }

    async fn spawn(
        &mut self,
        profile_name: &str,
        clustername: &str,
        n: i64,
        host: Option<String>,
    ) -> Reply {
        let Some(profile) = self.profiles.get(profile_name).cloned() else {
            return Reply::Error(
                Error::InvalidInput(format!("unknown profile '{profile_name}'")).to_string(),
            );
        };
        if !crate::model::valid_clustername(clustername) {
            return Reply::Error(
                Error::InvalidInput(format!("invalid cluster name '{clustername}'")).to_string(),
            );
        }
        let host = match host {
            Some(h) if self.managed_hosts.contains(&h) => h,
            Some(h) => {
                return Reply::Error(Error::InvalidInput(format!("host '{h}' is not managed")).to_string())
            }
            None => match self.managed_hosts.iter().choose(&mut rand::thread_rng()) {
                Some(h) => h.clone(),
                None => {
                    return Reply::Error(
                        Error::InvalidInput("no managed hosts available".to_string()).to_string(),
                    )
                }
            },
        };

        let existing = self.existing_indices(clustername).await;
        let placed = match placement::place(n, &existing) {
            Ok(indices) => indices,
            Err(e) => return Reply::Error(e.to_string()),
        };

        let specs: Vec<_> = match placed
            .iter()
            .map(|&idx| profile.build_node_spec(clustername, idx, &host))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(specs) => specs,
            Err(e) => return Reply::Error(e.to_string()),
        };

        let futures = specs.iter().map(|spec| {
            let executor = self.executor.clone();
            async move {
                let result = executor.spawn_node(spec).await;
                (spec.name.clone(), spec.idx, result)
            }
        });
        let results = join_all(futures).await;

        let mut success_idx = BTreeSet::new();
        let mut errors = Vec::new();
        for (name, idx, result) in results {
            match result {
                Ok(()) => {
                    if let Some(idx) = idx {
                        success_idx.insert(idx);
                    }
                    info!(node = %name, "spawned");
                }
                Err(e) => errors.push(e.for_node(&name)),
            }
        }

        Reply::NodesetResult {
            nodeset: rangeset::format(clustername, &success_idx),
            errors,
        }
    }

    async fn existing_indices(&mut self, clustername: &str) -> BTreeSet<u32> {
        self.discover_all()
            .await
            .into_iter()
            .filter(|n| n.clustername == clustername)
            .filter_map(|n| n.idx)
            .collect()
    }

    async fn stop_nodes(&mut self, nodeset: &str) -> Reply {
        let targets = match rangeset::expand_nodeset(nodeset) {
            Ok(names) => names,
            Err(e) => return Reply::Error(e.to_string()),
        };

        let discovered = self.discover_all().await;
        let by_name: BTreeMap<&str, &NodeSnapshot> =
            discovered.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut futures = Vec::new();
        let mut errors = Vec::new();
        for name in &targets {
            let Some(snapshot) = by_name.get(name.as_str()) else {
                errors.push(Error::NotFound(name.clone()).for_node(name));
                continue;
            };
            let executor = self.executor.clone();
            let name = name.clone();
            let kind = snapshot.kind;
            let host = snapshot.host.clone();
            let after_end = snapshot.hooks.after_end.clone();
            futures.push(async move {
                let result = executor.stop_node(&name, kind, &host, after_end.as_deref()).await;
                (name, result)
            });
        }

        let results = join_all(futures).await;
        let mut stopped = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => stopped.push(name),
                Err(e) => errors.push(e.for_node(&name)),
            }
        }

        let (clustername, set) = nodeset_to_range(&stopped);
        Reply::NodesetResult {
            nodeset: rangeset::format(&clustername, &set),
            errors,
        }
    }

    async fn get_ip(&mut self, nodeset: &str) -> Reply {
        let targets = match rangeset::expand_nodeset(nodeset) {
            Ok(names) => names,
            Err(e) => return Reply::Error(e.to_string()),
        };

        // Only running nodes are IP candidates; a name that exists but is
        // stopped is reported the same as one that doesn't exist at all.
        let discovered = self.discover_all().await;
        let by_name: BTreeMap<&str, &NodeSnapshot> = discovered
            .iter()
            .filter(|n| n.status == crate::model::NodeStatus::Running)
            .map(|n| (n.name.as_str(), n))
            .collect();

        let mut ips = Vec::new();
        let mut errors = Vec::new();
        for name in &targets {
            let Some(snapshot) = by_name.get(name.as_str()) else {
                errors.push(Error::NotFound(name.clone()).for_node(name));
                continue;
            };
            let driver = match snapshot.kind {
                NodeKind::Container => self.cache.container(&snapshot.host).await,
                NodeKind::Vm => self.cache.hypervisor(&snapshot.host).await,
            };
            match driver.query_ip(name).await {
                Ok(ip) if !ip.is_empty() => ips.push((ip, name.clone())),
                Ok(_) => errors.push(format!("Error: Unable to find IP for node {name}")),
                Err(e) => errors.push(e.for_node(name)),
            }
        }

        Reply::IpList { ips, errors }
    }
}

/// `rangeset::format` needs one base name; `stop_nodes` may target several
/// clusters at once, so this picks the (first alphabetically) clustername
/// among the stopped names and compresses indices belonging to it, leaving
/// any other cluster's names appended verbatim. In the common case
/// (stopping one cluster's nodeset) this compresses the whole set.
fn nodeset_to_range(names: &[String]) -> (String, BTreeSet<u32>) {
    let mut by_cluster: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for name in names {
        let (cluster, idx) = crate::model::split_name(name);
        if let Some(idx) = idx {
            by_cluster.entry(cluster).or_default().insert(idx);
        }
    }
    match by_cluster.into_iter().next() {
        Some((cluster, set)) => (cluster, set),
        None => (String::new(), BTreeSet::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_cache::MockDriverFactory;
    use crate::driver::MockHostDriver;
    use crate::executor::MockNodeExecutor;
    use crate::model::{Hooks, NodeStatus};

    #[test]
    fn nodeset_to_range_compresses_first_cluster() {
        let names = vec!["web0".to_string(), "web1".to_string(), "web3".to_string()];
        let (cluster, set) = nodeset_to_range(&names);
        assert_eq!(cluster, "web");
        assert_eq!(set, [0u32, 1, 3].into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn nodeset_to_range_empty_input_is_empty() {
        let (cluster, set) = nodeset_to_range(&[]);
        assert_eq!(cluster, "");
        assert!(set.is_empty());
    }

    fn web_profiles() -> Arc<BTreeMap<String, ClusterProfile>> {
        let mut map = BTreeMap::new();
        map.insert(
            "web".to_string(),
            ClusterProfile::new(
                NodeKind::Container,
                [("image".to_string(), "debian:bookworm".to_string())]
                    .into_iter()
                    .collect(),
                vec![],
            )
            .unwrap(),
        );
        Arc::new(map)
    }

    fn snapshot(name: &str, host: &str) -> NodeSnapshot {
        let (clustername, idx) = crate::model::split_name(name);
        NodeSnapshot {
            name: name.to_string(),
            clustername,
            idx,
            host: host.to_string(),
            ip: String::new(),
            status: NodeStatus::Running,
            kind: NodeKind::Container,
            source: "debian:bookworm".to_string(),
            img_path: None,
            storage_dir: None,
            mem: None,
            cpu: None,
            add_ifaces: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    /// Builds a `Worker` whose discovery reports `discovered` on "hostA"
    /// and whose fan-out runs through `executor` — no real subprocess,
    /// Docker daemon, or libvirt endpoint involved.
    fn worker_with(discovered: Vec<NodeSnapshot>, executor: MockNodeExecutor) -> Worker {
        let mut factory = MockDriverFactory::new();
        factory.expect_container().returning(move |_host| {
            let discovered = discovered.clone();
            let mut mock = MockHostDriver::new();
            mock.expect_list_nodes().returning(move |_| Ok(discovered.clone()));
            Arc::new(mock)
        });
        factory.expect_hypervisor().returning(|_host| {
            let mut mock = MockHostDriver::new();
            mock.expect_list_nodes().returning(|_| Ok(Vec::new()));
            Arc::new(mock)
        });
        let cache = ConnectionCache::new(Arc::new(factory));
        let managed_hosts = Arc::new(["hostA".to_string()].into_iter().collect());
        Worker::new(cache, Arc::new(executor), web_profiles(), managed_hosts)
    }

    #[tokio::test]
    async fn spawn_fan_out_reports_partial_failure() {
        let mut executor = MockNodeExecutor::new();
        executor
            .expect_spawn_node()
            .withf(|spec| spec.name == "web0")
            .returning(|_| Ok(()));
        executor
            .expect_spawn_node()
            .withf(|spec| spec.name == "web1")
            .returning(|_| Err(Error::AlreadyExists("web1".to_string())));
        let mut worker = worker_with(Vec::new(), executor);

        match worker.spawn("web", "web", 2, Some("hostA".to_string())).await {
            Reply::NodesetResult { nodeset, errors } => {
                assert_eq!(nodeset, "web0");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("web1"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_nodes_partial_failure_matches_mixed_found_and_missing() {
        let discovered = vec![snapshot("web1", "hostA"), snapshot("web2", "hostA")];
        let mut executor = MockNodeExecutor::new();
        executor.expect_stop_node().times(2).returning(|_, _, _, _| Ok(()));
        let mut worker = worker_with(discovered, executor);

        match worker.stop_nodes("web[1-2,9]").await {
            Reply::NodesetResult { nodeset, errors } => {
                assert_eq!(nodeset, "web[1-2]");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("web9"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_nodes_reports_driver_failure_alongside_successes() {
        let discovered = vec![snapshot("web1", "hostA"), snapshot("web2", "hostA")];
        let mut executor = MockNodeExecutor::new();
        executor
            .expect_stop_node()
            .withf(|name, _, _, _| name == "web1")
            .returning(|_, _, _, _| Ok(()));
        executor
            .expect_stop_node()
            .withf(|name, _, _, _| name == "web2")
            .returning(|_, _, _, _| Err(Error::DriverError("virsh destroy failed".to_string())));
        let mut worker = worker_with(discovered, executor);

        match worker.stop_nodes("web[1-2]").await {
            Reply::NodesetResult { nodeset, errors } => {
                assert_eq!(nodeset, "web1");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("web2"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
