//! Container driver: talks to a container engine over a TCP endpoint on the
//! managed host, shelling out to the `docker` CLI the way the daemon's
//! other host-side work (disk cloning, hostname injection) shells out too.

use crate::driver::HostDriver;
use crate::error::{Error, Result};
use crate::model::{AddIface, NodeKind, NodeSnapshot, NodeSpec, NodeSpecKind, NodeStatus};
use async_trait::async_trait;
use tracing::{debug, warn};

/// One managed host's container endpoint.
pub struct ContainerDriver {
    host: String,
    docker_port: u16,
}

impl ContainerDriver {
    pub fn new(host: impl Into<String>, docker_port: u16) -> Self {
        Self {
            host: host.into(),
            docker_port,
        }
    }

    /// `DOCKER_HOST=tcp://<host>:<port>` env override, empty for the local
    /// host. Built fresh per command rather than cached on the struct.
    fn docker_env(&self) -> Vec<(String, String)> {
        if self.host == "localhost" {
            Vec::new()
        } else {
            vec![(
                "DOCKER_HOST".to_string(),
                format!("tcp://{}:{}", self.host, self.docker_port),
            )]
        }
    }

    async fn docker(&self, args: &[&str]) -> eyre::Result<std::process::Output> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(args);
        for (k, v) in self.docker_env() {
            cmd.env(k, v);
        }
        debug!(host = %self.host, ?args, "running docker");
        clustdock_utils::cmd::run_command(cmd, clustdock_utils::cmd::DRIVER_CALL_TIMEOUT).await
    }

    async fn shell(&self, script: &str) -> eyre::Result<std::process::Output> {
        let (cmd, args) = clustdock_utils::cmd::ssh_prefix(&self.host, script);
        let mut command = tokio::process::Command::new(cmd);
        command.args(args);
        clustdock_utils::cmd::run_command(command, clustdock_utils::cmd::DRIVER_CALL_TIMEOUT).await
    }

    async fn add_iface(&self, name: &str, iface: &AddIface) -> eyre::Result<()> {
        let probe = self
            .shell(&format!("ip addr show {} | grep 'inet ' | awk '{{print $2}}'", iface.bridge))
            .await?;
        if probe.stdout.is_empty() {
            eyre::bail!("bridge '{}' not found on host '{}'", iface.bridge, self.host);
        }

        let is_ovs = self
            .shell(&format!("ovs-vsctl br-exists {}", iface.bridge))
            .await?
            .status
            .success();

        if is_ovs {
            let mut cmd = format!(
                "ovs-docker add-port {} {} {}",
                iface.bridge, iface.ifname, name
            );
            if iface.address != "dhcp" {
                cmd.push_str(&format!(" --ipaddress={}", iface.address));
            }
            let out = self.shell(&cmd).await?;
            if !out.status.success() {
                eyre::bail!("adding interface on bridge '{}' failed", iface.bridge);
            }
            return Ok(());
        }

        let pid_out = self
            .docker(&["inspect", "-f", "{{.State.Pid}}", name])
            .await?;
        let pid = String::from_utf8_lossy(&pid_out.stdout).trim().to_string();
        let a_if = format!("v{}pl{}", iface.ifname, pid);
        let b_if = format!("v{}pg{}", iface.ifname, pid);
        let script = format!(
            "mkdir -p /var/run/netns\n\
             ln -s /proc/{pid}/ns/net /var/run/netns/{pid}\n\
             ip link add {a_if} type veth peer name {b_if}\n\
             brctl addif {bridge} {a_if}\n\
             ip link set {a_if} up\n\
             ip link set {b_if} netns {pid}\n\
             ip netns exec {pid} ip link set dev {b_if} name {ifname}\n\
             ip netns exec {pid} ip link set {ifname} up\n\
             rm -f /var/run/netns/{pid}",
            pid = pid,
            a_if = a_if,
            b_if = b_if,
            bridge = iface.bridge,
            ifname = iface.ifname,
        );
        let out = self.shell(&script).await?;
        if !out.status.success() {
            eyre::bail!("adding interface on bridge '{}' failed", iface.bridge);
        }
        Ok(())
    }
}

#[async_trait]
impl HostDriver for ContainerDriver {
    async fn list_nodes(&self, include_stopped: bool) -> Result<Vec<NodeSnapshot>> {
        let format = "{{.Names}}\t{{.Image}}\t{{.State}}";
        let mut args = vec!["ps", "--format", format];
        if include_stopped {
            args.push("-a");
        }
        let out = self
            .docker(&args)
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        if !out.status.success() {
            return Err(Error::DriverError(String::from_utf8_lossy(&out.stderr).into_owned()));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let mut snapshots = Vec::new();
        for line in stdout.lines() {
            let mut fields = line.splitn(3, '\t');
            let (Some(name), Some(image), Some(state)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let (clustername, idx) = crate::model::split_name(name);
            snapshots.push(NodeSnapshot {
                name: name.to_string(),
                clustername,
                idx,
                host: self.host.clone(),
                ip: String::new(),
                status: docker_state_to_status(state),
                kind: NodeKind::Container,
                source: image.to_string(),
                img_path: None,
                storage_dir: None,
                mem: None,
                cpu: None,
                add_ifaces: Vec::new(),
                hooks: crate::model::Hooks::default(),
            });
        }
        Ok(snapshots)
    }

    async fn start(&self, spec: &NodeSpec) -> Result<()> {
        let NodeSpecKind::Container { image, run_options } = &spec.kind else {
            return Err(Error::DriverError(
                "container driver given a non-container node spec".to_string(),
            ));
        };

        let existing = self.list_nodes(true).await?;
        if existing.iter().any(|n| n.name == spec.name) {
            return Err(Error::AlreadyExists(spec.name.clone()));
        }

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-t".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-h".to_string(),
            spec.name.clone(),
            "--cap-add".to_string(),
            "NET_RAW".to_string(),
            "--cap-add".to_string(),
            "NET_ADMIN".to_string(),
        ];
        args.extend(shell_words(run_options));
        args.push(image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.docker(&arg_refs).await.map_err(|e| Error::HostUnreachable {
            host: self.host.clone(),
            source: e,
        })?;
        if !out.status.success() {
            return Err(Error::DriverError(String::from_utf8_lossy(&out.stderr).into_owned()));
        }

        for iface in &spec.add_ifaces {
            if let Err(e) = self.add_iface(&spec.name, iface).await {
                warn!(node = %spec.name, error = %e, "extra interface attachment failed, rolling back");
                let _ = self.stop(&spec.name).await;
                return Err(Error::DriverError(e.to_string()));
            }
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let out = self
            .docker(&["rm", "-f", "-v", name])
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("No such container") {
                return Err(Error::NotFound(name.to_string()));
            }
            return Err(Error::DriverError(stderr.into_owned()));
        }
        Ok(())
    }

    async fn query_ip(&self, name: &str) -> Result<String> {
        let out = self
            .docker(&["exec", name, "ip", "a", "show", "scope", "global"])
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        for line in stdout.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("inet ") {
                if let Some(addr) = rest.split_whitespace().next() {
                    return Ok(addr.split('/').next().unwrap_or("").to_string());
                }
            }
        }
        Ok(String::new())
    }

    async fn alive(&self) -> bool {
        self.docker(&["info"]).await.map(|o| o.status.success()).unwrap_or(false)
    }
}

fn docker_state_to_status(state: &str) -> NodeStatus {
    match state.to_ascii_lowercase().as_str() {
        "running" => NodeStatus::Running,
        "paused" => NodeStatus::Paused,
        "restarting" | "removing" => NodeStatus::ShuttingDown,
        "exited" | "dead" => NodeStatus::Stopped,
        "created" => NodeStatus::Created,
        _ => NodeStatus::Unknown,
    }
}

/// Minimal whitespace shell-word split for a profile's free-form
/// `run_options` string (e.g. `"--cap-add=NET_ADMIN --privileged"`).
fn shell_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
