//! Hypervisor driver: drives `virsh` against a libvirt control endpoint,
//! plus the auxiliary host shell work (disk cloning, hostname injection)
//! that NodeBuilder's XML transform alone can't do.

use crate::driver::HostDriver;
use crate::error::{Error, Result};
use crate::model::{NodeKind, NodeSnapshot, NodeSpec, NodeSpecKind, NodeStatus};
use crate::node_builder::{self, ExtraIface, XmlTransform};
use async_trait::async_trait;
use clustdock_utils::cmd::ssh_prefix;
use eyre::WrapErr;
use tracing::{debug, warn};

/// One managed host's libvirt endpoint, addressed as `qemu+ssh://<host>/system`
/// (or the local `qemu:///system` for `localhost`).
pub struct HypervisorDriver {
    host: String,
}

impl HypervisorDriver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn uri(&self) -> String {
        if self.host == "localhost" {
            "qemu:///system".to_string()
        } else {
            format!("qemu+ssh://{}/system", self.host)
        }
    }

    async fn virsh(&self, args: &[&str]) -> eyre::Result<std::process::Output> {
        let uri = self.uri();
        let mut full = vec!["-c", uri.as_str()];
        full.extend(args);
        debug!(host = %self.host, ?args, "running virsh");
        let mut command = tokio::process::Command::new("virsh");
        command.args(&full);
        clustdock_utils::cmd::run_command(command, clustdock_utils::cmd::DRIVER_CALL_TIMEOUT).await
    }

    async fn shell(&self, script: &str) -> eyre::Result<std::process::Output> {
        let (cmd, args) = ssh_prefix(&self.host, script);
        let mut command = tokio::process::Command::new(cmd);
        command.args(args);
        clustdock_utils::cmd::run_command(command, clustdock_utils::cmd::DRIVER_CALL_TIMEOUT).await
    }
}

#[async_trait]
impl HostDriver for HypervisorDriver {
    async fn list_nodes(&self, include_stopped: bool) -> Result<Vec<NodeSnapshot>> {
        let mut args = vec!["list", "--name"];
        if include_stopped {
            args.push("--all");
        }
        let out = self.virsh(&args).await.map_err(|e| Error::HostUnreachable {
            host: self.host.clone(),
            source: e,
        })?;
        if !out.status.success() {
            return Err(Error::DriverError(String::from_utf8_lossy(&out.stderr).into_owned()));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let mut snapshots = Vec::new();
        for name in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let state_out = self.virsh(&["domstate", name]).await.map_err(|e| {
                Error::HostUnreachable {
                    host: self.host.clone(),
                    source: e,
                }
            })?;
            let status = virsh_state_to_status(String::from_utf8_lossy(&state_out.stdout).trim());
            let (clustername, idx) = crate::model::split_name(name);

            let meta_out = self
                .virsh(&["metadata", name, "clustdock.after_end", "--key", "clustdock"])
                .await
                .ok();
            let after_end = meta_out
                .filter(|o| o.status.success())
                .and_then(|o| parse_after_end_path(&String::from_utf8_lossy(&o.stdout)));

            snapshots.push(NodeSnapshot {
                name: name.to_string(),
                clustername,
                idx,
                host: self.host.clone(),
                ip: String::new(),
                status,
                kind: NodeKind::Vm,
                source: String::new(),
                img_path: None,
                storage_dir: None,
                mem: None,
                cpu: None,
                add_ifaces: Vec::new(),
                hooks: crate::model::Hooks {
                    before_start: None,
                    after_start: None,
                    after_end,
                },
            });
        }
        Ok(snapshots)
    }

    async fn start(&self, spec: &NodeSpec) -> Result<()> {
        let NodeSpecKind::Vm {
            base_domain,
            storage_dir,
            img_path,
            mem,
            cpu,
        } = &spec.kind
        else {
            return Err(Error::DriverError(
                "hypervisor driver given a non-vm node spec".to_string(),
            ));
        };

        let existing = self.list_nodes(true).await?;
        if existing.iter().any(|n| n.name == spec.name) {
            return Err(Error::AlreadyExists(spec.name.clone()));
        }

        let dumpxml = self.virsh(&["dumpxml", base_domain]).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !dumpxml.status.success() {
            return Err(Error::BaseMissing(base_domain.clone()));
        }
        let base_xml = String::from_utf8_lossy(&dumpxml.stdout);

        let extra_ifaces: Vec<ExtraIface> = spec
            .add_ifaces
            .iter()
            .map(|i| ExtraIface { bridge: &i.bridge })
            .collect();
        let transform = XmlTransform {
            name: &spec.name,
            img_path,
            extra_ifaces: &extra_ifaces,
            mem: *mem,
            cpu: *cpu,
        };
        let built = node_builder::build_xml(&base_xml, &transform)
            .map_err(|e| Error::DriverError(e.to_string()))?;

        let clone_cmd = format!(
            "qemu-img create -f qcow2 -b {} {} && chmod a+w {}",
            built.baseimg_path, img_path, img_path
        );
        let clone_out = self
            .shell(&clone_cmd)
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        if !clone_out.status.success() {
            return Err(Error::DriverError(String::from_utf8_lossy(&clone_out.stderr).into_owned()));
        }

        let hostname_cmd = format!(
            "guestfish -i -a {} write /etc/hostname '{}'",
            img_path, spec.name
        );
        let hostname_out =
            self.shell(&hostname_cmd)
                .await
                .map_err(|e| Error::HostUnreachable {
                    host: self.host.clone(),
                    source: e,
                })?;
        if !hostname_out.status.success() {
            warn!(node = %spec.name, storage_dir = %storage_dir, "rolling back after hostname injection failure");
            let _ = self.remove_disk(img_path).await;
            return Err(Error::DriverError(
                String::from_utf8_lossy(&hostname_out.stderr).into_owned(),
            ));
        }

        let define_out = self.define_from_xml(&built.xml).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !define_out.status.success() {
            let _ = self.remove_disk(img_path).await;
            return Err(Error::DriverError(
                String::from_utf8_lossy(&define_out.stderr).into_owned(),
            ));
        }

        if let Some(after_end) = &spec.hooks.after_end {
            let meta = format!(
                "virsh metadata {name} clustdock --key clustdock --set '<clustdock/>' \
                 && virsh metadata {name} clustdock.after_end --key clustdock --set '<after_end path=\"{path}\"/>'",
                name = spec.name,
                path = after_end,
            );
            let _ = self.shell(&meta).await;
        }

        let start_out = self.virsh(&["start", &spec.name]).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !start_out.status.success() {
            let _ = self.virsh(&["undefine", &spec.name]).await;
            let _ = self.remove_disk(img_path).await;
            return Err(Error::DriverError(
                String::from_utf8_lossy(&start_out.stderr).into_owned(),
            ));
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let meta_out = self
            .virsh(&["metadata", name, "clustdock.after_end", "--key", "clustdock"])
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        let after_end = parse_after_end_path(&String::from_utf8_lossy(&meta_out.stdout));

        let dumpxml = self.virsh(&["dumpxml", name]).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !dumpxml.status.success() {
            return Err(Error::NotFound(name.to_string()));
        }
        let img_path = extract_disk_img_path(&String::from_utf8_lossy(&dumpxml.stdout));

        let _ = self.virsh(&["destroy", name]).await;
        let undefine_out = self.virsh(&["undefine", name]).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !undefine_out.status.success() {
            return Err(Error::DriverError(
                String::from_utf8_lossy(&undefine_out.stderr).into_owned(),
            ));
        }

        match img_path {
            Some(img_path) => {
                if let Err(e) = self.remove_disk(&img_path).await {
                    warn!(node = %name, error = %e, "failed to remove disk image after stop");
                }
            }
            None => warn!(node = %name, "could not determine disk image path, leaving image in place"),
        }

        if let Some(hook) = after_end {
            debug!(node = %name, hook = %hook, "after_end hook recorded in metadata");
        }
        Ok(())
    }

    async fn query_ip(&self, name: &str) -> Result<String> {
        let dumpxml = self.virsh(&["dumpxml", name]).await.map_err(|e| {
            Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            }
        })?;
        if !dumpxml.status.success() {
            return Err(Error::NotFound(name.to_string()));
        }
        let xml = String::from_utf8_lossy(&dumpxml.stdout);
        let Some(mac) = extract_first_mac(&xml) else {
            return Ok(String::new());
        };
        let neigh = self
            .shell(&format!("ip neigh | grep '{mac}' | awk '{{print $1}}'"))
            .await
            .map_err(|e| Error::HostUnreachable {
                host: self.host.clone(),
                source: e,
            })?;
        Ok(String::from_utf8_lossy(&neigh.stdout).trim().to_string())
    }

    async fn alive(&self) -> bool {
        self.virsh(&["uri"]).await.map(|o| o.status.success()).unwrap_or(false)
    }
}

impl HypervisorDriver {
    async fn define_from_xml(&self, xml: &str) -> eyre::Result<std::process::Output> {
        let tmp = format!("/tmp/clustdock-{}.xml", uuid_like());
        tokio::fs::write(&tmp, xml).await.wrap_err("writing domain xml")?;
        let out = self.virsh(&["define", &tmp]).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        out
    }

    async fn remove_disk(&self, img_path: &str) -> eyre::Result<()> {
        let out = self.shell(&format!("rm -f {img_path}")).await?;
        if !out.status.success() {
            eyre::bail!("failed to remove disk image '{img_path}'");
        }
        Ok(())
    }
}

fn uuid_like() -> String {
    format!("{:x}", std::process::id())
}

fn virsh_state_to_status(state: &str) -> NodeStatus {
    match state {
        "running" => NodeStatus::Running,
        "paused" => NodeStatus::Paused,
        "in shutdown" => NodeStatus::ShuttingDown,
        "shut off" => NodeStatus::Stopped,
        "crashed" => NodeStatus::Crashed,
        "pmsuspended" => NodeStatus::Paused,
        _ => NodeStatus::Unknown,
    }
}

fn parse_after_end_path(metadata_xml: &str) -> Option<String> {
    let start = metadata_xml.find("path=\"")? + "path=\"".len();
    let end = metadata_xml[start..].find('"')?;
    Some(metadata_xml[start..start + end].to_string())
}

fn extract_first_mac(domain_xml: &str) -> Option<String> {
    let needle = "mac address=\"";
    let start = domain_xml.find(needle)? + needle.len();
    let end = domain_xml[start..].find('"')?;
    Some(domain_xml[start..start + end].to_string())
}

/// Reads the primary disk's backing file straight off a domain's dumped
/// XML, the same way `extract_first_mac` reads the MAC: a plain substring
/// search rather than a full parse. Used by `stop` so the disk image can be
/// removed without the driver having to track `img_path` separately.
fn extract_disk_img_path(domain_xml: &str) -> Option<String> {
    let needle = "source file=\"";
    let start = domain_xml.find(needle)? + needle.len();
    let end = domain_xml[start..].find('"')?;
    Some(domain_xml[start..start + end].to_string())
}
