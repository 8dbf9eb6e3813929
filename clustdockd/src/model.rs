//! Wire-stable data model for nodes, profiles and interfaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node status, wire-coded for the dispatcher protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeStatus {
    Created = 0,
    Running = 1,
    Unknown = 2,
    Paused = 3,
    ShuttingDown = 4,
    Stopped = 5,
    Crashed = 6,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Created => "created",
            NodeStatus::Running => "running",
            NodeStatus::Unknown => "unknown",
            NodeStatus::Paused => "paused",
            NodeStatus::ShuttingDown => "shutting-down",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// The two node materializations a cluster profile can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Container,
    Vm,
}

/// One extra network interface to attach at spawn time: `(bridge, ifname,
/// address|"dhcp")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddIface {
    pub bridge: String,
    pub ifname: String,
    /// Either a dotted IPv4 address or the literal string `"dhcp"`.
    pub address: String,
}

/// Hook paths a node carries; each is an optional executable invoked with
/// `(node_name, kind, host)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    pub before_start: Option<String>,
    pub after_start: Option<String>,
    pub after_end: Option<String>,
}

/// Kind-specific node attributes, carried alongside the common `Node` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSpecKind {
    Container {
        image: String,
        run_options: String,
    },
    Vm {
        base_domain: String,
        storage_dir: String,
        img_path: String,
        mem: Option<u32>,
        cpu: Option<u32>,
    },
}

/// A fully resolved node description, the output of
/// [`crate::profile::ClusterProfile::build_node_spec`]. This is what gets
/// handed to a `HostDriver::start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub clustername: String,
    pub idx: Option<u32>,
    pub host: String,
    pub add_ifaces: Vec<AddIface>,
    pub hooks: Hooks,
    pub kind: NodeSpecKind,
}

impl NodeSpec {
    pub fn kind_tag(&self) -> NodeKind {
        match &self.kind {
            NodeSpecKind::Container { .. } => NodeKind::Container,
            NodeSpecKind::Vm { .. } => NodeKind::Vm,
        }
    }
}

/// A node as discovered on a host, the shape returned by
/// `HostDriver::list_nodes` and sent over the wire for `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub clustername: String,
    pub idx: Option<u32>,
    pub host: String,
    pub ip: String,
    pub status: NodeStatus,
    pub kind: NodeKind,
    /// Container image name, or VM base domain name.
    pub source: String,
    pub img_path: Option<String>,
    pub storage_dir: Option<String>,
    pub mem: Option<u32>,
    pub cpu: Option<u32>,
    pub add_ifaces: Vec<AddIface>,
    pub hooks: Hooks,
}

/// Splits a node name into `(clustername, idx)`: the longest valid
/// clustername prefix plus a trailing decimal suffix, or `(name, None)` when
/// there is no such suffix.
pub fn split_name(name: &str) -> (String, Option<u32>) {
    crate::rangeset::split_name_impl(name)
}

/// `^[a-z][a-z_-]+$` — the clustername grammar.
pub fn valid_clustername(name: &str) -> bool {
    crate::rangeset::valid_clustername_impl(name)
}
