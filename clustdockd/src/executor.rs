//! Per-node fan-out execution. A crash or hang in one node's spawn/stop
//! work must not poison its siblings, so each node op runs in its own OS
//! process rather than as an in-process task: [`SubprocessExecutor`]
//! re-execs the daemon's own binary as a child per node, feeding it a
//! serialized [`NodeOp`] over stdin. [`NodeExecutor`] is the seam a
//! Worker-level test substitutes a fake across (see `worker.rs`'s fan-out
//! tests) without spawning real children.

use crate::error::{Error, Result};
use crate::model::{NodeKind, NodeSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// The hidden subcommand `bin/clustdockd.rs` dispatches to when re-exec'd
/// as a per-node child; never appears in the public CLI surface.
pub const NODE_OP_ARG: &str = "__node-op";

/// A node op is given this long to run start-to-finish (hooks included)
/// before the parent gives up on the child and reports the host
/// unreachable. Comfortably above `DRIVER_CALL_TIMEOUT`, which already
/// bounds the slowest single step inside it.
const CHILD_TIMEOUT: Duration = Duration::from_secs(90);

/// One node's spawn or stop work, serialized across the subprocess
/// boundary. Carries everything the child needs to build its own driver
/// and run the hook/driver sequence without any state from the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeOp {
    Spawn {
        spec: NodeSpec,
        docker_port: u16,
    },
    Stop {
        name: String,
        kind: NodeKind,
        host: String,
        after_end: Option<String>,
        docker_port: u16,
    },
}

impl NodeOp {
    fn host(&self) -> &str {
        match self {
            NodeOp::Spawn { spec, .. } => &spec.host,
            NodeOp::Stop { host, .. } => host,
        }
    }
}

/// The fan-out seam: `spawn`/`stop_nodes` drive every node through this
/// trait rather than calling a `HostDriver` directly, so the isolation
/// mechanism (real subprocess vs. a test fake) is swappable independent of
/// the aggregation logic around it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn spawn_node(&self, spec: &NodeSpec) -> Result<()>;

    async fn stop_node(
        &self,
        name: &str,
        kind: NodeKind,
        host: &str,
        after_end: Option<&str>,
    ) -> Result<()>;
}

/// Re-execs the current binary with [`NODE_OP_ARG`] for every node op. The
/// isolation boundary is the OS process, not a Tokio task: a panic,
/// deadlock, or runaway shell step in one child can't touch the dispatcher
/// or any sibling node's work.
pub struct SubprocessExecutor {
    docker_port: u16,
}

impl SubprocessExecutor {
    pub fn new(docker_port: u16) -> Self {
        Self { docker_port }
    }

    async fn run(&self, op: &NodeOp) -> Result<()> {
        let exe = std::env::current_exe().map_err(|e| Error::Internal(e.into()))?;
        let mut child = tokio::process::Command::new(exe)
            .arg(NODE_OP_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(e.into()))?;

        let payload = serde_json::to_vec(op).map_err(|e| Error::Internal(e.into()))?;
        let mut stdin = child.stdin.take().expect("child spawned with piped stdin");
        stdin.write_all(&payload).await.map_err(|e| Error::Internal(e.into()))?;
        drop(stdin);

        let output = match tokio::time::timeout(CHILD_TIMEOUT, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::Internal(e.into()))?,
            Err(_) => {
                warn!(host = op.host(), timeout = ?CHILD_TIMEOUT, "node-op child timed out");
                return Err(Error::HostUnreachable {
                    host: op.host().to_string(),
                    source: eyre::eyre!("node-op child exceeded {CHILD_TIMEOUT:?}"),
                });
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(Error::DriverError(if stderr.is_empty() {
            format!("node-op child exited with {}", output.status)
        } else {
            stderr
        }))
    }
}

#[async_trait]
impl NodeExecutor for SubprocessExecutor {
    async fn spawn_node(&self, spec: &NodeSpec) -> Result<()> {
        self.run(&NodeOp::Spawn {
            spec: spec.clone(),
            docker_port: self.docker_port,
        })
        .await
    }

    async fn stop_node(
        &self,
        name: &str,
        kind: NodeKind,
        host: &str,
        after_end: Option<&str>,
    ) -> Result<()> {
        self.run(&NodeOp::Stop {
            name: name.to_string(),
            kind,
            host: host.to_string(),
            after_end: after_end.map(str::to_string),
            docker_port: self.docker_port,
        })
        .await
    }
}

/// Entry point for the re-exec'd child: reads one [`NodeOp`] as JSON from
/// stdin, runs it against a freshly built driver, and translates the
/// result into an exit code — 0 on success, 1 with the error's `Display`
/// on stderr otherwise.
pub async fn run_child() -> eyre::Result<()> {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    tokio::io::stdin().read_to_end(&mut buf).await?;
    let op: NodeOp = serde_json::from_slice(&buf)?;

    let result = match op {
        NodeOp::Spawn { spec, docker_port } => {
            let driver = crate::nodework::driver_for(spec.kind_tag(), &spec.host, docker_port);
            crate::nodework::spawn_one(driver, &spec).await
        }
        NodeOp::Stop { name, kind, host, after_end, docker_port } => {
            let driver = crate::nodework::driver_for(kind, &host, docker_port);
            crate::nodework::stop_one(driver, &name, kind, &host, after_end.as_deref()).await
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
