//! HookRunner: executes a user-supplied hook script with the node-name,
//! kind and host positional contract, surfacing a non-zero exit as an
//! error carrying stderr verbatim.

use crate::error::{Error, Result};
use crate::model::NodeKind;
use clustdock_utils::cmd::run_cmd_capture;
use tracing::debug;

/// Invokes `<hook> <node-name> <kind> <host>` and returns `Ok(())` on exit
/// 0. A missing executable or permission error surfaces through the same
/// non-zero path as a script that legitimately fails — there's nothing
/// special about either at this layer.
pub async fn run_hook(hook: &str, node_name: &str, kind: NodeKind, host: &str) -> Result<()> {
    let kind_arg = match kind {
        NodeKind::Container => "container",
        NodeKind::Vm => "vm",
    };
    debug!(%hook, node = %node_name, "running hook");
    let output = run_cmd_capture(hook, [node_name, kind_arg, host])
        .await
        .map_err(Error::Internal)?;
    if !output.status.success() {
        return Err(Error::HookFailed(String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(())
}

/// Runs `hook` if present; a missing hook is a no-op, not an error.
pub async fn run_optional_hook(
    hook: &Option<String>,
    node_name: &str,
    kind: NodeKind,
    host: &str,
) -> Result<()> {
    match hook {
        Some(hook) => run_hook(hook, node_name, kind, host).await,
        None => Ok(()),
    }
}
