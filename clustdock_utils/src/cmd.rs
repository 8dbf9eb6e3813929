use eyre::{bail, Context, Result};
use std::ffi::OsStr;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Every `HostDriver` call (connect + single RPC/shell step) is bounded by
/// this timeout; exceeding it surfaces as `HostUnreachable` at the driver
/// layer rather than hanging a fan-out child indefinitely.
pub const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a command and returns an error if it doesn't exit with status zero.
/// Stdout/stderr are discarded; use [`run_cmd_capture`] when the output
/// matters.
pub async fn run_cmd<I, S>(cmd: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_cmd_capture(cmd, args).await?;
    if !output.status.success() {
        bail!(
            "command `{cmd}` failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Runs a command and returns its full output, regardless of exit status.
/// Callers that need stderr verbatim on failure (driver shell steps, hooks)
/// should use this rather than `run_cmd`. Bounded by [`DRIVER_CALL_TIMEOUT`].
pub async fn run_cmd_capture<I, S>(cmd: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(cmd);
    command.args(args);
    run_command(command, DRIVER_CALL_TIMEOUT).await
}

/// Runs an already-configured [`Command`] (env vars, args, etc. set by the
/// caller) under a deadline, failing with a descriptive error on timeout so
/// driver code can map it to `Error::HostUnreachable`.
pub async fn run_command(mut command: Command, timeout: Duration) -> Result<Output> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    info!("running command: {:?}", command);
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.with_context(|| format!("failed to spawn `{program}`"))?,
        Err(_) => bail!("command `{program}` timed out after {timeout:?}"),
    };
    debug!("command `{program}` exited with {}", output.status);
    Ok(output)
}

/// Wraps a shell-word list with an `ssh <host>` prefix when `host` isn't
/// `localhost`. Centralizes the localhost-vs-remote branch so driver call
/// sites don't each repeat it.
pub fn ssh_prefix(host: &str, cmd: &str) -> (String, Vec<String>) {
    if host == "localhost" {
        ("sh".to_string(), vec!["-c".to_string(), cmd.to_string()])
    } else {
        (
            "ssh".to_string(),
            vec![host.to_string(), cmd.to_string()],
        )
    }
}
