use clustdockd::executor::{self, NODE_OP_ARG};
use clustdockd::{config::Config, dispatcher};
use eyre::Result;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "/etc/clustdock/clustdockd.toml";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Re-exec'd as a per-node fan-out child (see `executor::SubprocessExecutor`):
    // run the single node op piped on stdin and exit, skipping the dispatcher
    // entirely. Checked before logging setup so the child's stdout stays
    // reserved for nothing but its exit status.
    if std::env::args().nth(1).as_deref() == Some(NODE_OP_ARG) {
        return executor::run_child().await;
    }

    clustdock_utils::logging::setup_logging();
    info!(
        "starting {} {} ...",
        env!("CARGO_BIN_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config_path =
        std::env::var("CLUSTDOCKD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path).await?;
    dispatcher::run(config).await
}
