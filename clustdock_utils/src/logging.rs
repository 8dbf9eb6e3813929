use tracing_subscriber::{self, util::SubscriberInitExt, EnvFilter, FmtSubscriber};

/// Install the global tracing subscriber. Level is controlled by `RUST_LOG`;
/// ANSI colors are disabled since clustdockd is typically run under a
/// supervisor that already timestamps and frames log lines.
pub fn setup_logging() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();
}
