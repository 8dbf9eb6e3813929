use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds returned by worker-visible operations. Every variant formats
/// into the error string reported back to a client; variants other than
/// `Internal` are expected to occur in normal operation and are matched on by
/// callers (e.g. the fan-out loop treats `NotFound` as a per-node error
/// rather than a bug).
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),
    #[error("host '{host}' unreachable: {source:#}")]
    HostUnreachable { host: String, source: eyre::Error },
    #[error("node '{0}' already exists")]
    AlreadyExists(String),
    #[error("node '{0}' not found")]
    NotFound(String),
    #[error("base image/domain '{0}' not available")]
    BaseMissing(String),
    #[error("driver error: {0}")]
    DriverError(String),
    #[error("hook failed: {0}")]
    HookFailed(String),
    #[error("internal error: {0:#}")]
    Internal(#[from] eyre::Error),
}

impl Error {
    /// The per-node error string format used throughout the fan-out
    /// protocol: `"Error: <message> (<node>)"`.
    pub fn for_node(&self, node: &str) -> String {
        format!("Error: {self} ({node})")
    }
}
