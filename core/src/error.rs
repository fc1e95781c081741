use thiserror::Error;

/// Failures a caller is expected to show to a user verbatim.
///
/// Not-found and precondition failures live here; plain I/O errors are
/// propagated through `anyhow` by the crates that touch the disk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("rule not found: {0}")]
    RuleNotFound(String),
    #[error("run {0} has no port scan XML")]
    MissingPortScan(String),
    #[error("scan report no longer exists: {0}")]
    ReportMissing(String),
    #[error("Rule already exists for port {port}/{protocol} on network \"{network}\"")]
    DuplicateRule { port: u16, protocol: String, network: String },
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("invalid network name: {0:?}")]
    InvalidNetwork(String),
    #[error("invalid device: {0}")]
    InvalidDevice(String),
}
