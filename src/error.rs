/// Crate-wide error types.
///
/// `SimError` covers the failure modes a simulation run can hit on its own
/// (bad configuration, unreadable trace files) and carries enough variants
/// for `main` to map each one to the CLI's documented exit code.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to read trace file {path}: {source}")]
    TraceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed kernel config {path}: {detail}")]
    MalformedKernelConfig { path: PathBuf, detail: String },

    #[error("assertion failed: {0}")]
    Assertion(String),
}

impl SimError {
    /// Process exit code this error category maps to, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::Assertion(_) => 15,
            _ => 1,
        }
    }
}
