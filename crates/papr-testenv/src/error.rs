//! Error taxonomy for test environment provisioning and command execution.

/// Errors raised while provisioning, tearing down, or driving a test
/// environment. These are infrastructure errors: callers must treat them
/// differently from a command simply exiting non-zero inside the env.
#[derive(Debug, thiserror::Error)]
pub enum TestEnvError {
    #[error("failed to provision environment: {0}")]
    Provision(String),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment type not supported: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TestEnvError>;
