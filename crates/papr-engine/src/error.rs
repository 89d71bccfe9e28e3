//! Error taxonomy per SPEC_FULL.md §7, layered the way the teacher layers
//! its own domain errors: a `thiserror` enum here for everything callers
//! must branch on, with `anyhow` reserved for `papr-cli`'s edge, where
//! errors only need to be logged and not matched on.

use papr_parser::ParseError;
use papr_testenv::TestEnvError;

#[derive(Debug, thiserror::Error)]
pub enum PaprError {
    /// The suite document itself could not be parsed or validated. Never
    /// escapes the driver: it's turned into a status + PR comment.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A provisioning failure traceable to user-supplied data (bad image,
    /// bad ostree ref). Reported as a `failure` status, not an infra error.
    #[error("environment could not be provisioned: {0}")]
    UserFacingProvision(String),

    /// Any other failure: forge outage, publisher outage, local disk full,
    /// a bug. Propagated out of the driver after every worker has joined.
    #[error("infrastructure failure: {0}")]
    Infra(String),

    /// The caller's expected head sha didn't match; not a failure, a soft
    /// exit the driver logs and returns from cleanly.
    #[error("ref raced: expected {expected}, found {actual}")]
    RefRaced { expected: String, actual: String },

    /// No recognized suite file exists in the checkout. Also a soft exit.
    #[error("no suite file found")]
    NoSuiteFile,

    /// `--suite CONTEXT` named a context that doesn't exist.
    #[error("unknown suite context {requested:?}; known contexts: {known:?}")]
    UnknownSuiteContext {
        requested: String,
        known: Vec<String>,
    },

    #[error(transparent)]
    TestEnv(#[from] TestEnvError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PaprError>;

impl PaprError {
    /// Whether this should propagate to the caller as an infrastructure
    /// failure needing retry, vs. being reported and swallowed.
    pub fn is_infra(&self) -> bool {
        matches!(self, PaprError::Infra(_) | PaprError::Io(_))
    }
}
