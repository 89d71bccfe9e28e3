use std::time::Duration;

/// The outcome of one command run inside a [`crate::TestEnv`].
///
/// A `CmdResult` always carries a log; `timed_out` and `exit_code` are
/// mutually informative the same way the original shell-runner's markers
/// were (`### COMPLETED IN` vs `### TIMED OUT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdResult {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
