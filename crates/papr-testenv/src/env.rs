use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::cmd::CmdResult;
use crate::error::Result;

/// An isolated place a suite's build/test commands run.
///
/// Backends implement this for whatever the suite's `EnvSelector` resolves
/// to (container, host, cluster). `papr-engine`'s `SuiteRun` only ever talks
/// to this trait, never to a concrete backend, so new environment kinds can
/// be added without touching the executor.
#[async_trait]
pub trait TestEnv: Send + Sync {
    /// Brings the environment up. Must be idempotent with `teardown`: a
    /// `TestEnv` that was never provisioned tears down as a no-op.
    async fn provision(&mut self) -> Result<()>;

    /// Tears the environment down, releasing any held resources. Called
    /// even when `provision` or a later step failed, so it must tolerate a
    /// partially-provisioned state.
    async fn teardown(&mut self) -> Result<()>;

    /// Runs `cmd` with `env_vars` set, bounded by `timeout`. A non-zero
    /// exit or a timeout is reported in the returned [`CmdResult`], not as
    /// an `Err` — only infrastructure failure to even launch the command is
    /// an `Err`.
    async fn run_cmd(
        &self,
        cmd: &str,
        env_vars: &[(String, String)],
        timeout: Duration,
    ) -> Result<CmdResult>;

    /// Runs `cmd` and returns `Err` if it did not exit 0, matching the
    /// original `checked_cmd` helper used for provisioning-adjacent work
    /// that has no meaningful partial-failure path.
    async fn run_checked_cmd(
        &self,
        cmd: &str,
        env_vars: &[(String, String)],
        timeout: Duration,
    ) -> Result<CmdResult> {
        let result = self.run_cmd(cmd, env_vars, timeout).await?;
        if result.success() {
            Ok(result)
        } else if result.timed_out {
            Err(crate::error::TestEnvError::Timeout(timeout.as_secs()))
        } else {
            Err(crate::error::TestEnvError::Provision(format!(
                "command exited {:?}",
                result.exit_code
            )))
        }
    }

    /// Copies a local path into the environment.
    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copies a path out of the environment to a local destination.
    async fn copy_from(&self, remote: &str, local: &Path) -> Result<()>;
}
