use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::cmd::CmdResult;
use crate::env::TestEnv;
use crate::error::{Result, TestEnvError};

/// A [`TestEnv`] for environment kinds this build doesn't implement a real
/// backend for (host, cluster). Fails at `provision`, the same point a real
/// backend would fail if it genuinely couldn't bring the environment up, so
/// it reports through the ordinary provisioning-failure path instead of a
/// separate one.
pub struct UnsupportedEnv {
    reason: String,
}

impl UnsupportedEnv {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TestEnv for UnsupportedEnv {
    async fn provision(&mut self) -> Result<()> {
        Err(TestEnvError::Internal(self.reason.clone()))
    }

    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run_cmd(
        &self,
        _cmd: &str,
        _env_vars: &[(String, String)],
        _timeout: Duration,
    ) -> Result<CmdResult> {
        Err(TestEnvError::Internal(self.reason.clone()))
    }

    async fn copy_to(&self, _local: &Path, _remote: &str) -> Result<()> {
        Err(TestEnvError::Internal(self.reason.clone()))
    }

    async fn copy_from(&self, _remote: &str, _local: &Path) -> Result<()> {
        Err(TestEnvError::Internal(self.reason.clone()))
    }
}
