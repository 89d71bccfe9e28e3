use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cmd::CmdResult;
use crate::env::TestEnv;
use crate::error::Result;

/// An in-memory [`TestEnv`] for exercising `papr-engine` without spawning
/// real processes. Scripted responses are matched by exact command string;
/// anything unscripted exits 0 with empty output.
pub struct FakeEnv {
    scripted: Mutex<Vec<(String, CmdResult)>>,
    provisioned: Mutex<bool>,
    pub copies_in: Mutex<Vec<(String, String)>>,
    pub copies_out: Mutex<Vec<(String, String)>>,
}

impl FakeEnv {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(Vec::new()),
            provisioned: Mutex::new(false),
            copies_in: Mutex::new(Vec::new()),
            copies_out: Mutex::new(Vec::new()),
        }
    }

    pub async fn script(&self, cmd: impl Into<String>, result: CmdResult) {
        self.scripted.lock().await.push((cmd.into(), result));
    }

    fn ok(out: &str) -> CmdResult {
        CmdResult {
            exit_code: Some(0),
            timed_out: false,
            stdout: out.to_string(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub async fn script_ok(&self, cmd: impl Into<String>, stdout: &str) {
        self.script(cmd, Self::ok(stdout)).await;
    }

    pub async fn script_failure(&self, cmd: impl Into<String>, exit_code: i32) {
        self.script(
            cmd,
            CmdResult {
                exit_code: Some(exit_code),
                timed_out: false,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
            },
        )
        .await;
    }

    pub async fn script_timeout(&self, cmd: impl Into<String>) {
        self.script(
            cmd,
            CmdResult {
                exit_code: None,
                timed_out: true,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
            },
        )
        .await;
    }
}

impl Default for FakeEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestEnv for FakeEnv {
    async fn provision(&mut self) -> Result<()> {
        *self.provisioned.lock().await = true;
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        *self.provisioned.lock().await = false;
        Ok(())
    }

    async fn run_cmd(
        &self,
        cmd: &str,
        _env_vars: &[(String, String)],
        _timeout: Duration,
    ) -> Result<CmdResult> {
        let scripted = self.scripted.lock().await;
        for (scripted_cmd, result) in scripted.iter() {
            if scripted_cmd == cmd {
                return Ok(result.clone());
            }
        }
        Ok(Self::ok(""))
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        self.copies_in
            .lock()
            .await
            .push((local.to_string_lossy().into_owned(), remote.to_string()));
        Ok(())
    }

    async fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        self.copies_out
            .lock()
            .await
            .push((remote.to_string(), local.to_string_lossy().into_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_commands_succeed_empty() {
        let env = FakeEnv::new();
        let result = env.run_cmd("anything", &[], Duration::from_secs(1)).await.unwrap();
        assert!(result.success());
    }

    #[tokio::test]
    async fn scripted_commands_return_the_recorded_result() {
        let env = FakeEnv::new();
        env.script_failure("make check", 2).await;
        let result = env
            .run_cmd("make check", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(2));
        assert!(!result.success());
    }
}
