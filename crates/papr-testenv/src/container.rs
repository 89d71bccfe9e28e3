use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::cmd::CmdResult;
use crate::env::TestEnv;
use crate::error::{Result, TestEnvError};

/// A local-process stand-in for a containerized test environment.
///
/// Real container provisioning (image pull, namespace/cgroup setup) is out
/// of scope; this backend runs commands through `sh -c` rooted at a
/// dedicated working directory, which is enough to exercise the full
/// suite-run state machine end to end. It mirrors the shape of
/// `CiRunner::execute_stage` in spirit: pipe stdout/stderr, bound the run
/// with a timeout, and turn a timed-out child into a non-error `CmdResult`.
pub struct ContainerEnv {
    image: String,
    root: PathBuf,
    provisioned: bool,
}

impl ContainerEnv {
    pub fn new(image: impl Into<String>, root: PathBuf) -> Self {
        Self {
            image: image.into(),
            root,
            provisioned: false,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

#[async_trait]
impl TestEnv for ContainerEnv {
    async fn provision(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        self.provisioned = true;
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        if self.provisioned {
            let _ = tokio::fs::remove_dir_all(&self.root).await;
            self.provisioned = false;
        }
        Ok(())
    }

    async fn run_cmd(
        &self,
        cmd: &str,
        env_vars: &[(String, String)],
        timeout: Duration,
    ) -> Result<CmdResult> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env_vars {
            command.env(k, v);
        }

        let start = Instant::now();
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CmdResult {
                exit_code: output.status.code(),
                timed_out: false,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                elapsed: start.elapsed(),
            }),
            Ok(Err(e)) => Err(TestEnvError::Io(e)),
            Err(_) => Ok(CmdResult {
                exit_code: None,
                timed_out: true,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: start.elapsed(),
            }),
        }
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        let dest = self.root.join(remote.trim_start_matches('/'));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if local.is_dir() {
            copy_dir_recursive(local, &dest)?;
        } else {
            tokio::fs::copy(local, &dest).await?;
        }
        Ok(())
    }

    async fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        let src = self.root.join(remote.trim_start_matches('/'));
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if src.is_dir() {
            copy_dir_recursive(&src, local)?;
        } else {
            tokio::fs::copy(&src, local).await?;
        }
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dest_path = dest.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_command_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ContainerEnv::new("fedora", dir.path().join("root"));
        env.provision().await.unwrap();
        let result = env
            .run_cmd("echo hello", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        env.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn times_out_long_running_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ContainerEnv::new("fedora", dir.path().join("root"));
        env.provision().await.unwrap();
        let result = env
            .run_cmd("sleep 5", &[], Duration::from_millis(50))
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn env_vars_are_visible_to_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ContainerEnv::new("fedora", dir.path().join("root"));
        env.provision().await.unwrap();
        let result = env
            .run_cmd(
                "echo $PAPR_FOO",
                &[("PAPR_FOO".to_string(), "bar".to_string())],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "bar");
    }
}
