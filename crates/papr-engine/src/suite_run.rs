//! The per-suite executor: provision, stage checkout, assemble commands,
//! run with timeout accounting, collect artifacts, publish, report.
//!
//! Grounded on `CiPipeline::run`'s sequential stage loop (phase-scoped
//! status updates, error-to-event conversion) and
//! `original_source/papr/testrun.py`'s `TestSuiteRun`, which this mirrors
//! step for step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use papr_parser::{BuildDirective, CanonicalSuite};
use papr_testenv::TestEnv;
use tracing::{info, warn};

use crate::error::{PaprError, Result};
use crate::forge::{post_status_resilient, ForgeClient, StatusState};
use crate::publisher::Publisher;
use crate::revision::Revision;

const CHECKOUT_DIR: &str = "checkout";

/// The outcome of one suite's run, shipped back to the driver exactly
/// once (§3 SuiteRun state).
#[derive(Debug, Clone)]
pub struct SuiteRunResult {
    pub context: String,
    pub completed: bool,
    pub rc: Option<i32>,
    pub timed_out: bool,
    pub publish_url: Option<String>,
    pub required: bool,
}

impl SuiteRunResult {
    pub fn passed(&self) -> bool {
        self.completed && !self.timed_out && self.rc == Some(0)
    }
}

pub struct SuiteRunInput {
    pub revision: Revision,
    pub suite: CanonicalSuite,
    pub local_checkout: PathBuf,
    pub staging_dir: PathBuf,
    pub forge: Arc<dyn ForgeClient>,
    pub publisher: Arc<dyn Publisher>,
    pub build_id: Option<String>,
    pub landing_fallback_url: String,
}

/// Runs one suite to completion inside `env`. Teardown always runs before
/// returning, on every exit path, per §3's lifecycle rule.
pub async fn run_suite(mut env: Box<dyn TestEnv>, input: SuiteRunInput) -> Result<SuiteRunResult> {
    let SuiteRunInput {
        revision,
        suite,
        local_checkout,
        staging_dir,
        forge,
        publisher,
        build_id,
        landing_fallback_url,
    } = input;

    let result = run_suite_inner(
        env.as_mut(),
        &revision,
        &suite,
        &local_checkout,
        &staging_dir,
        forge.as_ref(),
        publisher.as_ref(),
        &build_id,
        &landing_fallback_url,
    )
    .await;

    if let Err(e) = env.teardown().await {
        warn!(context = %suite.context, error = %e, "teardown failed");
    }
    let _ = std::fs::remove_dir_all(&staging_dir);

    let result = result?;

    // A provisioning failure already posted its own `failure` status from
    // inside `run_suite_inner`; don't post a second, misleading one here.
    if result.completed {
        let (state, description) = final_status(&result);
        for sha in revision.status_targets() {
            post_status_resilient(
                forge.as_ref(),
                sha,
                state,
                &suite.context,
                Some(&description),
                result.publish_url.as_deref().or(Some(&landing_fallback_url)),
            )
            .await
            .map_err(|e| PaprError::Infra(e.to_string()))?;
        }
    }

    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn run_suite_inner(
    env: &mut dyn TestEnv,
    revision: &Revision,
    suite: &CanonicalSuite,
    local_checkout: &Path,
    staging_dir: &Path,
    forge: &dyn ForgeClient,
    publisher: &dyn Publisher,
    build_id: &Option<String>,
    landing_fallback_url: &str,
) -> Result<SuiteRunResult> {
    // 1. Provisioning.
    post_status_resilient(
        forge,
        &revision.head_sha,
        StatusState::Pending,
        &suite.context,
        Some(&format!("Scheduling {}...", suite.env.kind_name())),
        None,
    )
    .await
    .map_err(|e| PaprError::Infra(e.to_string()))?;

    if let Err(e) = env.provision().await {
        post_status_resilient(
            forge,
            &revision.head_sha,
            StatusState::Failure,
            &suite.context,
            Some(&e.to_string()),
            None,
        )
        .await
        .map_err(|e| PaprError::Infra(e.to_string()))?;
        return Ok(SuiteRunResult {
            context: suite.context.clone(),
            completed: false,
            rc: None,
            timed_out: false,
            publish_url: None,
            required: suite.required,
        });
    }

    // 2. Preparing.
    env.copy_to(local_checkout, CHECKOUT_DIR).await?;
    let env_vars = compose_env_vars(suite, revision);

    std::fs::create_dir_all(staging_dir)?;

    // 3. Assemble command list.
    let build_cmds = if let Some(build) = &suite.build {
        assemble_build_api_cmds(env, build, &env_vars).await?
    } else {
        Vec::new()
    };
    let test_cmds = suite.tests.clone();

    if build_cmds.is_empty() && test_cmds.is_empty() {
        return Err(PaprError::Infra(
            "suite has neither build nor test commands (parser should have rejected this)"
                .to_string(),
        ));
    }

    // 4. Build and Test, with a shared timeout budget decremented across
    // both phases.
    let mut timeout_remaining = suite.timeout_secs as i64;
    // Absent an early failure or timeout from either phase, the suite is
    // considered to have passed (rc 0), matching the original's
    // last-command-exited-0 semantics without needing to track it per cmd.
    let mut rc: Option<i32> = Some(0);
    let mut timed_out = false;

    if !build_cmds.is_empty() {
        post_status_resilient(
            forge,
            &revision.head_sha,
            StatusState::Pending,
            &suite.context,
            Some("Building..."),
            None,
        )
        .await
        .map_err(|e| PaprError::Infra(e.to_string()))?;

        let log_path = staging_dir.join("build.log");
        write_log_header(&log_path, revision, suite, landing_fallback_url, build_id)?;
        let outcome = run_phase(env, &build_cmds, &env_vars, &mut timeout_remaining, &log_path).await?;
        if let Some((phase_rc, phase_timed_out)) = outcome {
            rc = phase_rc;
            timed_out = phase_timed_out;
        }
    }

    if rc == Some(0) && !timed_out && !test_cmds.is_empty() {
        post_status_resilient(
            forge,
            &revision.head_sha,
            StatusState::Pending,
            &suite.context,
            Some("Running tests..."),
            None,
        )
        .await
        .map_err(|e| PaprError::Infra(e.to_string()))?;

        let log_path = staging_dir.join("output.log");
        write_log_header(&log_path, revision, suite, landing_fallback_url, build_id)?;
        let outcome = run_phase(env, &test_cmds, &env_vars, &mut timeout_remaining, &log_path).await?;
        if let Some((phase_rc, phase_timed_out)) = outcome {
            rc = phase_rc;
            timed_out = phase_timed_out;
        }
    }

    // 5. Collecting.
    let artifacts_dir = staging_dir.join("artifacts");
    let mut any_artifact = false;
    for path in &suite.artifacts {
        let remote = format!("{CHECKOUT_DIR}/{path}");
        let local_dest = artifacts_dir.join(path);
        if env.copy_from(&remote, &local_dest).await.is_ok() && local_dest.exists() {
            any_artifact = true;
        }
    }
    if !any_artifact && artifacts_dir.exists() {
        let _ = std::fs::remove_dir_all(&artifacts_dir);
    }

    // 6. Publishing. Destination key is deterministic per revision and
    // monotonic per-attempt (§4.3 step 6, §8 publish monotonicity).
    let unix_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dest_key = format!("{}/{}.{}", revision.repo, revision.head_sha, unix_nanos);
    let publish_url = publisher
        .publish_dir(staging_dir, &dest_key)
        .await
        .map_err(|e| PaprError::Infra(e.to_string()))?;

    Ok(SuiteRunResult {
        context: suite.context.clone(),
        completed: true,
        rc,
        timed_out,
        publish_url: Some(publish_url),
        required: suite.required,
    })
}

/// Runs one phase's commands in order, decrementing the shared timeout
/// budget. Returns `Some((rc, timed_out))` once a command fails or times
/// out (the phase stops early per §4.3 step 4; `rc` is `None` on timeout,
/// matching `CmdResult.rc = null`), or `None` if every command in the
/// phase exited 0.
async fn run_phase(
    env: &dyn TestEnv,
    commands: &[String],
    env_vars: &[(String, String)],
    timeout_remaining: &mut i64,
    log_path: &Path,
) -> Result<Option<(Option<i32>, bool)>> {
    for cmd in commands {
        if *timeout_remaining <= 0 {
            append_log(log_path, &format!(">>> {cmd}\n### TIMED OUT AFTER 0s\n"))?;
            return Ok(Some((None, true)));
        }

        let script = build_script(cmd);
        let budget = Duration::from_secs((*timeout_remaining).max(0) as u64);
        let start = Instant::now();
        let result = env.run_cmd(&script, env_vars, budget).await?;
        let elapsed = start.elapsed().as_secs_f64();
        *timeout_remaining -= elapsed.ceil() as i64;

        append_log(
            log_path,
            &format!(">>> {cmd}\n{}{}", result.stdout, result.stderr),
        )?;

        if result.timed_out || *timeout_remaining < 0 {
            append_log(log_path, &format!("### TIMED OUT AFTER {elapsed:.0}s\n"))?;
            return Ok(Some((None, true)));
        }
        if let Some(code) = result.exit_code {
            if code == 0 {
                append_log(log_path, &format!("### COMPLETED IN {elapsed:.0}s\n"))?;
            } else {
                append_log(
                    log_path,
                    &format!("### EXITED WITH CODE {code} AFTER {elapsed:.0}s\n"),
                )?;
                return Ok(Some((Some(code), false)));
            }
        }
    }
    Ok(None)
}

fn build_script(cmd: &str) -> String {
    format!("set -euo pipefail\nexec 2>&1\ncd {CHECKOUT_DIR}\n{cmd}\n")
}

fn append_log(path: &Path, text: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}

/// Composes the env vars handed to every command: the suite's own
/// declarations, plus forge-injected variables emitted under both the
/// `PAPR_` and legacy `RHCI_` prefixes (§4.3 step 2, §9).
fn compose_env_vars(suite: &CanonicalSuite, revision: &Revision) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = suite
        .env_vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut injected: BTreeMap<&str, String> = BTreeMap::new();
    injected.insert("REPO", revision.repo.clone());
    injected.insert("COMMIT", revision.test_sha.clone());
    match revision.ref_kind {
        crate::revision::RefKind::Branch => {
            injected.insert("BRANCH", revision.ref_name.clone());
        }
        crate::revision::RefKind::Pull => {
            injected.insert("PULL_ID", revision.ref_name.clone());
        }
    }
    if revision.is_merge {
        injected.insert("MERGE_COMMIT", revision.test_sha.clone());
    }
    if let Ok(build_id) = std::env::var("BUILD_ID") {
        injected.insert("BUILD_ID", build_id);
    }

    for (key, value) in injected {
        vars.push((format!("PAPR_{key}"), value.clone()));
        vars.push((format!("RHCI_{key}"), value));
    }
    vars
}

/// Synthesizes `./configure` / `make` / `make install` from a `build:`
/// directive, per the Build API convention (§4.3 step 3, GLOSSARY).
async fn assemble_build_api_cmds(
    env: &dyn TestEnv,
    build: &BuildDirective,
    env_vars: &[(String, String)],
) -> Result<Vec<String>> {
    let (config_opts, build_opts, install_opts) = build.opts();

    let nproc_script = build_script("getconf _NPROCESSORS_ONLN");
    let nproc_out = env
        .run_checked_cmd(&nproc_script, env_vars, Duration::from_secs(30))
        .await?;
    let nproc: u32 = nproc_out.stdout.trim().parse().unwrap_or(1);

    let has_configure_script = env
        .run_cmd(
            &build_script("test -x ./configure && echo yes || echo no"),
            env_vars,
            Duration::from_secs(10),
        )
        .await?
        .stdout
        .trim()
        == "yes";

    let mut cmds = Vec::new();
    if !has_configure_script {
        let has_autogen = env
            .run_cmd(
                &build_script("test -x ./autogen.sh && echo yes || echo no"),
                env_vars,
                Duration::from_secs(10),
            )
            .await?
            .stdout
            .trim()
            == "yes";
        if has_autogen {
            cmds.push("NOCONFIGURE=1 ./autogen.sh".to_string());
        } else {
            cmds.push("NOCONFIGURE=1 ./autogen".to_string());
        }
    }
    cmds.push(format!("./configure {config_opts}").trim().to_string());
    cmds.push(format!("make all --jobs {nproc} {build_opts}").trim().to_string());
    cmds.push(format!("make install {install_opts}").trim().to_string());
    Ok(cmds)
}

fn final_status(result: &SuiteRunResult) -> (StatusState, String) {
    if result.timed_out {
        (StatusState::Failure, "Test timed out.".to_string())
    } else if result.rc == Some(0) {
        (StatusState::Success, "All tests passed.".to_string())
    } else {
        (
            StatusState::Failure,
            format!("Test failed with rc {}.", result.rc.unwrap_or(-1)),
        )
    }
}

/// Writes the log header documented in SPEC_FULL.md §6, once, before any
/// command output for that phase's log file.
fn write_log_header(
    path: &Path,
    revision: &Revision,
    suite: &CanonicalSuite,
    url: &str,
    build_id: &Option<String>,
) -> Result<()> {
    let date = Local::now().format("%a %b %e %T %Z %Y");
    let ref_desc = match revision.ref_kind {
        crate::revision::RefKind::Branch => format!("branch {}", revision.ref_name),
        crate::revision::RefKind::Pull => {
            let warn = if revision.is_merge {
                ""
            } else {
                " (WARNING: not merge commit, check for conflicts)"
            };
            format!("PR #{}{}", revision.ref_name, warn)
        }
    };

    let mut header = format!(
        "### Date: {date}\n### Revision: {} ({})\n### URL: {url}\n### Suite: {}\n",
        revision.test_sha, ref_desc, suite.context
    );
    if let Some(id) = build_id {
        header.push_str(&format!("### BUILD_ID {id}\n"));
    }

    info!(context = %suite.context, "writing log header for {}", path.display());
    std::fs::write(path, header)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use papr_parser::SuiteParser;
    use papr_testenv::FakeEnv;

    fn suite(yaml: &str) -> CanonicalSuite {
        SuiteParser::from_str(yaml).unwrap().parse().unwrap().remove(0)
    }

    #[tokio::test]
    async fn happy_path_reports_success() {
        let suite = suite("context: ci/fast\ncontainer: {image: fedora}\ntests: [\"true\"]\n");
        let revision = Revision::pull_with_merge("owner/repo", "42", "head123", "merge456");
        let fake_env = Box::new(FakeEnv::new());
        let forge = Arc::new(crate::forge::FakeForgeClient::new());
        let publisher = Arc::new(crate::publisher::LocalPublisher::new(
            std::env::temp_dir(),
            "http://artifacts.example",
        ));
        let staging = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();

        let result = run_suite(
            fake_env,
            SuiteRunInput {
                revision,
                suite,
                local_checkout: checkout.path().to_path_buf(),
                staging_dir: staging.path().to_path_buf(),
                forge: forge.clone(),
                publisher,
                build_id: None,
                landing_fallback_url: "http://fallback.example".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(result.passed());
        let statuses = forge.statuses.lock().await;
        assert!(statuses.iter().any(|s| s.state == "success"));
        // PR with a real merge commit posts against both shas (§4.4 step 8).
        assert!(statuses.iter().any(|s| s.sha == "head123"));
        assert!(statuses.iter().any(|s| s.sha == "merge456"));
    }

    #[tokio::test]
    async fn failing_command_reports_failure_with_rc() {
        let suite = suite("context: ci/fast\ncontainer: {image: fedora}\ntests: [\"false\"]\n");
        let revision = Revision::branch("owner/repo", "main", "abc123");
        let env = FakeEnv::new();
        env.script_failure("set -euo pipefail\nexec 2>&1\ncd checkout\nfalse\n", 1)
            .await;
        let forge = Arc::new(crate::forge::FakeForgeClient::new());
        let publisher = Arc::new(crate::publisher::LocalPublisher::new(
            std::env::temp_dir(),
            "http://artifacts.example",
        ));
        let staging = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();

        let result = run_suite(
            Box::new(env),
            SuiteRunInput {
                revision,
                suite,
                local_checkout: checkout.path().to_path_buf(),
                staging_dir: staging.path().to_path_buf(),
                forge: forge.clone(),
                publisher,
                build_id: None,
                landing_fallback_url: "http://fallback.example".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(!result.passed());
        assert_eq!(result.rc, Some(1));
        let statuses = forge.statuses.lock().await;
        assert!(statuses
            .iter()
            .any(|s| s.description.as_deref() == Some("Test failed with rc 1.")));
    }

    #[tokio::test]
    async fn timeout_marks_result_timed_out() {
        let suite = suite(
            "context: ci/slow\ncontainer: {image: fedora}\ntests: [\"sleep 60\"]\ntimeout: \"1s\"\n",
        );
        let revision = Revision::branch("owner/repo", "main", "abc123");
        let env = FakeEnv::new();
        env.script_timeout("set -euo pipefail\nexec 2>&1\ncd checkout\nsleep 60\n")
            .await;
        let forge = Arc::new(crate::forge::FakeForgeClient::new());
        let publisher = Arc::new(crate::publisher::LocalPublisher::new(
            std::env::temp_dir(),
            "http://artifacts.example",
        ));
        let staging = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();

        let result = run_suite(
            Box::new(env),
            SuiteRunInput {
                revision,
                suite,
                local_checkout: checkout.path().to_path_buf(),
                staging_dir: staging.path().to_path_buf(),
                forge: forge.clone(),
                publisher,
                build_id: None,
                landing_fallback_url: "http://fallback.example".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.rc, None);
        let statuses = forge.statuses.lock().await;
        assert!(statuses
            .iter()
            .any(|s| s.description.as_deref() == Some("Test timed out.")));
    }
}
