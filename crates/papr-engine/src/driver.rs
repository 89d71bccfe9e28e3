//! The per-revision driver: resolves the ref, parses and filters suites,
//! fans out one worker per suite, and aggregates the "required" status.
//!
//! Grounded on `original_source/papr/test.py`'s `Test`/`BranchTest`/
//! `PullTest` classes for phase ordering and the required-index HTML, and
//! on `CiGate::evaluate`'s pass/fail aggregation shape for the "required"
//! counting.

use std::path::PathBuf;
use std::sync::Arc;

use papr_parser::{CanonicalSuite, EnvSelector, SuiteParser};
use papr_testenv::{ContainerEnv, TestEnv, UnsupportedEnv};
use tracing::{info, warn, Instrument};

use crate::error::{PaprError, Result};
use crate::forge::{post_status_resilient, ForgeClient, StatusState};
use crate::publisher::Publisher;
use crate::revision::{RefKind, Revision};
use crate::suite_run::{run_suite, SuiteRunInput, SuiteRunResult};

const SUITE_FILENAMES: [&str; 3] = [".papr.yml", ".papr.yaml", ".redhat-ci.yml"];

/// What the caller asked the driver to run.
pub struct RunRequest {
    pub repo: String,
    pub ref_kind: RefKind,
    /// Branch name, or PR id as a string.
    pub ref_name: String,
    pub expected_head_sha: Option<String>,
    /// If non-empty, only suites whose context is in this set run (§4.4
    /// step 5). An unknown context is a user error.
    pub suite_filter: Vec<String>,
}

/// Every collaborator the driver needs, held for the run's duration.
/// Shared, read-only handles (§5 Shared resources).
pub struct RevisionDriver {
    pub forge: Arc<dyn ForgeClient>,
    pub publisher: Arc<dyn Publisher>,
    pub checkout_root: PathBuf,
    pub cache_root: PathBuf,
}

/// The outcome of a whole revision run. `None` on a clean soft exit (ref
/// race, no suite file, malformed input already reported).
pub enum DriverOutcome {
    SoftExit(&'static str),
    Ran {
        suite_results: Vec<SuiteRunResult>,
        required_summary: Option<RequiredSummary>,
    },
}

pub struct RequiredSummary {
    pub passed: usize,
    pub total: usize,
    pub index_url: String,
}

impl RevisionDriver {
    pub async fn run(&self, request: RunRequest) -> Result<DriverOutcome> {
        let repo_dir = self.checkout_root.join(request.repo.replace('/', "_"));
        std::fs::create_dir_all(&repo_dir)?;

        // 1. Resolve ref.
        let revision = {
            let repo_dir = repo_dir.clone();
            let repo = request.repo.clone();
            let ref_kind = request.ref_kind;
            let ref_name = request.ref_name.clone();
            tokio::task::spawn_blocking(move || match ref_kind {
                RefKind::Branch => crate::git::resolve_branch(&repo_dir, &repo, &ref_name),
                RefKind::Pull => crate::git::resolve_pull(&repo_dir, &repo, &ref_name),
            })
            .await
            .map_err(|e| PaprError::Infra(format!("git task panicked: {e}")))??
        };

        // 2. Check expected sha (soft exit on a raced ref).
        if let Some(expected) = &request.expected_head_sha {
            if expected != &revision.head_sha {
                info!(
                    expected = %expected,
                    actual = %revision.head_sha,
                    "ref raced, exiting cleanly"
                );
                return Ok(DriverOutcome::SoftExit("ref raced"));
            }
        }

        // 3. Locate suite file.
        let suite_path = SUITE_FILENAMES
            .iter()
            .map(|name| repo_dir.join(name))
            .find(|p| p.exists());
        let Some(suite_path) = suite_path else {
            return Ok(DriverOutcome::SoftExit("no suite file"));
        };

        // 4. Parse.
        let contents = std::fs::read_to_string(&suite_path)?;
        let suites = match SuiteParser::from_str(&contents).and_then(|p| p.parse()) {
            Ok(suites) => suites,
            Err(e) => {
                for sha in revision.status_targets() {
                    post_status_resilient(
                        self.forge.as_ref(),
                        sha,
                        StatusState::Error,
                        "Red Hat CI",
                        Some(&format!("Invalid YAML file `{}`.", suite_path.display())),
                        None,
                    )
                    .await
                    .map_err(|e| PaprError::Infra(e.to_string()))?;
                }
                if let RefKind::Pull = revision.ref_kind {
                    let issue_id: u64 = revision.ref_name.parse().unwrap_or(0);
                    self.forge
                        .post_comment(
                            issue_id,
                            &format!(
                                "Your `.papr.yml` could not be parsed: {e}\n\nYou can use `papr validate` to validate your YAML file."
                            ),
                        )
                        .await
                        .map_err(|e| PaprError::Infra(e.to_string()))?;
                }
                return Ok(DriverOutcome::SoftExit("malformed suite file"));
            }
        };

        // 5. Filter.
        let active: Vec<CanonicalSuite> = suites
            .into_iter()
            .filter(|s| is_active(s, &revision))
            .collect();

        let active = if request.suite_filter.is_empty() {
            active
        } else {
            let known: Vec<String> = active.iter().map(|s| s.context.clone()).collect();
            for wanted in &request.suite_filter {
                if !known.contains(wanted) {
                    return Err(PaprError::UnknownSuiteContext {
                        requested: wanted.clone(),
                        known,
                    });
                }
            }
            active
                .into_iter()
                .filter(|s| request.suite_filter.contains(&s.context))
                .collect()
        };

        // 6. Fan out: one task per suite, joined with no fail-fast (§4.4
        // step 6, §5). A worker that panics is an infra failure for the
        // whole revision.
        let mut handles = Vec::with_capacity(active.len());
        for suite in active {
            let revision = revision.clone();
            let forge = self.forge.clone();
            let publisher = self.publisher.clone();
            let repo_dir = repo_dir.clone();
            let staging_root = self.cache_root.join("staging");
            let landing_fallback = format!("https://github.com/{}", request.repo);

            let worker_id = uuid::Uuid::new_v4();
            let span = tracing::info_span!("suite_worker", %worker_id, context = %suite.context);
            handles.push(tokio::spawn(
                async move {
                    let staging_dir = staging_root.join(format!(
                        "{}-{}",
                        revision.head_sha,
                        suite.context.replace('/', "_")
                    ));
                    let env: Box<dyn TestEnv> = match &suite.env {
                        EnvSelector::Container { image } => Box::new(ContainerEnv::new(
                            image.clone(),
                            repo_dir.join(format!(".papr-env-{}", suite.context.replace('/', "_"))),
                        )),
                        EnvSelector::Host { .. } | EnvSelector::Cluster { .. } => {
                            Box::new(UnsupportedEnv::new(format!(
                                "environment type {:?} not supported",
                                suite.env.kind_name()
                            )))
                        }
                    };
                    run_suite(
                        env,
                        SuiteRunInput {
                            revision,
                            suite,
                            local_checkout: repo_dir,
                            staging_dir,
                            forge,
                            publisher,
                            build_id: std::env::var("BUILD_ID").ok(),
                            landing_fallback_url: landing_fallback,
                        },
                    )
                    .await
                }
                .instrument(span),
            ));
        }

        let mut suite_results = Vec::with_capacity(handles.len());
        let mut any_infra_failure = false;
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) => suite_results.push(result),
                Ok(Err(e)) => {
                    warn!(error = %e, "suite worker returned an infra failure");
                    any_infra_failure = true;
                }
                Err(e) => {
                    warn!(error = %e, "suite worker task panicked");
                    any_infra_failure = true;
                }
            }
        }
        if any_infra_failure {
            return Err(PaprError::Infra(
                "one or more suite workers failed to report through the result channel".to_string(),
            ));
        }

        // 7. Aggregate "required" status (branch mode only).
        let required_summary = if matches!(revision.ref_kind, RefKind::Branch) {
            self.publish_required_aggregate(&revision, &suite_results).await?
        } else {
            None
        };

        Ok(DriverOutcome::Ran {
            suite_results,
            required_summary,
        })
    }

    async fn publish_required_aggregate(
        &self,
        revision: &Revision,
        results: &[SuiteRunResult],
    ) -> Result<Option<RequiredSummary>> {
        let required: Vec<&SuiteRunResult> = results.iter().filter(|r| r.required).collect();
        if required.is_empty() {
            return Ok(None);
        }

        let total = required.len();
        let passed = required.iter().filter(|r| r.passed()).count();

        let mut rows = String::new();
        for r in &required {
            let status = if r.passed() { "PASS" } else { "FAIL" };
            let url = r.publish_url.as_deref().unwrap_or("#");
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td><a href=\"{}\">log</a></td></tr>\n",
                r.context, status, url
            ));
        }
        let html = format!(
            "<html><body><h1>Required suites for {}</h1><table>\n{}</table></body></html>\n",
            revision.head_sha, rows
        );

        let unix_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dest_key = format!("{}/{}.{}-required", revision.repo, revision.head_sha, unix_nanos);
        let index_url = self
            .publisher
            .publish_blob(html.as_bytes(), &dest_key, "text/html; charset=utf-8")
            .await
            .map_err(|e| PaprError::Infra(e.to_string()))?;

        post_status_resilient(
            self.forge.as_ref(),
            &revision.head_sha,
            if passed == total {
                StatusState::Success
            } else {
                StatusState::Failure
            },
            "required",
            Some(&format!("{passed}/{total} PASSES")),
            Some(&index_url),
        )
        .await
        .map_err(|e| PaprError::Infra(e.to_string()))?;

        Ok(Some(RequiredSummary {
            passed,
            total,
            index_url,
        }))
    }
}

fn is_active(suite: &CanonicalSuite, revision: &Revision) -> bool {
    match revision.ref_kind {
        RefKind::Branch => suite.branches.iter().any(|b| b == &revision.ref_name),
        RefKind::Pull => suite.pulls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite_with(context: &str, branches: Vec<&str>, pulls: bool, required: bool) -> CanonicalSuite {
        let yaml = format!(
            "context: {context}\ncontainer: {{image: fedora}}\ntests: [\"true\"]\nbranches: [{}]\npulls: {pulls}\nrequired: {required}\n",
            branches.join(", ")
        );
        papr_parser::SuiteParser::from_str(&yaml)
            .unwrap()
            .parse()
            .unwrap()
            .remove(0)
    }

    #[test]
    fn branch_mode_filters_by_branch_membership() {
        let suite = suite_with("a", vec!["main"], true, false);
        let rev = Revision::branch("o/r", "main", "sha1");
        assert!(is_active(&suite, &rev));

        let rev_other = Revision::branch("o/r", "release", "sha1");
        assert!(!is_active(&suite, &rev_other));
    }

    #[test]
    fn pull_mode_uses_pulls_flag() {
        let suite = suite_with("a", vec!["main"], false, false);
        let rev = Revision::pull_head_only("o/r", "5", "sha1");
        assert!(!is_active(&suite, &rev));
    }
}
