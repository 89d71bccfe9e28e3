/// What kind of ref a [`Revision`] was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Pull,
}

/// A resolved point in a repository's history that a run executes against.
///
/// `head_sha` is what gets reported on; `test_sha` is what actually gets
/// checked out and tested. They differ only for pull requests that have a
/// real merge commit (§3, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub repo: String,
    pub ref_kind: RefKind,
    pub ref_name: String,
    pub head_sha: String,
    pub test_sha: String,
    pub is_merge: bool,
}

impl Revision {
    pub fn branch(repo: impl Into<String>, branch: impl Into<String>, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        Self {
            repo: repo.into(),
            ref_kind: RefKind::Branch,
            ref_name: branch.into(),
            head_sha: sha.clone(),
            test_sha: sha,
            is_merge: false,
        }
    }

    pub fn pull_with_merge(
        repo: impl Into<String>,
        pull_id: impl Into<String>,
        head_sha: impl Into<String>,
        merge_sha: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            ref_kind: RefKind::Pull,
            ref_name: pull_id.into(),
            head_sha: head_sha.into(),
            test_sha: merge_sha.into(),
            is_merge: true,
        }
    }

    pub fn pull_head_only(repo: impl Into<String>, pull_id: impl Into<String>, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        Self {
            repo: repo.into(),
            ref_kind: RefKind::Pull,
            ref_name: pull_id.into(),
            head_sha: sha.clone(),
            test_sha: sha,
            is_merge: false,
        }
    }

    /// Every sha a status must be posted against for this revision: just
    /// `head_sha` for branches, both shas for merge-commit PRs (§4.4 step 8).
    pub fn status_targets(&self) -> Vec<&str> {
        if self.is_merge && self.head_sha != self.test_sha {
            vec![self.head_sha.as_str(), self.test_sha.as_str()]
        } else {
            vec![self.head_sha.as_str()]
        }
    }
}
