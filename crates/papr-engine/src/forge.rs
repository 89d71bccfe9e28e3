use async_trait::async_trait;
use tokio::sync::Mutex;

/// The state posted alongside a commit status, mirroring the forge's own
/// vocabulary (GitHub et al. all use these four).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Pending,
    Success,
    Error,
    Failure,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Error => "error",
            StatusState::Failure => "failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// The sha this status targets no longer exists on the forge. Always
    /// swallowed by callers, never escalated.
    #[error("no commit found for sha {0}")]
    CommitNotFound(String),

    /// A JSON body failed to decode; worth exactly one retry before
    /// escalating, per SPEC_FULL.md §7.
    #[error("transient decode error: {0}")]
    TransientDecode(String),

    #[error("forge request failed: {0}")]
    Other(String),
}

/// Posts commit statuses and PR comments. Concrete implementations talk to
/// whatever forge hosts the repository; this crate only depends on the
/// contract.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn post_status(
        &self,
        sha: &str,
        state: StatusState,
        context: &str,
        description: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), ForgeError>;

    async fn post_comment(&self, issue_id: u64, text: &str) -> Result<(), ForgeError>;
}

/// Posts a status, retrying exactly once on a transient decode error and
/// swallowing a commit-not-found, per SPEC_FULL.md §7 / §4.5.
pub async fn post_status_resilient(
    forge: &dyn ForgeClient,
    sha: &str,
    state: StatusState,
    context: &str,
    description: Option<&str>,
    url: Option<&str>,
) -> Result<(), ForgeError> {
    match forge.post_status(sha, state, context, description, url).await {
        Ok(()) => Ok(()),
        Err(ForgeError::CommitNotFound(_)) => Ok(()),
        Err(ForgeError::TransientDecode(_)) => {
            forge.post_status(sha, state, context, description, url).await
        }
        Err(e) => Err(e),
    }
}

/// An in-memory [`ForgeClient`] for tests: records every status and
/// comment it was asked to post.
#[derive(Default)]
pub struct FakeForgeClient {
    pub statuses: Mutex<Vec<PostedStatus>>,
    pub comments: Mutex<Vec<(u64, String)>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedStatus {
    pub sha: String,
    pub state: &'static str,
    pub context: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl FakeForgeClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ForgeClient for FakeForgeClient {
    async fn post_status(
        &self,
        sha: &str,
        state: StatusState,
        context: &str,
        description: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), ForgeError> {
        self.statuses.lock().await.push(PostedStatus {
            sha: sha.to_string(),
            state: state.as_str(),
            context: context.to_string(),
            description: description.map(str::to_string),
            url: url.filter(|u| u.starts_with("http://") || u.starts_with("https://"))
                .map(str::to_string),
        });
        Ok(())
    }

    async fn post_comment(&self, issue_id: u64, text: &str) -> Result<(), ForgeError> {
        self.comments.lock().await.push((issue_id, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn url_without_scheme_is_dropped() {
        let forge = FakeForgeClient::new();
        forge
            .post_status(
                "abc123",
                StatusState::Success,
                "ci/fast",
                Some("All tests passed."),
                Some("not-a-url"),
            )
            .await
            .unwrap();
        let statuses = forge.statuses.lock().await;
        assert_eq!(statuses[0].url, None);
    }

    #[tokio::test]
    async fn resilient_post_swallows_commit_not_found() {
        struct AlwaysMissing;
        #[async_trait]
        impl ForgeClient for AlwaysMissing {
            async fn post_status(
                &self,
                _: &str,
                _: StatusState,
                _: &str,
                _: Option<&str>,
                _: Option<&str>,
            ) -> Result<(), ForgeError> {
                Err(ForgeError::CommitNotFound("abc".to_string()))
            }
            async fn post_comment(&self, _: u64, _: &str) -> Result<(), ForgeError> {
                Ok(())
            }
        }

        let result = post_status_resilient(
            &AlwaysMissing,
            "abc",
            StatusState::Success,
            "ci/fast",
            None,
            None,
        )
        .await;
        assert!(result.is_ok());
    }
}
