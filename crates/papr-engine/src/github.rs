//! A concrete [`ForgeClient`] talking to the GitHub REST API.
//!
//! Grounded on `original_source/papr/github.py`'s `GitHub` class: same
//! endpoints, same commit-not-found detection (a 422 whose message
//! mentions "No commit found"), same one-retry-on-decode-error policy.
//! This isn't part of the spec's named modules (C5 only specifies the
//! trait) but the CLI needs a working implementation to run end to end.

use async_trait::async_trait;
use serde_json::json;

use crate::forge::{ForgeClient, ForgeError, StatusState};

const USER_AGENT: &str = "papr";

pub struct GithubForgeClient {
    client: reqwest::Client,
    token: String,
    repo: String,
}

impl GithubForgeClient {
    pub fn new(token: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            repo: repo.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.token)
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(), ForgeError> {
        let send = || {
            self.client
                .post(url)
                .header("Authorization", self.auth_header())
                .header("User-Agent", USER_AGENT)
                .header("Accept", "application/vnd.github+json")
                .json(&body)
                .send()
        };

        let response = send()
            .await
            .map_err(|e| ForgeError::Other(e.to_string()))?;
        let status = response.status();

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            if text.contains("No commit found") {
                return Err(ForgeError::CommitNotFound(text));
            }
            return Err(ForgeError::Other(format!("422: {text}")));
        }

        if status.is_success() {
            // One retry on a body that fails to decode as JSON, per the
            // original's single-retry policy for transient decode errors.
            match response.json::<serde_json::Value>().await {
                Ok(_) => Ok(()),
                Err(_) => {
                    let retry = send().await.map_err(|e| ForgeError::Other(e.to_string()))?;
                    if retry.status().is_success() {
                        Ok(())
                    } else {
                        Err(ForgeError::TransientDecode(
                            "response body did not decode as JSON twice".to_string(),
                        ))
                    }
                }
            }
        } else {
            Err(ForgeError::Other(format!(
                "request to {url} failed: {status}"
            )))
        }
    }
}

#[async_trait]
impl ForgeClient for GithubForgeClient {
    async fn post_status(
        &self,
        sha: &str,
        state: StatusState,
        context: &str,
        description: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), ForgeError> {
        let mut body = json!({
            "state": state.as_str(),
            "context": context,
        });
        if let Some(description) = description {
            body["description"] = json!(description);
        }
        if let Some(url) = url.filter(|u| u.starts_with("http://") || u.starts_with("https://")) {
            body["target_url"] = json!(url);
        }

        let endpoint = format!(
            "https://api.github.com/repos/{}/statuses/{}",
            self.repo, sha
        );
        self.post(&endpoint, body).await
    }

    async fn post_comment(&self, issue_id: u64, text: &str) -> Result<(), ForgeError> {
        let endpoint = format!(
            "https://api.github.com/repos/{}/issues/{}/comments",
            self.repo, issue_id
        );
        self.post(&endpoint, json!({ "body": text })).await
    }
}
