//! Site configuration and the `Site` value it builds, replacing the
//! original source's module-level globals (`config`, `publisher`,
//! `cachedir`) with an explicit value created once in `init` and threaded
//! through the driver and every suite worker (SPEC_FULL.md §9).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PaprError, Result};
use crate::publisher::{LocalPublisher, Publisher};

fn default_cachedir() -> PathBuf {
    PathBuf::from("/var/cache/papr")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default, rename = "auth-from-env")]
    pub auth_from_env: bool,
    #[serde(default, rename = "auth-token")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtraRepoConfig {
    pub distro_id: String,
    #[serde(default)]
    pub distro_version_id: Option<String>,
    pub repo: String,
}

/// The raw shape of `site.yaml`, per SPEC_FULL.md §6.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub backends: serde_yaml::Mapping,
    pub github: GithubConfig,
    #[serde(default = "default_cachedir")]
    pub cachedir: PathBuf,
    #[serde(default)]
    pub repos: Vec<ExtraRepoConfig>,
}

impl SiteConfig {
    pub fn from_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| PaprError::Infra(format!("invalid site config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }
}

/// The fully initialized process state: config plus the live handles it
/// describes. Created once and passed down by reference/`Arc`, never
/// reached for through a global.
pub struct Site {
    pub config: SiteConfig,
    pub publisher: Arc<dyn Publisher>,
    pub cachedir: PathBuf,
}

impl Site {
    pub fn init(config: SiteConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.cachedir)?;

        let publisher: Arc<dyn Publisher> = match config.publisher.kind.as_str() {
            "local" => {
                let root = config
                    .publisher
                    .config
                    .get(&serde_yaml::Value::from("root"))
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| config.cachedir.join("published"));
                let base_url = config
                    .publisher
                    .config
                    .get(&serde_yaml::Value::from("base-url"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("file://")
                    .to_string();
                Arc::new(LocalPublisher::new(root, base_url))
            }
            other => {
                return Err(PaprError::Infra(format!(
                    "unsupported publisher type {other:?} (only 'local' is implemented)"
                )))
            }
        };

        Ok(Site {
            cachedir: config.cachedir.clone(),
            config,
            publisher,
        })
    }

    pub fn github_token(&self) -> Result<String> {
        if self.config.github.auth_from_env {
            std::env::var("GITHUB_TOKEN")
                .map_err(|_| PaprError::Infra("GITHUB_TOKEN not set".to_string()))
        } else {
            self.config
                .github
                .auth_token
                .clone()
                .ok_or_else(|| PaprError::Infra("no github auth-token configured".to_string()))
        }
    }
}
