use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A content sink that accepts a directory or a single blob and returns a
/// stable URL. Implementations must be safe to share across concurrent
/// suite workers (§5).
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Uploads `local_dir` under `dest_key`, returning the landing URL.
    /// When the directory contains exactly one file, that file is the
    /// landing object; otherwise it's `index.html`.
    async fn publish_dir(&self, local_dir: &Path, dest_key: &str) -> Result<String, PublishError>;

    /// Uploads a single blob under `dest_key` with an explicit content
    /// type, returning its URL.
    async fn publish_blob(
        &self,
        bytes: &[u8],
        dest_key: &str,
        content_type: &str,
    ) -> Result<String, PublishError>;
}

/// Publishes to a local directory tree, mirroring the original source's
/// `LocalPublisher.publish_dir` (a recursive copy under a configured root)
/// but returning a `file://` URL instead of shelling out to `cp`.
pub struct LocalPublisher {
    root: PathBuf,
    base_url: String,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, dest_key: &str, landing: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            dest_key.trim_matches('/'),
            landing
        )
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish_dir(&self, local_dir: &Path, dest_key: &str) -> Result<String, PublishError> {
        let dest = self.root.join(dest_key.trim_start_matches('/'));
        tokio::fs::create_dir_all(&dest).await?;
        copy_tree(local_dir, &dest).await?;

        let mut entries = tokio::fs::read_dir(local_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        let landing = if files.len() == 1 {
            files.into_iter().next().unwrap()
        } else {
            "index.html".to_string()
        };
        Ok(self.url_for(dest_key, &landing))
    }

    async fn publish_blob(
        &self,
        bytes: &[u8],
        dest_key: &str,
        _content_type: &str,
    ) -> Result<String, PublishError> {
        let dest = self.root.join(dest_key.trim_start_matches('/'));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, bytes).await?;
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            dest_key.trim_matches('/')
        ))
    }
}

async fn copy_tree(src: &Path, dest: &Path) -> Result<(), PublishError> {
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let ty = entry.file_type().await?;
        let dest_path = dest.join(entry.file_name());
        if ty.is_dir() {
            tokio::fs::create_dir_all(&dest_path).await?;
            Box::pin(copy_tree(&entry.path(), &dest_path)).await?;
        } else {
            tokio::fs::copy(entry.path(), &dest_path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_file_directory_lands_on_that_file() {
        let src = tempfile::tempdir().unwrap();
        tokio::fs::write(src.path().join("output.log"), b"hi")
            .await
            .unwrap();
        let dest_root = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(dest_root.path(), "http://artifacts.example");
        let url = publisher
            .publish_dir(src.path(), "owner/repo/abc.1")
            .await
            .unwrap();
        assert!(url.ends_with("/output.log"));
    }

    #[tokio::test]
    async fn multi_file_directory_lands_on_index_html() {
        let src = tempfile::tempdir().unwrap();
        tokio::fs::write(src.path().join("build.log"), b"a").await.unwrap();
        tokio::fs::write(src.path().join("output.log"), b"b").await.unwrap();
        let dest_root = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(dest_root.path(), "http://artifacts.example");
        let url = publisher
            .publish_dir(src.path(), "owner/repo/abc.2")
            .await
            .unwrap();
        assert!(url.ends_with("/index.html"));
    }
}
