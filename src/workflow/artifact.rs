//! Result download. Files are named by the md5 of their source URL, so the
//! same URL always lands on the same path and a re-download overwrites it.
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::workflow::client::{failure_parts, ApiClient};

pub const ARTIFACT_EXTENSION: &str = "png";

pub fn artifact_path(output_dir: &Path, url: &str) -> PathBuf {
    output_dir.join(format!("{:x}.{}", md5::compute(url), ARTIFACT_EXTENSION))
}

impl ApiClient {
    /// Download `url` into the configured output directory.
    pub async fn retrieve(&self, url: &str) -> AppResult<PathBuf> {
        let response = self
            .raw()
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::DownloadFailed {
                status: None,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            tracing::error!(status, url, "Error downloading image");
            return Err(AppError::DownloadFailed {
                status: Some(status),
                message: body,
            });
        }
        let bytes = response.bytes().await.map_err(|e| AppError::DownloadFailed {
            status: None,
            message: e.to_string(),
        })?;

        let dir = &self.config().output_dir;
        tokio::fs::create_dir_all(dir).await?;
        let path = artifact_path(dir, url);
        tokio::fs::write(&path, &bytes).await?;
        tracing::info!("Image saved to {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
