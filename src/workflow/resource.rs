//! Image upload: reserve a slot, then PUT the bytes to the pre-signed URL.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::workflow::client::{failure_parts, ApiClient};

/// Lifetime requested for every upload slot.
pub const UPLOAD_EXPIRE_SECS: u64 = 3600;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotRequest {
    expire_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSlot {
    resource_id: String,
    put_url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ApiClient {
    /// Upload a local image and return its resource id.
    ///
    /// The file is read in full before any request is made; a missing or
    /// unreadable file yields `InputNotFound` without touching the network.
    pub async fn upload(&self, path: &Path) -> AppResult<String> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Cannot read image at {}: {}", path.display(), e);
                return Err(AppError::InputNotFound(path.to_path_buf()));
            }
        };
        tracing::info!("Uploading image: {} ({} bytes)", path.display(), body.len());

        let slot = self.request_upload_slot().await?;
        let headers = replay_headers(&slot.headers)?;

        let response = self
            .raw()
            .put(&slot.put_url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::UploadFailed {
                status: None,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            tracing::error!(status, "PUT to upload slot rejected: {}", body);
            return Err(AppError::UploadFailed {
                status: Some(status),
                message: body,
            });
        }

        tracing::info!(resource_id = %slot.resource_id, "Upload successful");
        Ok(slot.resource_id)
    }

    /// Upload several images, returning their ids in the order given.
    ///
    /// With `concurrent` set, every upload runs as its own task; results are
    /// still joined in input order since that order decides which image lands
    /// on which template slot.
    pub async fn upload_all(&self, paths: &[PathBuf], concurrent: bool) -> AppResult<Vec<String>> {
        let mut ids = Vec::with_capacity(paths.len());
        if !concurrent {
            for path in paths {
                ids.push(self.upload(path).await?);
            }
            return Ok(ids);
        }

        let handles: Vec<_> = paths
            .iter()
            .cloned()
            .map(|path| {
                let client = self.clone();
                tokio::spawn(async move { client.upload(&path).await })
            })
            .collect();
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            let joined = handle.await.map_err(|e| AppError::UploadFailed {
                status: None,
                message: format!("upload task aborted: {}", e),
            });
            match joined.and_then(|r| r) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for rest in handles.by_ref() {
                        rest.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    async fn request_upload_slot(&self) -> AppResult<UploadSlot> {
        let response = self
            .post("/v1/resource/image")
            .json(&SlotRequest {
                expire_sec: UPLOAD_EXPIRE_SECS,
            })
            .send()
            .await
            .map_err(|e| AppError::UploadFailed {
                status: None,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            tracing::error!(status, "Upload slot request rejected: {}", body);
            return Err(AppError::UploadFailed {
                status: Some(status),
                message: body,
            });
        }
        let text = response.text().await.map_err(|e| AppError::UploadFailed {
            status: None,
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| AppError::decode("upload slot", e))
    }
}

fn replay_headers(raw: &HashMap<String, String>) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::decode("upload slot", format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::decode("upload slot", format!("header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_request_uses_camel_case() {
        let body = serde_json::to_value(SlotRequest { expire_sec: 3600 }).unwrap();
        assert_eq!(body, serde_json::json!({"expireSec": 3600}));
    }

    #[test]
    fn slot_requires_resource_id_and_put_url() {
        let ok: UploadSlot = serde_json::from_str(
            r#"{"resourceId":"r1","putUrl":"https://bucket/x","headers":{"Content-Type":"image/png"}}"#,
        )
        .unwrap();
        assert_eq!(ok.resource_id, "r1");
        assert_eq!(ok.headers.get("Content-Type").map(String::as_str), Some("image/png"));

        assert!(serde_json::from_str::<UploadSlot>(r#"{"putUrl":"https://bucket/x"}"#).is_err());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut raw = HashMap::new();
        raw.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(replay_headers(&raw), Err(AppError::Decode { .. })));
    }
}
