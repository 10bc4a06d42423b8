//! Jobs whose inputs are fixed rather than bound from a fetched template.
use std::path::{Path, PathBuf};

use crate::error::AppResult;
use crate::workflow::{ApiClient, BoundField, JobRequest, RequestId};

/// Face swap workflow run when no template id is given.
pub const DEFAULT_TEMPLATE_ID: &str = "688362427502551075";

/// Portrait upscale/enhance workflow.
pub const UPSCALE_TEMPLATE_ID: &str = "851732213811647787";

pub const UPSCALE_POSITIVE_PROMPT: &str = "photorealistic portrait, high resolution, detailed, sharp features";
pub const UPSCALE_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, deformed, disfigured";

/// Field list for the upscale workflow, keyed to its node ids.
pub fn upscale_fields(resource_id: &str, request_id: &RequestId) -> Vec<BoundField> {
    let prefix: String = request_id.as_str().chars().take(8).collect();
    vec![
        // LoadImage
        BoundField::new("21", "image", resource_id),
        // CLIPTextEncode positive / negative
        BoundField::new("6", "text", UPSCALE_POSITIVE_PROMPT),
        BoundField::new("7", "text", UPSCALE_NEGATIVE_PROMPT),
        // checkpoint loader
        BoundField::new("15", "ckpt_name", "603269903807549991"),
        BoundField::new("15", "model_name", "EpiCRealism - pure Evo"),
        // KSampler
        BoundField::new("3", "seed", "586515547860208"),
        BoundField::new("3", "control_after_generate", "fixed"),
        BoundField::new("3", "steps", "25"),
        BoundField::new("3", "cfg", "8"),
        BoundField::new("3", "sampler_name", "euler"),
        BoundField::new("3", "scheduler", "normal"),
        BoundField::new("3", "denoise", "0.15"),
        // UpscaleModelLoader
        BoundField::new("13", "model_name", "4x_RealisticRescaler_100000_G.pth"),
        // SaveImage
        BoundField::new("9", "filename_prefix", format!("TensorArt_{}", prefix)),
    ]
}

pub fn upscale_request(resource_id: &str) -> JobRequest {
    let request_id = RequestId::generate();
    let fields = upscale_fields(resource_id, &request_id);
    JobRequest::with_request_id(request_id, UPSCALE_TEMPLATE_ID, fields)
}

/// Upload `path`, run the upscale workflow on it and download the result.
pub async fn run_upscale(client: &ApiClient, path: &Path) -> AppResult<PathBuf> {
    let resource_id = client.upload(path).await?;
    tracing::info!(resource_id = %resource_id, "Running upscale preset");
    client.run_request(&upscale_request(&resource_id)).await
}
