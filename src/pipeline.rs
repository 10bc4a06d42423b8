//! One full run: upload -> fetch template -> bind -> submit -> poll -> download.
//!
//! Stages run strictly in sequence and the first failure ends the run.
use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::preprocess::{crop_source, FaceDetector, FaceSelection};
use crate::workflow::overrides::apply_overrides;
use crate::workflow::{bind, ApiClient, BindOptions, BoundField, FieldOverride};

#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub template_id: String,
    /// Order matters: the n-th image fills the n-th image field.
    pub images: Vec<PathBuf>,
    pub prompt: Option<String>,
    pub overrides: Vec<FieldOverride>,
    pub concurrent_uploads: bool,
}

/// Swap the first image for its face crop, written beside the source file.
pub async fn crop_first_image(
    inputs: &mut RunInputs,
    selection: FaceSelection,
    detector: Option<&dyn FaceDetector>,
) -> AppResult<()> {
    let first = inputs
        .images
        .first_mut()
        .ok_or_else(|| AppError::InvalidFaceBox("no image to crop".to_string()))?;
    let cropped = crop_source(first.as_path(), selection, detector).await?;
    *first = cropped;
    Ok(())
}

/// Upload, fetch and bind without submitting anything.
pub async fn plan(client: &ApiClient, inputs: &RunInputs) -> AppResult<Vec<BoundField>> {
    let resource_ids = client.upload_all(&inputs.images, inputs.concurrent_uploads).await?;
    let template = client.fetch_template(&inputs.template_id).await?;

    let image_slots = template.image_field_count();
    if image_slots < resource_ids.len() {
        tracing::warn!(
            image_slots,
            images = resource_ids.len(),
            "template has fewer image fields than images supplied"
        );
    }

    let options = BindOptions {
        resolution: client.config().resolution,
    };
    let bound = bind(&template, &resource_ids, inputs.prompt.as_deref(), &options);
    apply_overrides(&bound, &inputs.overrides)
}

/// Run the whole pipeline and return the downloaded artifact path.
pub async fn run(client: &ApiClient, inputs: &RunInputs) -> AppResult<PathBuf> {
    let fields = plan(client, inputs).await?;
    let path = client.run_job(&inputs.template_id, fields).await?;
    tracing::info!(template_id = %inputs.template_id, "Run finished: {}", path.display());
    Ok(path)
}
