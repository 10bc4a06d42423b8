//! Workflow templates and their declared input fields.
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::workflow::client::{failure_parts, ApiClient};

/// One addressable input slot of a template. `node_id` + `field_name` is
/// unique within a template.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    #[serde(deserialize_with = "string_or_number")]
    pub node_id: String,
    pub field_name: String,
    #[serde(rename = "fieldValue", default)]
    pub default_value: Value,
}

impl FieldDeclaration {
    pub fn new(node_id: impl Into<String>, field_name: impl Into<String>, default_value: Value) -> Self {
        FieldDeclaration {
            node_id: node_id.into(),
            field_name: field_name.into(),
            default_value,
        }
    }

    pub fn is_image_slot(&self) -> bool {
        self.field_name.to_lowercase().contains("image")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub fields: Vec<FieldDeclaration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateBody {
    fields: FieldList,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldList {
    field_attrs: Vec<FieldDeclaration>,
}

impl Template {
    /// Decode the service's template document.
    pub fn from_json(id: impl Into<String>, body: &str) -> AppResult<Self> {
        let parsed: TemplateBody =
            serde_json::from_str(body).map_err(|e| AppError::decode("template", e))?;
        Ok(Template {
            id: id.into(),
            fields: parsed.fields.field_attrs,
        })
    }

    pub fn image_field_count(&self) -> usize {
        self.fields.iter().filter(|f| f.is_image_slot()).count()
    }
}

impl ApiClient {
    /// Fetch a template's field schema. Nothing is interpreted here; that is
    /// the binder's job.
    pub async fn fetch_template(&self, template_id: &str) -> AppResult<Template> {
        let response = self
            .get(&format!("/v1/workflows/{}", template_id))
            .send()
            .await
            .map_err(|e| AppError::FetchFailed {
                status: None,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            tracing::error!(status, template_id, "Error fetching template: {}", body);
            return Err(AppError::FetchFailed {
                status: Some(status),
                message: body,
            });
        }
        let body = response.text().await.map_err(|e| AppError::FetchFailed {
            status: None,
            message: e.to_string(),
        })?;
        let template = Template::from_json(template_id, &body)?;
        tracing::info!(
            template_id,
            fields = template.fields.len(),
            image_slots = template.image_field_count(),
            "Fetched template"
        );
        Ok(template)
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or numeric id, got {}",
            other
        ))),
    }
}
