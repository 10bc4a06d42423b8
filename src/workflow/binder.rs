//! Maps uploaded resource ids and prompt text onto a template's fields.
//!
//! Rules, applied to each declaration in template order:
//! 1. a field whose name contains `image` (any case) takes the next unused
//!    resource id, or `""` once they run out;
//! 2. `prompt` / `text_positive` take the prompt when one was given;
//! 3. `width` / `height` are forced to the fixed resolution, if enabled;
//! 4. anything else keeps its declared default.
//!
//! Output order equals declaration order. The service wires its execution
//! graph by that order, so it must never be shuffled.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Resolution;
use crate::workflow::template::{FieldDeclaration, Template};

const PROMPT_FIELDS: &[&str] = &["prompt", "text_positive"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundField {
    pub node_id: String,
    pub field_name: String,
    pub field_value: Value,
}

impl BoundField {
    pub fn new(node_id: impl Into<String>, field_name: impl Into<String>, field_value: impl Into<Value>) -> Self {
        BoundField {
            node_id: node_id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOptions {
    /// Forced onto `width`/`height`; `None` lets template defaults through.
    pub resolution: Option<Resolution>,
}

impl Default for BindOptions {
    fn default() -> Self {
        BindOptions {
            resolution: Some(Resolution::default()),
        }
    }
}

/// Produce the field list for one job submission.
///
/// Surplus resource ids are ignored; missing ones leave image slots as `""`.
pub fn bind(
    template: &Template,
    resource_ids: &[String],
    prompt: Option<&str>,
    options: &BindOptions,
) -> Vec<BoundField> {
    let prompt = prompt.filter(|p| !p.is_empty());
    let mut ids = resource_ids.iter();

    let bound: Vec<BoundField> = template
        .fields
        .iter()
        .map(|decl| {
            let value = if decl.is_image_slot() {
                ids.next().map(|id| Value::String(id.clone())).unwrap_or_else(|| Value::String(String::new()))
            } else {
                bind_scalar(decl, prompt, options)
            };
            BoundField {
                node_id: decl.node_id.clone(),
                field_name: decl.field_name.clone(),
                field_value: value,
            }
        })
        .collect();

    let unused = ids.count();
    if unused > 0 {
        tracing::warn!(
            template_id = %template.id,
            unused,
            "more images than image fields; extra resource ids ignored"
        );
    }
    tracing::debug!(template_id = %template.id, fields = bound.len(), "bound template fields");
    bound
}

fn bind_scalar(decl: &FieldDeclaration, prompt: Option<&str>, options: &BindOptions) -> Value {
    let name = decl.field_name.as_str();
    if let Some(text) = prompt.filter(|_| PROMPT_FIELDS.contains(&name)) {
        return Value::String(text.to_string());
    }
    match (name, options.resolution) {
        ("width", Some(res)) => Value::from(res.width),
        ("height", Some(res)) => Value::from(res.height),
        _ => decl.default_value.clone(),
    }
}
