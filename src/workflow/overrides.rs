//! `NODE.FIELD=VALUE` overrides applied on top of a bound field list.
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::workflow::binder::BoundField;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldOverride {
    pub node_id: String,
    pub field_name: String,
    pub value: Value,
}

impl FieldOverride {
    /// Parse `21.image=abc` or `3.seed=42`. The node id is everything before
    /// the first `.`, so field names may themselves contain dots.
    pub fn parse(src: &str) -> AppResult<Self> {
        let Some((key, val)) = src.split_once('=') else {
            return Err(AppError::InvalidOverride(format!(
                "'{}', expected NODE.FIELD=VALUE",
                src
            )));
        };
        let Some((node_id, field_name)) = key.split_once('.') else {
            return Err(AppError::InvalidOverride(format!(
                "'{}', key must look like NODE.FIELD",
                key
            )));
        };
        if node_id.is_empty() || field_name.is_empty() {
            return Err(AppError::InvalidOverride(format!("'{}' has an empty node or field", key)));
        }
        Ok(FieldOverride {
            node_id: node_id.to_string(),
            field_name: field_name.to_string(),
            value: parse_value(val),
        })
    }

    pub fn parse_all(items: &[String]) -> AppResult<Vec<Self>> {
        items.iter().map(|s| Self::parse(s)).collect()
    }
}

/// JSON first; otherwise case-insensitive `true`/`false`/`null`, else a
/// plain string.
pub fn parse_value(src: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(src) {
        return v;
    }
    match src.to_ascii_lowercase().as_str() {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(src.to_string()),
    }
}

/// Rebuild `fields` with every override applied. Each override must name a
/// slot that is already present; new slots are never invented.
pub fn apply_overrides(fields: &[BoundField], overrides: &[FieldOverride]) -> AppResult<Vec<BoundField>> {
    for o in overrides {
        let known = fields
            .iter()
            .any(|f| f.node_id == o.node_id && f.field_name == o.field_name);
        if !known {
            return Err(AppError::InvalidOverride(format!(
                "template has no field {}.{}",
                o.node_id, o.field_name
            )));
        }
    }

    Ok(fields
        .iter()
        .map(|f| {
            let replaced = overrides
                .iter()
                .rev()
                .find(|o| o.node_id == f.node_id && o.field_name == f.field_name);
            match replaced {
                Some(o) => BoundField {
                    field_value: o.value.clone(),
                    ..f.clone()
                },
                None => f.clone(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_then_keywords_then_string() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("0.15"), json!(0.15));
        assert_eq!(parse_value("TRUE"), json!(true));
        assert_eq!(parse_value("Null"), Value::Null);
        assert_eq!(parse_value("False"), json!(false));
        assert_eq!(parse_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_value("euler"), json!("euler"));
    }

    #[test]
    fn parse_splits_on_first_dot_and_equals() {
        let o = FieldOverride::parse("3.sampler.name=a=b").unwrap();
        assert_eq!(o.node_id, "3");
        assert_eq!(o.field_name, "sampler.name");
        assert_eq!(o.value, json!("a=b"));

        assert!(FieldOverride::parse("3.seed").is_err());
        assert!(FieldOverride::parse("seed=3").is_err());
        assert!(FieldOverride::parse(".seed=3").is_err());
    }

    #[test]
    fn overrides_replace_values_in_place_order() {
        let fields = vec![
            BoundField::new("3", "seed", 1),
            BoundField::new("3", "steps", 20),
        ];
        let overrides = FieldOverride::parse_all(&["3.steps=25".into(), "3.steps=30".into()]).unwrap();
        let out = apply_overrides(&fields, &overrides).unwrap();
        assert_eq!(out, vec![BoundField::new("3", "seed", 1), BoundField::new("3", "steps", 30)]);
        // input untouched
        assert_eq!(fields[1].field_value, json!(20));
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let fields = vec![BoundField::new("3", "seed", 1)];
        let overrides = FieldOverride::parse_all(&["9.seed=2".into()]).unwrap();
        assert!(matches!(
            apply_overrides(&fields, &overrides),
            Err(AppError::InvalidOverride(_))
        ));
    }
}
