use super::{Normalized, path::FieldPath};
use crate::error::MappingError;
use engine_config::{plan::JsonNormalizeSpec, settings::error::SettingsError};
use model::{core::value::Value, pagination::cursor::Cursor, records::record::Record};

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    path: FieldPath,
    required: bool,
}

#[derive(Debug, Clone)]
struct MetafieldRule {
    path: FieldPath,
    key_field: String,
    value_field: String,
    keys: Vec<String>,
}

/// Maps a JSON page to records using configured field paths.
#[derive(Debug, Clone)]
pub struct JsonNormalizer {
    items_path: FieldPath,
    id_field: String,
    fields: Vec<FieldRule>,
    metafields: Option<MetafieldRule>,
}

fn parse_path(field: &str, raw: &str) -> Result<FieldPath, SettingsError> {
    raw.parse().map_err(|reason| SettingsError::InvalidPath {
        field: field.to_string(),
        reason,
    })
}

impl JsonNormalizer {
    pub fn from_spec(spec: &JsonNormalizeSpec) -> Result<Self, SettingsError> {
        let fields = spec
            .fields
            .iter()
            .map(|f| {
                Ok(FieldRule {
                    path: parse_path(&f.name, &f.path)?,
                    // The id field is always required.
                    required: f.required || f.name == spec.id_field,
                    name: f.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, SettingsError>>()?;

        let metafields = spec
            .metafields
            .as_ref()
            .map(|m| {
                Ok::<_, SettingsError>(MetafieldRule {
                    path: parse_path("metafields", &m.path)?,
                    key_field: m.key_field.clone(),
                    value_field: m.value_field.clone(),
                    keys: m.keys.clone(),
                })
            })
            .transpose()?;

        Ok(JsonNormalizer {
            items_path: parse_path("items_path", &spec.items_path)?,
            id_field: spec.id_field.clone(),
            fields,
            metafields,
        })
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn normalize(&self, cursor: Cursor, page: &serde_json::Value) -> Normalized {
        let items = match self.items_path.resolve(page) {
            None | Some(serde_json::Value::Null) => return Normalized::default(),
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => {
                return Normalized {
                    errors: vec![MappingError::UnexpectedPayload {
                        cursor,
                        reason: format!(
                            "'{}' is not an array but {}",
                            self.items_path,
                            json_kind(other)
                        ),
                    }],
                    ..Default::default()
                };
            }
        };

        let mut out = Normalized {
            items_seen: items.len(),
            ..Default::default()
        };
        for (index, item) in items.iter().enumerate() {
            match self.map_item(cursor, index, item) {
                Ok(record) => out.records.push(record),
                Err(err) => out.errors.push(err),
            }
        }
        out
    }

    fn map_item(
        &self,
        cursor: Cursor,
        index: usize,
        item: &serde_json::Value,
    ) -> Result<Record, MappingError> {
        let mut record = Record::new();

        for rule in &self.fields {
            match rule.path.resolve(item).and_then(Value::from_json) {
                Some(value) => record.insert(rule.name.clone(), value),
                None if rule.required => {
                    return Err(MappingError::MissingField {
                        cursor,
                        index,
                        field: rule.name.clone(),
                    });
                }
                None => {}
            }
        }

        if let Some(meta) = &self.metafields {
            meta.apply(item, &mut record);
        }

        Ok(record)
    }
}

impl MetafieldRule {
    /// Copies the selected entries of a key/value list into the record.
    /// Unselected keys and a missing list are ignored.
    fn apply(&self, item: &serde_json::Value, record: &mut Record) {
        let Some(serde_json::Value::Array(entries)) = self.path.resolve(item) else {
            return;
        };

        for entry in entries {
            let Some(key) = entry.get(&self.key_field).and_then(|k| k.as_str()) else {
                continue;
            };
            if !self.keys.iter().any(|k| k == key) || record.contains(key) {
                continue;
            }
            if let Some(value) = entry.get(&self.value_field).and_then(Value::from_json) {
                record.insert(key, value);
            }
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::plan::{JsonFieldSpec, MetafieldSpec};
    use serde_json::json;

    fn field(name: &str, path: &str) -> JsonFieldSpec {
        JsonFieldSpec {
            name: name.into(),
            path: path.into(),
            required: false,
        }
    }

    fn normalizer() -> JsonNormalizer {
        JsonNormalizer::from_spec(&JsonNormalizeSpec {
            items_path: "products".into(),
            id_field: "handle".into(),
            fields: vec![
                field("handle", "handle"),
                field("title", "title"),
                field("price", "variants.0.price"),
                field("image", "media.0.image.originalSrc"),
                field("metal", "variants.0.selectedOptions.[name=Metal].value"),
            ],
            metafields: Some(MetafieldSpec {
                path: "metafields".into(),
                key_field: "key".into(),
                value_field: "value".into(),
                keys: vec!["carat".into(), "shape".into()],
            }),
        })
        .unwrap()
    }

    #[test]
    fn maps_items_with_nested_paths_and_metafields() {
        let page = json!({
            "products": [{
                "handle": "oval-1",
                "title": "Oval",
                "variants": [{"price": 1250.5, "selectedOptions": [
                    {"name": "Size", "value": "6"},
                    {"name": "Metal", "value": "Platinum"}
                ]}],
                "media": [{"image": {"originalSrc": "https://cdn/x.jpg"}}],
                "metafields": [
                    {"key": "carat", "value": 1.01},
                    {"key": "internal", "value": "skip"},
                    {"key": "shape", "value": "Oval"}
                ]
            }]
        });

        let out = normalizer().normalize(Cursor::new(3), &page);
        assert_eq!(out.items_seen, 1);
        assert!(out.errors.is_empty());

        let expected = Record::new()
            .with("handle", "oval-1")
            .with("title", "Oval")
            .with("price", 1250.5)
            .with("image", "https://cdn/x.jpg")
            .with("metal", "Platinum")
            .with("carat", 1.01)
            .with("shape", "Oval");
        assert_eq!(out.records, vec![expected]);
    }

    #[test]
    fn missing_optional_structures_leave_fields_absent() {
        let page = json!({"products": [{"handle": "h", "media": [], "variants": null}]});
        let out = normalizer().normalize(Cursor::new(1), &page);

        assert_eq!(out.records, vec![Record::new().with("handle", "h")]);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn missing_id_fails_only_that_item() {
        let page = json!({"products": [
            {"handle": "a"},
            {"title": "no handle"},
            {"handle": "c", "title": null}
        ]});
        let out = normalizer().normalize(Cursor::new(9), &page);

        assert_eq!(out.items_seen, 3);
        assert_eq!(out.records.len(), 2);
        assert_eq!(
            out.errors,
            vec![MappingError::MissingField {
                cursor: Cursor::new(9),
                index: 1,
                field: "handle".into(),
            }]
        );
        assert!(!out.is_empty_page());
    }

    #[test]
    fn absent_or_empty_item_list_is_an_empty_page() {
        for page in [json!({}), json!({"products": []}), json!({"products": null})] {
            let out = normalizer().normalize(Cursor::new(2), &page);
            assert!(out.is_empty_page(), "{page}");
            assert!(out.records.is_empty());
        }
    }

    #[test]
    fn non_array_item_list_is_a_shape_error() {
        let out = normalizer().normalize(Cursor::new(2), &json!({"products": {"a": 1}}));
        assert!(!out.is_empty_page());
        assert!(matches!(
            out.errors.as_slice(),
            [MappingError::UnexpectedPayload { .. }]
        ));
    }

    #[test]
    fn rejects_invalid_paths() {
        let err = JsonNormalizer::from_spec(&JsonNormalizeSpec {
            items_path: "products".into(),
            id_field: "id".into(),
            fields: vec![field("id", "a..b")],
            metafields: None,
        })
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPath { field, .. } if field == "id"));
    }
}
