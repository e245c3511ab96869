use serde_json::Value;
use std::{fmt, str::FromStr};

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member.
    Key(String),
    /// Array element; on an object, the member named by the number.
    Index(usize),
    /// First array element whose `field` equals `value`.
    Match { field: String, value: String },
}

/// Dotted path into a JSON document, e.g. `media.0.image.originalSrc` or
/// `selectedOptions.[name=Material].value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Follows the path. `None` when any step is missing or the shape does
    /// not fit; absence is never an error at this level.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |current, segment| match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(idx), Value::Array(items)) => items.get(*idx),
                (Segment::Index(idx), Value::Object(map)) => map.get(&idx.to_string()),
                (Segment::Match { field, value }, Value::Array(items)) => items
                    .iter()
                    .find(|item| item.get(field).is_some_and(|v| matches_text(v, value))),
                _ => None,
            })
    }
}

fn matches_text(candidate: &Value, expected: &str) -> bool {
    match candidate {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

impl FromStr for FieldPath {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Err("path is empty".to_string());
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_brackets = false;

        for ch in raw.chars() {
            match ch {
                '[' if !in_brackets && current.is_empty() => {
                    in_brackets = true;
                    current.push(ch);
                }
                ']' if in_brackets => {
                    in_brackets = false;
                    current.push(ch);
                }
                '.' if !in_brackets => {
                    segments.push(parse_segment(&current)?);
                    current.clear();
                }
                _ => current.push(ch),
            }
        }

        if in_brackets {
            return Err(format!("unclosed '[' in '{raw}'"));
        }
        segments.push(parse_segment(&current)?);

        Ok(FieldPath {
            raw: raw.to_string(),
            segments,
        })
    }
}

fn parse_segment(text: &str) -> Result<Segment, String> {
    if text.is_empty() {
        return Err("empty path segment".to_string());
    }

    if let Some(inner) = text.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("trailing text after ']' in '{text}'"))?;
        let (field, value) = inner
            .split_once('=')
            .ok_or_else(|| format!("expected [field=value], got '{text}'"))?;
        if field.is_empty() {
            return Err(format!("empty match field in '{text}'"));
        }
        return Ok(Segment::Match {
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse()
            .map(Segment::Index)
            .map_err(|e| format!("bad index '{text}': {e}"));
    }

    Ok(Segment::Key(text.to_string()))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    #[test]
    fn parses_segments() {
        assert_eq!(
            path("variants.0.selectedOptions.[name=Metal Type].value").segments(),
            &[
                Segment::Key("variants".into()),
                Segment::Index(0),
                Segment::Key("selectedOptions".into()),
                Segment::Match {
                    field: "name".into(),
                    value: "Metal Type".into()
                },
                Segment::Key("value".into()),
            ]
        );
    }

    #[test]
    fn match_value_may_contain_dots() {
        assert_eq!(
            path("opts.[size=1.5]").segments()[1],
            Segment::Match {
                field: "size".into(),
                value: "1.5".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a..b", "a.[name", "a.[=x]", "a.[name=x]y", "a.[novalue]"] {
            assert!(bad.parse::<FieldPath>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn resolves_nested_values() {
        let doc = json!({
            "variants": [{"price": "1250.00", "weight": 0.2}],
            "media": [],
            "options": [{"name": "Metal", "value": "Platinum"}, {"name": "Size", "value": 6}],
        });

        assert_eq!(path("variants.0.price").resolve(&doc), Some(&json!("1250.00")));
        assert_eq!(path("options.[name=Size].value").resolve(&doc), Some(&json!(6)));
        assert_eq!(path("media.0.image.originalSrc").resolve(&doc), None);
        assert_eq!(path("options.[name=Color].value").resolve(&doc), None);
        assert_eq!(path("variants.price").resolve(&doc), None);
    }

    #[test]
    fn numeric_segment_reads_object_member() {
        let doc = json!({"sizes": {"0": "small"}});
        assert_eq!(path("sizes.0").resolve(&doc), Some(&json!("small")));
    }
}
