use crate::error::MappingError;
use engine_config::{plan::NormalizeSpec, settings::error::SettingsError};
use model::{
    pagination::{cursor::Cursor, page::Payload},
    records::record::Record,
};
use tracing::warn;

pub mod html;
pub mod json;
pub mod path;

use html::HtmlNormalizer;
use json::JsonNormalizer;

/// What one page turned into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// Raw items found on the page, mapped or not.
    pub items_seen: usize,
    pub records: Vec<Record>,
    pub errors: Vec<MappingError>,
}

impl Normalized {
    /// True when the page was well-formed and carried no items at all. Items
    /// that failed to map still count as items.
    pub fn is_empty_page(&self) -> bool {
        self.items_seen == 0 && self.errors.is_empty()
    }
}

/// Pure mapping from a raw page to flat records, built from configuration.
#[derive(Debug, Clone)]
pub enum Normalizer {
    Json(JsonNormalizer),
    Html(HtmlNormalizer),
}

impl Normalizer {
    pub fn from_spec(spec: &NormalizeSpec) -> Result<Self, SettingsError> {
        Ok(match spec {
            NormalizeSpec::Json(spec) => Normalizer::Json(JsonNormalizer::from_spec(spec)?),
            NormalizeSpec::Html(spec) => Normalizer::Html(HtmlNormalizer::from_spec(spec)?),
        })
    }

    pub fn id_field(&self) -> &str {
        match self {
            Normalizer::Json(n) => n.id_field(),
            Normalizer::Html(n) => n.id_field(),
        }
    }

    pub fn normalize(&self, cursor: Cursor, payload: &Payload) -> Normalized {
        let normalized = match (self, payload) {
            (Normalizer::Json(n), Payload::Json(value)) => n.normalize(cursor, value),
            (Normalizer::Html(n), Payload::Markup(markup)) => n.normalize(cursor, markup),
            (Normalizer::Json(n), Payload::Markup(text)) => match serde_json::from_str(text) {
                Ok(value) => n.normalize(cursor, &value),
                Err(e) => shape_error(cursor, format!("expected JSON, got markup: {e}")),
            },
            (Normalizer::Html(_), Payload::Json(_)) => {
                shape_error(cursor, "expected markup, got JSON".to_string())
            }
        };

        for err in &normalized.errors {
            warn!(cursor = %cursor, error = %err, "Skipping record");
        }
        normalized
    }
}

fn shape_error(cursor: Cursor, reason: String) -> Normalized {
    Normalized {
        errors: vec![MappingError::UnexpectedPayload { cursor, reason }],
        ..Default::default()
    }
}
