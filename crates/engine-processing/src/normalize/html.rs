use super::Normalized;
use crate::error::MappingError;
use engine_config::{plan::HtmlNormalizeSpec, settings::error::SettingsError};
use model::{core::value::Value, pagination::cursor::Cursor, records::record::Record};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Clone)]
struct HtmlFieldRule {
    name: String,
    /// `None` reads the item element itself.
    selector: Option<Selector>,
    attr: Option<String>,
    required: bool,
    join: Option<String>,
}

/// Maps rendered collection markup to records using CSS selectors.
#[derive(Debug, Clone)]
pub struct HtmlNormalizer {
    item_selector: Selector,
    id_field: String,
    fields: Vec<HtmlFieldRule>,
    base_url: Option<Url>,
}

fn parse_selector(field: &str, raw: &str) -> Result<Selector, SettingsError> {
    Selector::parse(raw).map_err(|e| SettingsError::InvalidPath {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

impl HtmlNormalizer {
    pub fn from_spec(spec: &HtmlNormalizeSpec) -> Result<Self, SettingsError> {
        let fields = spec
            .fields
            .iter()
            .map(|f| {
                let selector = match f.selector.trim() {
                    "" => None,
                    raw => Some(parse_selector(&f.name, raw)?),
                };
                Ok(HtmlFieldRule {
                    name: f.name.clone(),
                    selector,
                    attr: f.attr.clone(),
                    required: f.required || f.name == spec.id_field,
                    join: f.join.clone(),
                })
            })
            .collect::<Result<Vec<_>, SettingsError>>()?;

        Ok(HtmlNormalizer {
            item_selector: parse_selector("item_selector", &spec.item_selector)?,
            id_field: spec.id_field.clone(),
            fields,
            base_url: spec
                .base_url
                .as_deref()
                .map(|raw| Url::parse(raw).map_err(|_| SettingsError::InvalidBaseUrl(raw.into())))
                .transpose()?,
        })
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn normalize(&self, cursor: Cursor, markup: &str) -> Normalized {
        let document = Html::parse_document(markup);
        let mut out = Normalized::default();

        for (index, item) in document.select(&self.item_selector).enumerate() {
            out.items_seen += 1;
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
        item: ElementRef<'_>,
    ) -> Result<Record, MappingError> {
        let mut record = Record::new();

        for rule in &self.fields {
            match rule.extract(item, self.base_url.as_ref()) {
                Some(text) => record.insert(rule.name.clone(), Value::Text(text)),
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

        Ok(record)
    }
}

impl HtmlFieldRule {
    /// Attribute value or whitespace-collapsed text. Blank results count as
    /// absent. With `join`, every non-blank match is kept.
    fn extract(&self, item: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
        let Some(selector) = &self.selector else {
            return self.read(item, base);
        };

        match &self.join {
            Some(sep) => {
                let values: Vec<String> = item
                    .select(selector)
                    .filter_map(|el| self.read(el, base))
                    .collect();
                (!values.is_empty()).then(|| values.join(sep))
            }
            None => self.read(item.select(selector).next()?, base),
        }
    }

    fn read(&self, element: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
        let text = match &self.attr {
            Some(attr) => resolve(element.value().attr(attr)?.trim(), base),
            None => collapse_whitespace(element.text()),
        };

        (!text.is_empty()).then_some(text)
    }
}

/// Makes protocol-relative and root-relative values absolute. Anything
/// else is returned unchanged.
fn resolve(raw: &str, base: Option<&Url>) -> String {
    match base {
        Some(base) if raw.starts_with('/') => base
            .join(raw)
            .map(String::from)
            .unwrap_or_else(|_| raw.to_string()),
        _ => raw.to_string(),
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::plan::HtmlFieldSpec;

    const PAGE: &str = r#"
        <html><body>
          <ul class="grid">
            <li class="product" data-sku="R-100">
              <a class="title" href="/products/oval">  Oval
                 Solitaire </a>
              <span class="price">$1,250</span>
            </li>
            <li class="product">
              <a class="title" href="/products/round">Round</a>
            </li>
            <li class="product" data-sku="R-300">
              <a class="title" href="/products/pear"></a>
            </li>
          </ul>
        </body></html>
    "#;

    fn field(name: &str, selector: &str, attr: Option<&str>) -> HtmlFieldSpec {
        HtmlFieldSpec {
            name: name.into(),
            selector: selector.into(),
            attr: attr.map(str::to_string),
            required: false,
            join: None,
        }
    }

    fn normalizer() -> HtmlNormalizer {
        HtmlNormalizer::from_spec(&HtmlNormalizeSpec {
            item_selector: "li.product".into(),
            id_field: "sku".into(),
            fields: vec![
                field("sku", "", Some("data-sku")),
                field("title", "a.title", None),
                field("url", "a.title", Some("href")),
                field("price", ".price", None),
            ],
            base_url: None,
        })
        .unwrap()
    }

    #[test]
    fn extracts_text_and_attributes() {
        let out = normalizer().normalize(Cursor::new(1), PAGE);

        assert_eq!(out.items_seen, 3);
        assert_eq!(
            out.records,
            vec![
                Record::new()
                    .with("sku", "R-100")
                    .with("title", "Oval Solitaire")
                    .with("url", "/products/oval")
                    .with("price", "$1,250"),
                Record::new()
                    .with("sku", "R-300")
                    .with("url", "/products/pear"),
            ]
        );
        assert_eq!(
            out.errors,
            vec![MappingError::MissingField {
                cursor: Cursor::new(1),
                index: 1,
                field: "sku".into(),
            }]
        );
    }

    #[test]
    fn page_without_items_is_empty() {
        let out = normalizer().normalize(Cursor::new(4), "<html><body></body></html>");
        assert!(out.is_empty_page());
    }

    #[test]
    fn rejects_bad_selectors() {
        let err = HtmlNormalizer::from_spec(&HtmlNormalizeSpec {
            item_selector: "li.product".into(),
            id_field: "sku".into(),
            fields: vec![field("sku", "a[[", None)],
            base_url: None,
        })
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPath { field, .. } if field == "sku"));
    }

    const GALLERY: &str = r#"
        <div class="product" data-sku="R-100">
          <img src="//cdn.example.com/rings/oval-1.jpg">
          <img src="/files/oval-2.jpg">
          <img src="https://img.example.net/oval-3.jpg">
          <img src="">
        </div>
        <div class="product" data-sku="R-200"></div>
    "#;

    #[test]
    fn joins_every_match_and_resolves_site_relative_urls() {
        let mut images = field("images", "img", Some("src"));
        images.join = Some(";".into());
        let normalizer = HtmlNormalizer::from_spec(&HtmlNormalizeSpec {
            item_selector: "div.product".into(),
            id_field: "sku".into(),
            fields: vec![field("sku", "", Some("data-sku")), images],
            base_url: Some("https://shop.example.com/collections/rings".into()),
        })
        .unwrap();

        let out = normalizer.normalize(Cursor::new(1), GALLERY);

        assert_eq!(
            out.records,
            vec![
                Record::new().with("sku", "R-100").with(
                    "images",
                    "https://cdn.example.com/rings/oval-1.jpg;\
                     https://shop.example.com/files/oval-2.jpg;\
                     https://img.example.net/oval-3.jpg"
                ),
                Record::new().with("sku", "R-200"),
            ]
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = HtmlNormalizer::from_spec(&HtmlNormalizeSpec {
            item_selector: "li.product".into(),
            id_field: "sku".into(),
            fields: vec![field("sku", "", Some("data-sku"))],
            base_url: Some("not a url".into()),
        })
        .unwrap_err();
        assert_eq!(err, SettingsError::InvalidBaseUrl("not a url".into()));
    }
}
