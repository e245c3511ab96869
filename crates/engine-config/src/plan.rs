use crate::{
    env::EnvManager,
    error::PlanError,
    settings::{EngineSettings, error::SettingsError},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::debug;

/// A complete, validated description of one harvest.
///
/// Plans are written in TOML:
///
/// ```toml
/// [run]
/// name = "center-stones"
/// state_dir = "state"
/// output_dir = "downloads"
///
/// [engine]
/// concurrency = 10
/// flush_threshold = 1120
/// end = 1818
///
/// [source]
/// kind = "api"
/// url = "https://example.com/collections/center-stones"
/// payload = { sortState = "price-ascending" }
///
/// [normalize]
/// kind = "json"
/// items_path = "products"
/// id_field = "title"
/// fields = [{ name = "title", path = "title", required = true }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestPlan {
    pub run: RunSection,
    #[serde(default)]
    pub engine: EngineSettings,
    pub source: SourceSpec,
    pub normalize: NormalizeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    pub name: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub checkpoint: CheckpointBackend,
}

impl RunSection {
    /// Directory the run's batch files are written to.
    pub fn batch_dir(&self) -> PathBuf {
        self.output_dir.join(&self.name)
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// A single JSON file replaced atomically on every update.
    #[default]
    File,
    /// A sled tree, which also keeps the run journal.
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Cursor-addressed catalog API.
    Api(ApiSource),
    /// UI-paginated listing driven through a "next" control.
    Pages(PagesSource),
}

impl SourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::Api(_) => "api",
            SourceSpec::Pages(_) => "pages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// The JSON payload is sent as one form field.
    #[default]
    Form,
    /// The JSON payload is the request body.
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSource {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub encoding: BodyEncoding,
    /// Form field carrying the JSON payload when `encoding = "form"`.
    #[serde(default = "default_form_field")]
    pub form_field: String,
    /// Payload key (POST) or query parameter (GET) carrying the cursor.
    #[serde(default = "default_cursor_field")]
    pub cursor_field: String,
    /// Filter and sort state sent with every request.
    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_form_field() -> String {
    "body".to_string()
}

fn default_cursor_field() -> String {
    "cursor".to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PagesSource {
    /// Listing URL of the first page.
    pub start_url: String,
    /// Direct address of page `n`, e.g. `https://host/list?page={page}`.
    /// Without it, resume replays "next" clicks from the start URL.
    pub page_url_template: Option<String>,
    /// Selector of the pagination control that advances to the next page.
    pub next_selector: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizeSpec {
    Json(JsonNormalizeSpec),
    Html(HtmlNormalizeSpec),
}

impl NormalizeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeSpec::Json(_) => "json",
            NormalizeSpec::Html(_) => "html",
        }
    }

    pub fn id_field(&self) -> &str {
        match self {
            NormalizeSpec::Json(spec) => &spec.id_field,
            NormalizeSpec::Html(spec) => &spec.id_field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonNormalizeSpec {
    /// Path to the array of raw items inside a page payload.
    #[serde(default = "default_items_path")]
    pub items_path: String,
    /// Field whose absence fails the record, also used as dedup key.
    pub id_field: String,
    pub fields: Vec<JsonFieldSpec>,
    pub metafields: Option<MetafieldSpec>,
}

fn default_items_path() -> String {
    "products".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonFieldSpec {
    pub name: String,
    /// Dotted path, e.g. `variants.0.price` or `options.[name=Material].value`.
    pub path: String,
    #[serde(default)]
    pub required: bool,
}

/// Pulls selected entries out of a generic key/value list on each item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetafieldSpec {
    pub path: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
    pub keys: Vec<String>,
}

fn default_key_field() -> String {
    "key".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlNormalizeSpec {
    /// Selector matching one element per item.
    pub item_selector: String,
    pub id_field: String,
    pub fields: Vec<HtmlFieldSpec>,
    /// Site root that `//host/..` and `/path` attribute values are resolved
    /// against. Left as-is without it.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlFieldSpec {
    pub name: String,
    /// Selector relative to the item element.
    pub selector: String,
    /// Attribute to read. Without it the element's text is used.
    pub attr: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Read every match instead of the first and join them with this
    /// separator.
    #[serde(default)]
    pub join: Option<String>,
}

impl HarvestPlan {
    /// Reads, expands and validates a plan file.
    pub fn load(path: impl AsRef<Path>, env: &EnvManager) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded plan file");
        Self::from_toml_str(&env.expand(&text)?)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, PlanError> {
        let plan: HarvestPlan = toml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.engine.validate()?;

        if let (SourceSpec::Pages(_), NormalizeSpec::Json(_)) = (&self.source, &self.normalize) {
            return Err(SettingsError::Incompatible {
                source_kind: self.source.kind(),
                normalizer: self.normalize.kind(),
            });
        }

        let names: Vec<&str> = match &self.normalize {
            NormalizeSpec::Json(spec) => spec.fields.iter().map(|f| f.name.as_str()).collect(),
            NormalizeSpec::Html(spec) => spec.fields.iter().map(|f| f.name.as_str()).collect(),
        };

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(*name) {
                return Err(SettingsError::DuplicateField(name.to_string()));
            }
        }

        let id_field = self.normalize.id_field();
        if !seen.contains(id_field) {
            return Err(SettingsError::UnknownIdField(id_field.to_string()));
        }

        Ok(())
    }

    /// Stable fingerprint of the plan, recorded in the run journal so a
    /// resume can tell whether batch boundaries may have moved.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", md5::compute(&json))
    }

    /// Whether this plan harvests through a pagination control.
    pub fn is_button_mode(&self) -> bool {
        matches!(self.source, SourceSpec::Pages(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const API_PLAN: &str = r#"
        [run]
        name = "center-stones"
        output_dir = "out"

        [engine]
        concurrency = 4
        flush_threshold = 28
        retry_delay_ms = 10
        end = 1818

        [source]
        kind = "api"
        url = "https://example.com/collections/center-stones"

        [source.payload]
        stoneTypeState = "labDiamond"
        sortState = "price-ascending"

        [normalize]
        kind = "json"
        id_field = "title"
        fields = [
            { name = "title", path = "title", required = true },
            { name = "price", path = "variants.0.price" },
        ]

        [normalize.metafields]
        path = "metafields"
        keys = ["carat", "color"]
    "#;

    #[test]
    fn parses_api_plan() {
        let plan = HarvestPlan::from_toml_str(API_PLAN).unwrap();

        assert_eq!(plan.run.name, "center-stones");
        assert_eq!(plan.run.state_dir, PathBuf::from("state"));
        assert_eq!(plan.run.checkpoint, CheckpointBackend::File);
        assert_eq!(plan.engine.concurrency, 4);
        assert_eq!(plan.engine.retry_delay, Duration::from_millis(10));
        assert!(!plan.is_button_mode());

        let SourceSpec::Api(api) = &plan.source else {
            panic!("expected api source");
        };
        assert_eq!(api.method, HttpMethod::Post);
        assert_eq!(api.encoding, BodyEncoding::Form);
        assert_eq!(api.form_field, "body");
        assert_eq!(api.cursor_field, "cursor");
        assert_eq!(api.payload["sortState"], "price-ascending");

        let NormalizeSpec::Json(spec) = &plan.normalize else {
            panic!("expected json normalizer");
        };
        assert_eq!(spec.items_path, "products");
        let meta = spec.metafields.as_ref().unwrap();
        assert_eq!(meta.key_field, "key");
        assert_eq!(meta.keys, vec!["carat", "color"]);
    }

    #[test]
    fn rejects_unknown_id_field() {
        let text = API_PLAN.replace(r#"id_field = "title""#, r#"id_field = "sku""#);
        let err = HarvestPlan::from_toml_str(&text).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Settings(SettingsError::UnknownIdField(ref f)) if f == "sku"
        ));
    }

    #[test]
    fn rejects_pages_source_with_json_normalizer() {
        let text = API_PLAN
            .replace(r#"kind = "api""#, r#"kind = "pages""#)
            .replace(
                r#"url = "https://example.com/collections/center-stones""#,
                "start_url = \"https://example.com/list\"\nnext_selector = \"a.next\"",
            )
            .replace("[source.payload]\n", "")
            .replace(r#"stoneTypeState = "labDiamond""#, "")
            .replace(r#"sortState = "price-ascending""#, "");

        let err = HarvestPlan::from_toml_str(&text).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Settings(SettingsError::Incompatible { .. })
        ));
    }

    #[test]
    fn parses_pages_plan() {
        let plan = HarvestPlan::from_toml_str(
            r#"
            [run]
            name = "settings"
            checkpoint = "sled"

            [source]
            kind = "pages"
            start_url = "https://example.com/collections/settings"
            page_url_template = "https://example.com/collections/settings?page={page}"
            next_selector = "a.pagination__next"

            [normalize]
            kind = "html"
            item_selector = "li.product"
            id_field = "url"
            fields = [
                { name = "url", selector = "a.product-link", attr = "href", required = true },
                { name = "title", selector = ".product-title" },
            ]
            "#,
        )
        .unwrap();

        assert!(plan.is_button_mode());
        assert_eq!(plan.run.checkpoint, CheckpointBackend::Sled);
        assert_eq!(plan.normalize.id_field(), "url");
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = HarvestPlan::from_toml_str(API_PLAN).unwrap();
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.engine.flush_threshold = 56;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn load_expands_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        std::fs::write(
            &path,
            API_PLAN.replace("https://example.com", "${CATALOG_HOST}"),
        )
        .unwrap();

        let mut env = EnvManager::empty();
        env.set("CATALOG_HOST", "https://shop.test");
        let plan = HarvestPlan::load(&path, &env).unwrap();

        let SourceSpec::Api(api) = &plan.source else {
            panic!("expected api source");
        };
        assert_eq!(api.url, "https://shop.test/collections/center-stones");
    }
}
