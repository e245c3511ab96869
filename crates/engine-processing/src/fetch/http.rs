use super::PageSource;
use crate::error::SourceBuildError;
use async_trait::async_trait;
use engine_config::plan::{ApiSource, BodyEncoding, HttpMethod};
use model::pagination::{
    cursor::Cursor,
    page::{FetchError, Payload},
};
use reqwest::{
    Client, RequestBuilder,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;

/// Longest error body kept in a [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Catalog API client: one request per cursor, the cursor merged into a
/// fixed base payload.
pub struct HttpPageSource {
    client: Client,
    url: String,
    method: HttpMethod,
    encoding: BodyEncoding,
    form_field: String,
    cursor_field: String,
    payload: serde_json::Map<String, serde_json::Value>,
    timeout: Duration,
}

impl HttpPageSource {
    pub fn new(source: &ApiSource, timeout: Duration) -> Result<Self, SourceBuildError> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(header_map(&source.headers)?)
            .build()?;

        let payload = match &source.payload {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        Ok(HttpPageSource {
            client,
            url: source.url.clone(),
            method: source.method,
            encoding: source.encoding,
            form_field: source.form_field.clone(),
            cursor_field: source.cursor_field.clone(),
            payload,
            timeout,
        })
    }

    /// Base payload with the cursor filled in.
    pub fn body_for(&self, cursor: Cursor) -> serde_json::Value {
        let mut body = self.payload.clone();
        body.insert(self.cursor_field.clone(), cursor.value().into());
        serde_json::Value::Object(body)
    }

    fn request(&self, cursor: Cursor) -> RequestBuilder {
        let body = self.body_for(cursor);
        match (self.method, self.encoding) {
            (HttpMethod::Get, _) => self.client.get(&self.url).query(&query_pairs(&body)),
            (HttpMethod::Post, BodyEncoding::Form) => self
                .client
                .post(&self.url)
                .form(&[(self.form_field.as_str(), body.to_string())]),
            (HttpMethod::Post, BodyEncoding::Json) => self.client.post(&self.url).json(&body),
        }
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_builder() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, cursor: Cursor) -> Result<Payload, FetchError> {
        let response = self
            .request(cursor)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        debug!(cursor = %cursor, status = status.as_u16(), bytes = text.len(), "Page response");

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        serde_json::from_str(&text)
            .map(Payload::Json)
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

pub(crate) fn header_map(
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, SourceBuildError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| SourceBuildError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| SourceBuildError::Header {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Scalar entries become query parameters; nested values are sent as JSON.
fn query_pairs(body: &serde_json::Value) -> Vec<(String, String)> {
    let Some(map) = body.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}
