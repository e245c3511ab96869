use async_trait::async_trait;
use engine_config::plan::PagesSource;
use model::pagination::cursor::Cursor;
use reqwest::{
    Client, Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Invalid next-control selector: {0}")]
    Selector(String),

    #[error("Invalid header '{name}': {reason}")]
    Header { name: String, reason: String },

    #[error("No page loaded yet")]
    NotLoaded,
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::Status { status: 404, .. })
    }
}

/// Result of pressing the "next page" control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Advanced,
    /// The control is missing or disabled: there are no further pages.
    Disabled,
    /// The click did not take effect and may be retried.
    Failed(String),
}

/// Something that can show one listing page at a time and step through the
/// pagination control, such as a browser session.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_markup(&self) -> Result<String, DriverError>;

    async fn click_next(&self) -> ClickOutcome;

    /// Whether [`PageDriver::page_url`] can address pages directly.
    fn supports_direct_navigation(&self) -> bool {
        false
    }

    /// URL of the `page`-th page, when pages are addressable.
    fn page_url(&self, _page: Cursor) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: Url,
    markup: String,
}

/// Where the next control points, read from the current markup.
enum NextControl {
    Missing,
    Disabled,
    Link(String),
    NoTarget,
}

/// Plain HTTP driver for server-rendered listings: the next control is a
/// link, and pages may be addressable through a `{page}` URL template.
pub struct HttpPageDriver {
    client: Client,
    template: Option<String>,
    next_selector: Selector,
    current: Mutex<Option<LoadedPage>>,
}

impl HttpPageDriver {
    pub fn new(source: &PagesSource, timeout: Duration) -> Result<Self, DriverError> {
        let next_selector = Selector::parse(&source.next_selector)
            .map_err(|e| DriverError::Selector(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &source.headers {
            let invalid = |reason: String| DriverError::Header {
                name: name.clone(),
                reason,
            };
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?,
                HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| DriverError::Request {
                url: source.start_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(HttpPageDriver {
            client,
            template: source.page_url_template.clone(),
            next_selector,
            current: Mutex::new(None),
        })
    }

    async fn load(&self, url: Url) -> Result<LoadedPage, DriverError> {
        let request_err = |e: reqwest::Error| DriverError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let markup = response.text().await.map_err(request_err)?;
        debug!(url = %url, bytes = markup.len(), "Loaded page");
        Ok(LoadedPage { url, markup })
    }

    /// Parsed documents are not `Send`, so inspection stays synchronous.
    fn next_control(&self, markup: &str) -> NextControl {
        let document = Html::parse_document(markup);
        let Some(control) = document.select(&self.next_selector).next() else {
            return NextControl::Missing;
        };

        let element = control.value();
        let disabled = element.attr("disabled").is_some()
            || element.attr("aria-disabled") == Some("true")
            || element.classes().any(|c| c == "disabled");
        if disabled {
            return NextControl::Disabled;
        }

        match element.attr("href").map(str::trim) {
            Some(href) if !href.is_empty() && href != "#" => NextControl::Link(href.to_string()),
            _ => NextControl::NoTarget,
        }
    }
}

#[async_trait]
impl PageDriver for HttpPageDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let url = Url::parse(url).map_err(|_| DriverError::InvalidUrl(url.to_string()))?;
        let page = self.load(url).await?;
        *self.current.lock().await = Some(page);
        Ok(())
    }

    async fn current_markup(&self) -> Result<String, DriverError> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|page| page.markup.clone())
            .ok_or(DriverError::NotLoaded)
    }

    async fn click_next(&self) -> ClickOutcome {
        let (base, control) = {
            let current = self.current.lock().await;
            let Some(page) = current.as_ref() else {
                return ClickOutcome::Failed(DriverError::NotLoaded.to_string());
            };
            (page.url.clone(), self.next_control(&page.markup))
        };

        let href = match control {
            NextControl::Missing | NextControl::Disabled => return ClickOutcome::Disabled,
            NextControl::NoTarget => {
                return ClickOutcome::Failed("next control has no link target".to_string());
            }
            NextControl::Link(href) => href,
        };

        let target = match base.join(&href) {
            Ok(url) => url,
            Err(_) => return ClickOutcome::Failed(DriverError::InvalidUrl(href).to_string()),
        };

        match self.load(target).await {
            Ok(page) => {
                *self.current.lock().await = Some(page);
                ClickOutcome::Advanced
            }
            Err(e) => ClickOutcome::Failed(e.to_string()),
        }
    }

    fn supports_direct_navigation(&self) -> bool {
        self.template.is_some()
    }

    fn page_url(&self, page: Cursor) -> Option<String> {
        self.template
            .as_ref()
            .map(|t| t.replace("{page}", &page.value().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn listing(next: &str) -> String {
        format!(r#"<html><body><div class="item">x</div>{next}</body></html>"#)
    }

    fn source(start_url: String, template: Option<String>) -> PagesSource {
        PagesSource {
            start_url,
            page_url_template: template,
            next_selector: "a.next".into(),
            headers: BTreeMap::new(),
        }
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn follows_next_link_until_disabled() {
        let server = MockServer::start().await;
        serve(&server, "/c", listing(r#"<a class="next" href="/c?page=2">Next</a>"#)).await;
        serve(
            &server,
            "/c2",
            listing(r#"<a class="next disabled" href="/c?page=3">Next</a>"#),
        )
        .await;

        let driver = HttpPageDriver::new(
            &source(format!("{}/c", server.uri()), None),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!driver.supports_direct_navigation());

        driver.navigate(&format!("{}/c2", server.uri())).await.unwrap();
        assert_eq!(driver.click_next().await, ClickOutcome::Disabled);

        driver.navigate(&format!("{}/c", server.uri())).await.unwrap();
        assert!(driver.current_markup().await.unwrap().contains("page=2"));
        assert_eq!(driver.click_next().await, ClickOutcome::Advanced);
    }

    #[tokio::test]
    async fn missing_control_means_disabled() {
        let server = MockServer::start().await;
        serve(&server, "/last", listing("")).await;

        let driver = HttpPageDriver::new(
            &source(format!("{}/last", server.uri()), None),
            Duration::from_secs(5),
        )
        .unwrap();
        driver.navigate(&format!("{}/last", server.uri())).await.unwrap();
        assert_eq!(driver.click_next().await, ClickOutcome::Disabled);
    }

    #[tokio::test]
    async fn click_before_navigation_fails() {
        let driver =
            HttpPageDriver::new(&source("http://localhost/".into(), None), Duration::from_secs(1))
                .unwrap();
        assert!(matches!(driver.click_next().await, ClickOutcome::Failed(_)));
        assert!(matches!(
            driver.current_markup().await,
            Err(DriverError::NotLoaded)
        ));
    }

    #[test]
    fn renders_page_template() {
        let driver = HttpPageDriver::new(
            &source(
                "https://shop.test/rings".into(),
                Some("https://shop.test/rings?page={page}".into()),
            ),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(driver.supports_direct_navigation());
        assert_eq!(
            driver.page_url(Cursor::new(4)).as_deref(),
            Some("https://shop.test/rings?page=4")
        );
    }
}
