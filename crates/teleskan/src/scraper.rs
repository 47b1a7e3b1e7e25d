use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Empty response for {0}")]
    EmptyBody(String),
    #[error("No fixture for {url} at {path}")]
    MissingFixture { url: String, path: PathBuf },
    #[error("Failed to read fixture: {0}")]
    Io(#[from] std::io::Error),
}

/// Where extractor HTML comes from.
pub trait PageSource: Sync {
    fn fetch_html(&self, url: &str) -> impl Future<Output = Result<String, ScraperError>> + Send;
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
}

impl WebScraper {
    pub fn new() -> Result<Self, ScraperError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client })
    }

    async fn get_html(&self, url: &str) -> Result<String, ScraperError> {
        let html = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::debug!("HTTP error: {e:?}"))?
            .error_for_status()?
            .text()
            .await
            .inspect_err(|e| log::debug!("Decode error: {e:?}"))?;

        if html.trim().is_empty() {
            return Err(ScraperError::EmptyBody(url.to_string()));
        }
        Ok(html)
    }
}

impl PageSource for WebScraper {
    async fn fetch_html(&self, url: &str) -> Result<String, ScraperError> {
        log::debug!("Fetching {}", url);
        self.get_html(url).await
    }
}

/// Serves saved pages from disk so test runs never touch the network.
///
/// A URL maps to `<dir>/<slug>.html` where the slug is the URL's host and
/// path with every non-alphanumeric run replaced by `-`. Without a
/// directory every fetch fails, which leaves each provider with zero plans.
#[derive(Debug, Clone, Default)]
pub struct OfflineSource {
    dir: Option<PathBuf>,
}

impl OfflineSource {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn fixture_path(&self, url: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.html", url_slug(url))))
    }
}

impl PageSource for OfflineSource {
    async fn fetch_html(&self, url: &str) -> Result<String, ScraperError> {
        let path = self
            .fixture_path(url)
            .ok_or_else(|| ScraperError::MissingFixture {
                url: url.to_string(),
                path: PathBuf::new(),
            })?;
        if !path.exists() {
            return Err(ScraperError::MissingFixture {
                url: url.to_string(),
                path,
            });
        }
        log::debug!("Serving {} from {}", url, path.display());
        Ok(std::fs::read_to_string(&path)?)
    }
}

/// `https://www.hiper.dk/internet/fiber-internet` -> `hiper-dk-internet-fiber-internet`.
pub fn url_slug(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");

    let mut slug = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
