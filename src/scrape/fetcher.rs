use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::core::config::CrawlSettings;
use crate::core::errors::ApiError;

/// A fetched page: the body as text plus the URL the request actually
/// resolved to after redirects. Parsing happens downstream so the DOM never
/// has to cross an await point.
#[derive(Debug)]
pub struct FetchedPage {
    pub final_url: Url,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("authentication wall at {0}")]
    AuthWall(String),
}

/// HTTP page fetcher with browser-like headers.
///
/// Help-desk hosts block unadorned clients, so every request carries a real
/// browser user-agent and a bounded timeout.
pub struct PageFetcher {
    client: Client,
    login_marker: String,
}

impl PageFetcher {
    pub fn new(settings: &CrawlSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            client,
            login_marker: settings.login_marker.clone(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let resp = self.client.get(url).send().await?;
        let final_url = resp.url().clone();
        let status = resp.status();

        // A redirect into the login flow means the page sits behind
        // authentication; treat it like any other inaccessible page.
        if status.as_u16() == 401
            || status.as_u16() == 403
            || final_url.path().contains(&self.login_marker)
        {
            return Err(FetchError::AuthWall(final_url.to_string()));
        }

        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        Ok(FetchedPage { final_url, body })
    }
}
