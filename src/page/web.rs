// src/page/web.rs
// =============================================================================
// Fetches pages and images from a web server.
//
// Failure categories:
// - 401 / 403 / 407: the server refuses us. Every other URL on the site will
//   be refused too, so this is reported as FetchError::Unauthorized and ends
//   the crawl.
// - Any other non-success status, timeouts, DNS and connection failures:
//   FetchError::Transient. Only that branch of the crawl is lost.
// - A page URL that answers with something other than HTML:
//   FetchError::Unsupported (also recoverable).
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::{Page, PageFetcher};
use crate::error::FetchError;

pub struct WebFetcher {
    client: Client,
}

impl WebFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    // Sends a GET and turns every failure into a FetchError
    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| categorize_error(url, e))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::PROXY_AUTHENTICATION_REQUIRED
        ) {
            return Err(FetchError::Unauthorized {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(FetchError::transient(
                url,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for WebFetcher {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::transient(url, e))?;
        let response = self.get(url).await?;

        // A missing content type is given the benefit of the doubt
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        if let Some(content_type) = content_type {
            if !content_type.contains("html") {
                return Err(FetchError::Unsupported {
                    url: url.to_string(),
                    content_type,
                });
            }
        }

        // Relative links resolve against the final URL after redirects
        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| categorize_error(url, e))?;

        debug!(url = %parsed, final_url = %final_url, bytes = html.len(), "fetched page");
        Ok(Page::parse(final_url, &html))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| categorize_error(url, e))?;
        Ok(bytes.to_vec())
    }
}

// Gives reqwest errors a short, readable reason
fn categorize_error(url: &str, error: reqwest::Error) -> FetchError {
    let reason = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_redirect() {
        "too many redirects".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    };

    FetchError::transient(url, reason)
}
