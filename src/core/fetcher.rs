//! Fetch collaborator
//!
//! The engine never talks to the network directly; it asks a [`Fetcher`] for the bytes behind
//! a URL, replaying whatever headers and cookies the caller captured. [`HttpFetcher`] is the
//! reqwest-backed implementation, hosts with their own transport plug in their own.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{redirect, Client};
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::error_handling::{EngineError, EngineResult};
use crate::utils::network::{is_html_document, RequestContext};

/// Raw answer to one GET request
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`, following redirects. Transport failures are errors, HTTP error statuses are not.
    async fn fetch(&self, url: &str, request: &RequestContext) -> EngineResult<FetchResponse>;
}

/// [`Fetcher`] on top of a shared reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, request: &RequestContext) -> EngineResult<FetchResponse> {
        let mut builder = self.client.get(url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookies) = request.cookie_header() {
            builder = builder.header(COOKIE, cookies);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::network(url, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| EngineError::network(url, e))?;

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Playlist- and segment-level view over a [`Fetcher`]
#[derive(Clone)]
pub struct PlaylistFetcher {
    fetcher: Arc<dyn Fetcher>,
}

impl PlaylistFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch playlist text; login walls come back as [`EngineError::Auth`]
    pub async fn playlist_text(&self, url: &str, request: &RequestContext) -> EngineResult<String> {
        tracing::debug!("Fetching playlist: {}", url);
        let response = self.fetcher.fetch(url, request).await?;

        if matches!(response.status, 401 | 403) {
            return Err(EngineError::Auth {
                url: url.to_string(),
                detail: format!("HTTP {}", response.status),
            });
        }
        if !response.is_success() {
            return Err(EngineError::Http {
                url: url.to_string(),
                status: response.status,
            });
        }

        let text = response.text();
        let labelled_html = response
            .content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false);
        if is_html_document(&text) || (labelled_html && !text.trim_start().starts_with("#EXTM3U"))
        {
            tracing::warn!("Got HTML instead of a playlist from {}", url);
            return Err(EngineError::Auth {
                url: url.to_string(),
                detail: "an HTML page".to_string(),
            });
        }

        Ok(text)
    }

    /// Fetch a binary resource, treating any non-success status as an error
    pub async fn bytes(&self, url: &str, request: &RequestContext) -> EngineResult<Bytes> {
        let response = self.fetcher.fetch(url, request).await?;
        if !response.is_success() {
            return Err(EngineError::Http {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response.body)
    }
}
