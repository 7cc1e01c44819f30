use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{MediaConfig, TenorConfig};

#[derive(Error, Debug)]
pub enum GifError {
    #[error("gif lookup failed: {0}")]
    Request(String),

    #[error("gif provider returned status {0}")]
    Status(u16),

    #[error("malformed gif provider response: {0}")]
    Decode(String),
}

/// Resolves a third-party GIF page to a directly embeddable rendition.
#[async_trait]
pub trait GifResolver: Send + Sync {
    async fn resolve(&self, page_url: &str) -> Result<Option<String>, GifError>;
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    results: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    media_formats: HashMap<String, MediaFormat>,
}

#[derive(Debug, Deserialize)]
struct MediaFormat {
    url: String,
}

pub struct TenorClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TenorClient {
    pub fn new(config: &TenorConfig, media: &MediaConfig) -> Result<Self, GifError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(media.connect_timeout_secs))
            .timeout(Duration::from_secs(media.read_timeout_secs))
            .build()
            .map_err(|e| GifError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl GifResolver for TenorClient {
    async fn resolve(&self, page_url: &str) -> Result<Option<String>, GifError> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("no tenor api key configured, skipping {}", page_url);
            return Ok(None);
        };
        let Some(id) = tenor_post_id(page_url) else {
            return Ok(None);
        };

        let url = url::Url::parse_with_params(
            &format!("{}/posts", self.base_url),
            &[("ids", id), ("key", api_key), ("media_filter", "mediumgif")],
        )
        .map_err(|e| GifError::Request(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GifError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GifError::Status(response.status().as_u16()));
        }

        let body: PostsResponse = response
            .json()
            .await
            .map_err(|e| GifError::Decode(e.to_string()))?;

        Ok(medium_gif_url(body))
    }
}

fn medium_gif_url(body: PostsResponse) -> Option<String> {
    body.results
        .into_iter()
        .next()
        .and_then(|mut post| post.media_formats.remove("mediumgif"))
        .map(|format| format.url)
}

/// `https://tenor.com/view/some-slug-1234567` -> `1234567`.
pub fn tenor_post_id(page_url: &str) -> Option<&str> {
    let path = page_url.split(['?', '#']).next().unwrap_or(page_url);
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let id = last.rsplit('-').next()?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then_some(id)
}
