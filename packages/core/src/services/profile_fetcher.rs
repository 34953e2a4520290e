//! Profile fetching
//!
//! Profiles live on third-party hosts. The fetcher performs one GET without
//! following redirects and reports what came back; callers decide what a
//! redirect, a 404 or a non-JSON body means for them. Bodies over the
//! configured size cap are dropped unread, like a non-JSON body.

use crate::config::HttpConfig;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// DNS failure or refused connection
    #[error("Profile host unreachable: {0}")]
    Unreachable(String),

    /// Timeout or other transport failure
    #[error("Profile request failed: {0}")]
    Failed(String),
}

/// What a profile URL answered
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileResponse {
    pub status: u16,
    /// Parsed body, `None` if it was not JSON
    pub body: Option<Value>,
}

impl ProfileResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// A 200 answer with a JSON body
    pub fn json_profile(&self) -> Option<&Value> {
        if self.status == 200 {
            self.body.as_ref()
        } else {
            None
        }
    }
}

#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ProfileResponse, FetchError>;
}

/// `ProfileFetcher` over HTTP
#[derive(Clone)]
pub struct HttpProfileFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpProfileFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_profile_bytes,
        })
    }
}

/// Body bytes, or `None` once the body passes `limit`
async fn read_capped(mut resp: Response, limit: usize) -> Result<Option<Vec<u8>>, FetchError> {
    if resp.content_length().is_some_and(|len| len > limit as u64) {
        return Ok(None);
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| FetchError::Failed(e.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

#[async_trait]
impl ProfileFetcher for HttpProfileFetcher {
    async fn fetch(&self, url: &str) -> Result<ProfileResponse, FetchError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() {
                FetchError::Unreachable(e.to_string())
            } else {
                FetchError::Failed(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let body = match read_capped(resp, self.max_body_bytes).await? {
            Some(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
            None => {
                tracing::warn!(
                    "Profile {} is larger than {} bytes, ignoring its body",
                    url,
                    self.max_body_bytes
                );
                None
            }
        };

        Ok(ProfileResponse { status, body })
    }
}
