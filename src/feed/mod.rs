//! Listing feed reader.
//!
//! Fetches the remote XML feed and turns it into one [`FeedNode`] per listing
//! record. Transport errors are retried with backoff; any error that survives
//! retries is fatal to the sync run.

pub mod error;
pub mod xml;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::retry::{self, RetryAction, RetryConfig};

pub use error::FeedError;
pub use xml::{FeedNode, FeedValue};

/// Source of raw listing records.
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedNode>, FeedError>;
}

/// Reads the feed over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedReader {
    client: Client,
    url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl HttpFeedReader {
    pub fn new(client: Client, url: String, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            client,
            url,
            timeout,
            retry,
        }
    }

    async fn fetch_body(&self) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Unreachable {
                url: self.url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.bytes().await.map_err(|e| FeedError::Unreachable {
            url: self.url.clone(),
            source: e,
        })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    async fn fetch(&self) -> Result<Vec<FeedNode>, FeedError> {
        let body = retry::retry_with_backoff(
            &self.retry,
            |e: &FeedError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || {
                retry::with_timeout(
                    self.timeout,
                    || FeedError::Timeout {
                        url: self.url.clone(),
                        secs: self.timeout.as_secs(),
                    },
                    self.fetch_body(),
                )
            },
        )
        .await?;

        tracing::debug!(bytes = body.len(), url = %self.url, "Fetched feed");
        let document = xml::parse_document(&body)?;
        xml::extract_records(document)
    }
}
