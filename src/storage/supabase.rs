//! Supabase Storage REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;

use super::error::StorageError;
use super::ObjectStore;
use crate::retry::{self, RetryAction, RetryConfig};

/// One entry of a bucket listing. Only the name is needed.
#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

/// Bucket on a Supabase project, addressed through the storage REST API.
#[derive(Clone)]
pub struct SupabaseStorage {
    client: Client,
    base: Url,
    key: String,
    bucket: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl std::fmt::Debug for SupabaseStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStorage")
            .field("base", &self.base.as_str())
            .field("bucket", &self.bucket)
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl SupabaseStorage {
    pub fn new(
        client: Client,
        base_url: &str,
        key: String,
        bucket: String,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, StorageError> {
        let base = Url::parse(base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| StorageError::InvalidBaseUrl(base_url.to_string()))?;
        Ok(Self {
            client,
            base,
            key,
            bucket,
            timeout,
            retry,
        })
    }

    /// `{base}/storage/v1/object/{segments...}` with each segment
    /// percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["storage", "v1", "object"])
                .extend(segments);
        }
        url
    }

    /// Send a request with auth headers, bounded retry and a per-attempt
    /// timeout, returning the response body of a 2xx reply.
    async fn send<F>(&self, op: &'static str, name: &str, build: F) -> Result<Vec<u8>, StorageError>
    where
        F: Fn() -> RequestBuilder,
    {
        retry::retry_with_backoff(
            &self.retry,
            |e: &StorageError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || {
                retry::with_timeout(
                    self.timeout,
                    || StorageError::Timeout {
                        op,
                        name: name.to_string(),
                        secs: self.timeout.as_secs(),
                    },
                    self.attempt(op, name, build()),
                )
            },
        )
        .await
    }

    async fn attempt(
        &self,
        op: &'static str,
        name: &str,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, StorageError> {
        let unreachable = |source| StorageError::Unreachable {
            op,
            name: name.to_string(),
            source,
        };

        let response = request
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::HttpStatus {
                op,
                name: name.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(unreachable)?;
        Ok(body.to_vec())
    }
}

/// The listing endpoint does a substring search, so only an exact name match
/// counts as the object existing.
fn listing_contains(body: &[u8], name: &str) -> Result<bool, StorageError> {
    let objects: Vec<ListedObject> =
        serde_json::from_slice(body).map_err(|source| StorageError::Decode {
            name: name.to_string(),
            source,
        })?;
    Ok(objects.iter().any(|o| o.name == name))
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let url = self.endpoint(&["list", &self.bucket]);
        let payload = serde_json::json!({ "prefix": "", "search": name });
        let body = self
            .send("exists", name, || self.client.post(url.clone()).json(&payload))
            .await?;
        listing_contains(&body, name)
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let url = self.endpoint(&[&self.bucket, name]);
        self.send("upload", name, || {
            self.client
                .post(url.clone())
                .header("x-upsert", "true")
                .header(reqwest::header::CONTENT_TYPE, "application/zip")
                .body(bytes.to_vec())
        })
        .await?;
        tracing::debug!(archive = name, bytes = bytes.len(), "Uploaded archive");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let url = self.endpoint(&[&self.bucket]);
        let payload = serde_json::json!({ "prefixes": [name] });
        self.send("delete", name, || {
            self.client.delete(url.clone()).json(&payload)
        })
        .await?;
        Ok(())
    }

    fn public_reference(&self, name: &str) -> String {
        self.endpoint(&["public", &self.bucket, name]).into()
    }
}
