use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::retry::{self, RetryAction, RetryConfig};

fn part_path(download_path: &Path) -> PathBuf {
    let mut name = download_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Download an image to `download_path` through a `.part` file.
///
/// Each attempt starts from scratch and is bounded by `timeout`; the `.part`
/// file is only renamed into place once the body has been fully written.
/// Returns the number of bytes written.
pub async fn download_file(
    client: &Client,
    url: &str,
    download_path: &Path,
    timeout: Duration,
    retry_config: &RetryConfig,
) -> Result<u64, DownloadError> {
    let part_path = part_path(download_path);

    let result = retry::retry_with_backoff(
        retry_config,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            let _ = fs::remove_file(&part_path).await;
            retry::with_timeout(
                timeout,
                || DownloadError::Timeout {
                    url: url.to_string(),
                    secs: timeout.as_secs(),
                },
                attempt_download(client, url, download_path, &part_path),
            )
            .await
        },
    )
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part_path).await;
    }
    result
}

async fn attempt_download(
    client: &Client,
    url: &str,
    download_path: &Path,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let response = client.get(url).send().await.map_err(|e| DownloadError::Http {
        source: e,
        url: url.to_string(),
        bytes_written: 0,
    })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Http {
            source: e,
            url: url.to_string(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(part_path, download_path).await?;
    Ok(bytes_written)
}
