//! Packages a vehicle's images into a zip archive.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::download;
use super::error::ArchiveError;
use crate::retry::RetryConfig;

/// Produces the archive bytes for one vehicle.
#[async_trait]
pub trait ArchiveBuilder: Send + Sync {
    /// Package the images at `urls` under the folder `label`.
    ///
    /// Individual download failures are tolerated; fails with
    /// [`ArchiveError::NoImages`] only when nothing could be fetched.
    async fn build(&self, label: &str, urls: &[String]) -> Result<Vec<u8>, ArchiveError>;
}

/// Downloads images over HTTP into a per-call scratch directory.
#[derive(Debug, Clone)]
pub struct HttpArchiveBuilder {
    client: Client,
    scratch_root: PathBuf,
    timeout: Duration,
    retry: RetryConfig,
}

impl HttpArchiveBuilder {
    pub fn new(client: Client, scratch_root: PathBuf, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            client,
            scratch_root,
            timeout,
            retry,
        }
    }
}

pub(crate) fn image_file_name(label: &str, index: usize) -> String {
    format!("{}_image_{}.jpg", label, index + 1)
}

/// Zip `files` (all inside `folder`) into `output`, with entries named
/// `{label}/{file}`.
fn package(folder: &Path, label: &str, files: &[String], output: &Path) -> Result<(), ArchiveError> {
    let zip_err = |source| ArchiveError::Zip {
        label: label.to_string(),
        source,
    };

    let mut zip = ZipWriter::new(std::fs::File::create(output)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let content = std::fs::read(folder.join(file))?;
        zip.start_file(format!("{}/{}", label, file), options)
            .map_err(zip_err)?;
        zip.write_all(&content)?;
    }
    zip.finish().map_err(zip_err)?;
    Ok(())
}

#[async_trait]
impl ArchiveBuilder for HttpArchiveBuilder {
    async fn build(&self, label: &str, urls: &[String]) -> Result<Vec<u8>, ArchiveError> {
        // Titles may carry path separators; keep every file inside the scratch dir.
        let label = &label.replace(['/', '\\'], "_");

        tokio::fs::create_dir_all(&self.scratch_root).await?;
        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("archive-")
            .tempdir_in(&self.scratch_root)?;

        let folder = scratch.path().join(label);
        tokio::fs::create_dir_all(&folder).await?;

        let mut files = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let file_name = image_file_name(label, index);
            match download::download_file(
                &self.client,
                url,
                &folder.join(&file_name),
                self.timeout,
                &self.retry,
            )
            .await
            {
                Ok(bytes) => {
                    tracing::debug!(url = %url, bytes, "Downloaded image");
                    files.push(file_name);
                }
                Err(e) => tracing::warn!(archive = %label, url = %url, "Skipping image: {}", e),
            }
        }

        if files.is_empty() {
            return Err(ArchiveError::NoImages {
                label: label.to_string(),
                attempted: urls.len(),
            });
        }

        let output = scratch.path().join(format!("{}.zip", label));
        let label_owned = label.to_string();
        let output_clone = output.clone();
        tokio::task::spawn_blocking(move || package(&folder, &label_owned, &files, &output_clone))
            .await??;

        let bytes = tokio::fs::read(&output).await?;
        Ok(bytes)
    }
}
