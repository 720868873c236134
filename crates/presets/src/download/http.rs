//! HTTP fetching of preset archives
//!
//! Streams the response body to the staging file, writing in fixed-size
//! slices and checking for cancellation before each one.

use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PresetConfig;
use crate::core::{DownloadProgress, FileOperation, PresetError, Result};

/// HTTP client configured for preset downloads
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    chunk_size: usize,
}

impl HttpFetcher {
    /// Create a new fetcher from preset configuration
    pub fn from_config(config: &PresetConfig) -> Result<Self> {
        let client = Client::builder()
            .read_timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| PresetError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
            })?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Download `url` into `dest_path`, reporting the fetch phase of `progress`
    ///
    /// `free_space` is only used to enrich failure messages. A response without
    /// a positive content length is rejected since progress cannot be weighted
    /// against it. Returns the number of bytes written.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest_path: &Path,
        cancel: &CancellationToken,
        progress: &DownloadProgress,
        free_space: u64,
    ) -> Result<u64> {
        debug!("Stream downloading: {} to {}", url, dest_path.display());

        let network_error = |reason: String, source: Option<Box<dyn std::error::Error + Send + Sync>>| {
            PresetError::NetworkOrStream {
                url: url.to_string(),
                reason,
                free_space,
                source,
            }
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error("request failed".to_string(), Some(Box::new(e))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network_error(format!("HTTP status {}", status), None));
        }

        let content_length = match response.content_length() {
            Some(length) if length > 0 => length,
            Some(_) => return Err(network_error("server reported an empty body".to_string(), None)),
            None => return Err(network_error("server did not report a content length".to_string(), None)),
        };
        debug!("Content length: {} bytes", content_length);

        let mut file = fs::File::create(dest_path)
            .await
            .map_err(|source| PresetError::file_system(dest_path, FileOperation::Create, source))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result
                .map_err(|e| network_error("body stream interrupted".to_string(), Some(Box::new(e))))?;

            for slice in chunk.chunks(self.chunk_size) {
                if cancel.is_cancelled() {
                    debug!("Download of {} cancelled after {} bytes", url, downloaded);
                    return Err(PresetError::cancelled("cancelled during fetch"));
                }
                file.write_all(slice).await.map_err(|e| {
                    network_error(format!("writing {} failed", dest_path.display()), Some(Box::new(e)))
                })?;
                downloaded += slice.len() as u64;
                progress.record_fetched(downloaded, content_length);
            }
        }

        file.flush()
            .await
            .map_err(|e| network_error(format!("flushing {} failed", dest_path.display()), Some(Box::new(e))))?;

        debug!("Stream download completed: {} bytes", downloaded);
        Ok(downloaded)
    }
}
