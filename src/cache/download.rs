//! Fetching attachment content for re-upload.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::common::HostError;

/// Largest attachment fetched for re-upload.
pub const MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Source of attachment bytes.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes, HostError>;
}

/// Plain HTTP GET with a size cap.
pub struct HttpDownloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(max_bytes: u64) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<Bytes, HostError> {
        let too_large = |size: u64| HostError::DownloadFailed {
            url: url.to_string(),
            message: format!("{} bytes is over the {} byte limit", size, self.max_bytes),
        };

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::DownloadFailed {
                url: url.to_string(),
                message: format!("status {}", status),
            });
        }
        if let Some(size) = response.content_length().filter(|s| *s > self.max_bytes) {
            return Err(too_large(size));
        }

        let data = response.bytes().await?;
        if data.len() as u64 > self.max_bytes {
            return Err(too_large(data.len() as u64));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_source_fails() {
        let downloader = HttpDownloader::new(MAX_DOWNLOAD_BYTES).unwrap();
        let err = downloader
            .download("http://127.0.0.1:9/missing.png")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Http(_)));
    }
}
