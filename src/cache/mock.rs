//! Scripted image host and downloader for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::HostError;

use super::download::Downloader;
use super::media::{HostedMedia, ImageHost};

/// Hands out sequential IDs `img1`, `img2`, ... with tokens `del1`, ...
#[derive(Default)]
pub struct MockHost {
    uploads: AtomicUsize,
    fail: AtomicBool,
    fail_checks: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gone: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make the host stop serving `id`, as if it expired.
    pub fn expire(&self, id: &str) {
        self.gone.lock().insert(id.to_string());
    }

    /// Deletion tokens received so far.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ImageHost for MockHost {
    async fn upload(&self, name: &str, _data: Bytes) -> Result<HostedMedia, HostError> {
        let delay = *self.delay.lock();
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(20))).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::UploadFailed {
                name: name.to_string(),
                message: "scripted".to_string(),
            });
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HostedMedia {
            id: format!("img{}", n),
            deletion_token: format!("del{}", n),
        })
    }

    fn public_url(&self, id: &str) -> String {
        format!("https://host.test/{}", id)
    }

    async fn is_live(&self, id: &str) -> Result<bool, HostError> {
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(HostError::Rejected {
                status: 503,
                message: "scripted".to_string(),
            });
        }
        Ok(!self.gone.lock().contains(id))
    }

    async fn delete(&self, deletion_token: &str) -> Result<(), HostError> {
        self.deleted.lock().push(deletion_token.to_string());
        Ok(())
    }
}

/// Serves fixed content per URL; anything else is a 404.
#[derive(Default)]
pub struct MockDownloader {
    files: Mutex<HashMap<String, Bytes>>,
    downloads: AtomicUsize,
}

impl MockDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, data: &'static [u8]) {
        self.files
            .lock()
            .insert(url.to_string(), Bytes::from_static(data));
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str) -> Result<Bytes, HostError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::DownloadFailed {
                url: url.to_string(),
                message: "status 404 Not Found".to_string(),
            })
    }
}
