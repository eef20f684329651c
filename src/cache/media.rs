//! Attachment re-upload with content-addressed deduplication.
//!
//! Attachment content, carried inline or downloaded from its source link,
//! is fingerprinted with SHA-256. A known fingerprint reuses the earlier
//! upload as long as the host still serves it; an unknown one is uploaded
//! once, even when several events carry the same content at the same time.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::common::{Attachment, HostError};

use super::download::Downloader;
use super::store::ReuploadCache;

/// An upload as reported by the external host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedMedia {
    pub id: String,
    pub deletion_token: String,
}

/// External image host.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, name: &str, data: Bytes) -> Result<HostedMedia, HostError>;

    /// Public link for an uploaded item.
    fn public_url(&self, id: &str) -> String;

    /// Whether the host still serves the item.
    async fn is_live(&self, _id: &str) -> Result<bool, HostError> {
        Ok(true)
    }

    /// Remove an item using the token handed out on upload.
    async fn delete(&self, deletion_token: &str) -> Result<(), HostError>;
}

/// Content fingerprint used as the cache key.
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Per-hash gate. Holds the host ID once the leader has resolved it.
type Flight = Arc<Mutex<Option<String>>>;

/// Resolves attachments to public URLs, uploading each distinct content once.
pub struct MediaResolver {
    cache: ReuploadCache,
    host: Arc<dyn ImageHost>,
    downloader: Arc<dyn Downloader>,
    in_flight: DashMap<String, Flight>,
}

impl MediaResolver {
    pub fn new(
        cache: ReuploadCache,
        host: Arc<dyn ImageHost>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            cache,
            host,
            downloader,
            in_flight: DashMap::new(),
        }
    }

    /// Give every attachment with inline bytes or a source link a public URL.
    ///
    /// Failures leave the attachment's existing link in place; the message
    /// text is relayed regardless.
    pub async fn resolve_attachments(&self, attachments: &mut [Attachment]) {
        for attachment in attachments.iter_mut() {
            let data = match (&attachment.data, &attachment.source) {
                (Some(data), _) => data.clone(),
                (None, Some(source)) => match self.downloader.download(source).await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Failed to download attachment '{}': {}", attachment.name, e);
                        continue;
                    }
                },
                (None, None) => continue,
            };
            match self.resolve(&attachment.name, data).await {
                Ok(url) => {
                    attachment.url = Some(url);
                    attachment.data = None;
                    attachment.source = None;
                }
                Err(e) => warn!("Failed to re-upload attachment '{}': {}", attachment.name, e),
            }
        }
    }

    /// Public URL for `data`, uploading it if this content was never seen.
    pub async fn resolve(&self, name: &str, data: Bytes) -> Result<String, HostError> {
        let hash = fingerprint(&data);

        if let Some(host_id) = self.cached(&hash).await {
            return Ok(self.host.public_url(&host_id));
        }

        let flight = self
            .in_flight
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let result = {
            let mut slot = flight.lock().await;
            match slot.as_ref() {
                // Another caller finished the upload while we waited
                Some(host_id) => Ok(host_id.clone()),
                None => {
                    let resolved = self.upload_once(&hash, name, data).await;
                    if let Ok(host_id) = &resolved {
                        *slot = Some(host_id.clone());
                    }
                    resolved
                }
            }
        };

        drop(flight);
        self.in_flight
            .remove_if(&hash, |_, flight| Arc::strong_count(flight) == 1);

        result.map(|host_id| self.host.public_url(&host_id))
    }

    /// Take an upload down from the host and drop it from the cache.
    ///
    /// Returns false when `hash` was not cached.
    pub async fn forget(&self, hash: &str) -> Result<bool, HostError> {
        let Some(entry) = self.cache.lookup(hash).await? else {
            return Ok(false);
        };
        self.host.delete(&entry.deletion_token).await?;
        info!(
            "Deleted upload {} of {}, cached since {}",
            entry.host_id, entry.hash, entry.first_seen
        );
        Ok(self.cache.invalidate(hash).await?)
    }

    /// Drop a cached upload so the next resolve uploads again.
    async fn invalidate(&self, hash: &str) {
        if let Err(e) = self.cache.invalidate(hash).await {
            warn!("Failed to invalidate cached attachment {}: {}", hash, e);
        }
    }

    /// Cached upload that the host still serves. A host that cannot be
    /// asked is trusted.
    async fn cached(&self, hash: &str) -> Option<String> {
        let host_id = self.lookup(hash).await?;
        match self.host.is_live(&host_id).await {
            Ok(true) => Some(host_id),
            Ok(false) => {
                info!("Upload {} of {} is gone from the host, uploading again", host_id, hash);
                self.invalidate(hash).await;
                None
            }
            Err(e) => {
                debug!("Could not check upload {}: {}", host_id, e);
                Some(host_id)
            }
        }
    }

    /// Cache lookup that treats errors as a miss.
    async fn lookup(&self, hash: &str) -> Option<String> {
        match self.cache.lookup(hash).await {
            Ok(entry) => entry.map(|e| e.host_id),
            Err(e) => {
                warn!("Re-upload cache lookup failed, uploading again: {}", e);
                None
            }
        }
    }

    async fn upload_once(&self, hash: &str, name: &str, data: Bytes) -> Result<String, HostError> {
        // A waiter that became leader after a failed attempt may find the
        // entry persisted by now.
        if let Some(host_id) = self.lookup(hash).await {
            return Ok(host_id);
        }

        let size = data.len();
        let media = self.host.upload(name, data).await?;
        info!("Uploaded '{}' ({} bytes) as {}", name, size, media.id);

        match self.cache.store(hash, &media.id, &media.deletion_token).await {
            Ok(entry) => {
                if entry.host_id != media.id {
                    debug!("Cache already held {} for {}, using it", entry.host_id, hash);
                }
                Ok(entry.host_id)
            }
            Err(e) => {
                warn!("Failed to cache upload of '{}': {}", name, e);
                Ok(media.id)
            }
        }
    }
}
