//! Deferred rendering of relayed copies.
//!
//! Re-hosting attachments can take as long as the image host needs. The
//! router therefore queues a [`Draft`] and the target's send path finishes
//! it when the operation's turn comes, so only that target's queue waits.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::cache::MediaResolver;
use crate::common::{Attachment, InboundEvent, OutboundMessage};
use crate::gateway::Target;

use super::formatter::render;

/// Attachments of one event, re-hosted at most once however many targets
/// need them.
pub struct PendingMedia {
    resolver: Arc<MediaResolver>,
    attachments: Vec<Attachment>,
    resolved: OnceCell<Vec<Attachment>>,
}

impl PendingMedia {
    pub fn new(resolver: Arc<MediaResolver>, attachments: Vec<Attachment>) -> Self {
        Self {
            resolver,
            attachments,
            resolved: OnceCell::new(),
        }
    }

    /// Whether any attachment still needs re-hosting.
    pub fn needed(attachments: &[Attachment]) -> bool {
        attachments
            .iter()
            .any(|a| a.data.is_some() || a.source.is_some())
    }

    /// The attachments with public URLs filled in. The first caller does
    /// the work; concurrent callers wait for its result.
    pub async fn resolved(&self) -> &[Attachment] {
        self.resolved
            .get_or_init(|| async {
                let mut attachments = self.attachments.clone();
                self.resolver.resolve_attachments(&mut attachments).await;
                attachments
            })
            .await
    }
}

impl fmt::Debug for PendingMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMedia")
            .field("attachments", &self.attachments.len())
            .field("resolved", &self.resolved.initialized())
            .finish()
    }
}

/// Body of a send or edit.
#[derive(Debug)]
pub enum Draft {
    Ready(OutboundMessage),
    /// Rendered once the event's attachments are re-hosted.
    Pending {
        event: Arc<InboundEvent>,
        target: Target,
        nick_format: String,
        media: Arc<PendingMedia>,
    },
}

impl Draft {
    pub async fn finish(self) -> OutboundMessage {
        match self {
            Draft::Ready(message) => message,
            Draft::Pending {
                event,
                target,
                nick_format,
                media,
            } => {
                let mut event = InboundEvent::clone(&event);
                event.attachments = media.resolved().await.to_vec();
                render(&event, &target, &nick_format)
            }
        }
    }
}
