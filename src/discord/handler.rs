//! Discord gateway event handler.
//!
//! Converts serenity events into [`InboundEvent`]s and pushes them to the
//! router's event sink. Serenity runs each event on its own task, so a
//! handler pushes without awaiting anything first: attachment content is
//! fetched later, on the target's send path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::all::{
    Attachment as DiscordAttachment, ChannelId, Context, EventHandler, GuildId, Message,
    MessageId, MessageUpdateEvent, Ready, Timestamp, User,
};
use serenity::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bridge::EventSink;
use crate::cache::MAX_DOWNLOAD_BYTES;
use crate::common::{Account, Attachment, ChannelRef, EventKind, InboundEvent};

/// Signalled once with our own user ID when the gateway session is ready,
/// or with an error if the client stopped before that.
pub(super) type ReadySignal = Arc<Mutex<Option<oneshot::Sender<Result<String, String>>>>>;

pub(super) struct RelayHandler {
    pub account: Account,
    pub events: EventSink,
    pub self_id: Arc<Mutex<Option<String>>>,
    pub ready: ReadySignal,
}

impl RelayHandler {
    fn origin(&self, channel_id: ChannelId) -> ChannelRef {
        ChannelRef::new(self.account.clone(), channel_id.to_string())
    }

    fn push(&self, event: InboundEvent) {
        debug!(
            "{} {} from {}",
            event.origin,
            event.kind.name(),
            event.sender_name
        );
        if self.events.send(event).is_err() {
            warn!("{}: router is gone, dropping event", self.account);
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.guild_id.is_none() {
            return;
        }

        let nick = msg.member.as_ref().and_then(|m| m.nick.as_deref());
        let mut event = InboundEvent::new(
            self.origin(msg.channel_id),
            EventKind::Create,
            msg.id.to_string(),
        )
        .with_sender(display_name(nick, &msg.author), msg.author.id.to_string())
        .with_text(msg.content.clone());
        event.timestamp = to_utc(msg.timestamp);
        event.attachments = msg.attachments.iter().map(relay_attachment).collect();

        self.push(event);
    }

    async fn message_update(
        &self,
        _ctx: Context,
        _old_if_available: Option<Message>,
        _new: Option<Message>,
        update: MessageUpdateEvent,
    ) {
        if update.guild_id.is_none() {
            return;
        }
        // Embed unfurls also arrive as updates, without new content
        let Some(content) = update.content else {
            return;
        };

        let mut event = InboundEvent::new(
            self.origin(update.channel_id),
            EventKind::Edit,
            update.id.to_string(),
        )
        .with_text(content);
        if let Some(author) = &update.author {
            event = event.with_sender(display_name(None, author), author.id.to_string());
        }

        self.push(event);
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        if guild_id.is_none() {
            return;
        }
        let event = InboundEvent::new(
            self.origin(channel_id),
            EventKind::Delete,
            deleted_message_id.to_string(),
        );
        self.push(event);
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        let id = ready.user.id.to_string();
        info!(
            "{} logged in as {} ({} guilds)",
            self.account,
            ready.user.name,
            ready.guilds.len()
        );

        *self.self_id.lock() = Some(id.clone());
        if let Some(tx) = self.ready.lock().take() {
            let _ = tx.send(Ok(id));
        }
    }
}

/// Server nickname if set, then the global display name, then the username.
fn display_name(nick: Option<&str>, author: &User) -> String {
    pick_name(nick, author.global_name.as_deref(), &author.name)
}

fn pick_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    let usable = |n: &&str| !n.trim().is_empty();
    nick.filter(usable)
        .or(global_name.filter(usable))
        .unwrap_or(username)
        .to_string()
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

fn relay_attachment(attachment: &DiscordAttachment) -> Attachment {
    link_attachment(&attachment.filename, &attachment.url, attachment.size)
}

/// Relay by CDN link; content small enough is also marked for re-upload.
fn link_attachment(name: &str, url: &str, size: u32) -> Attachment {
    let relayed = Attachment::from_url(name, url);
    if u64::from(size) > MAX_DOWNLOAD_BYTES {
        debug!("Not re-uploading '{}' ({} bytes)", name, size);
        return relayed;
    }
    relayed.with_source(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_name_prefers_nick() {
        assert_eq!(pick_name(Some("Ally"), Some("Alice A."), "alice"), "Ally");
        assert_eq!(pick_name(None, Some("Alice A."), "alice"), "Alice A.");
        assert_eq!(pick_name(None, None, "alice"), "alice");
    }

    #[test]
    fn test_pick_name_ignores_blank() {
        assert_eq!(pick_name(Some("  "), None, "alice"), "alice");
        assert_eq!(pick_name(Some(""), Some("Alice A."), "alice"), "Alice A.");
    }

    #[test]
    fn test_to_utc() {
        let ts = Timestamp::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(to_utc(ts).timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_small_attachment_is_marked_for_reupload() {
        let url = "https://cdn.discordapp.com/attachments/1/2/cat.png";
        let attachment = link_attachment("cat.png", url, 2048);
        assert_eq!(attachment.url.as_deref(), Some(url));
        assert_eq!(attachment.source.as_deref(), Some(url));
        assert!(attachment.data.is_none());
    }

    #[test]
    fn test_large_attachment_is_link_only() {
        let url = "https://cdn.discordapp.com/attachments/1/2/movie.mp4";
        let attachment = link_attachment("movie.mp4", url, 50 * 1024 * 1024);
        assert_eq!(attachment.url.as_deref(), Some(url));
        assert!(attachment.source.is_none());
    }
}
