//! Shared types used across the application.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One configured bridge instance: protocol kind plus a unique name.
///
/// Rendered as `protocol.name` (e.g. `discord.main`), which is also the
/// form used to reference accounts from gateway definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account {
    pub protocol: String,
    pub name: String,
}

impl Account {
    pub fn new(protocol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            name: name.into(),
        }
    }

    /// Parse the `protocol.name` form. Both halves must be non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (protocol, name) = value.trim().split_once('.')?;
        if protocol.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(protocol, name))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.protocol, self.name)
    }
}

/// A relay endpoint: a channel or room on one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub account: Account,
    pub channel: String,
}

impl ChannelRef {
    pub fn new(account: Account, channel: impl Into<String>) -> Self {
        Self {
            account,
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.account, self.channel)
    }
}

/// What happened on the origin network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Edit,
    Delete,
    /// Membership notices. The Discord adapter does not produce these: it
    /// would need the privileged member intent.
    #[allow(dead_code)]
    Join,
    #[allow(dead_code)]
    Leave,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// A file attached to a message.
///
/// `url` is whatever link is already publicly reachable. An attachment is
/// eligible for re-upload when it carries its bytes in `data`, or a
/// `source` link they can be downloaded from later.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: Option<String>,
    pub data: Option<Bytes>,
    pub source: Option<String>,
    pub comment: Option<String>,
}

impl Attachment {
    pub fn from_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// Record where the content can be downloaded for re-upload.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// An event produced by a bridge for the router.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub origin: ChannelRef,
    pub message_id: String,
    pub sender_name: String,
    pub sender_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(origin: ChannelRef, kind: EventKind, message_id: impl Into<String>) -> Self {
        Self {
            origin,
            message_id: message_id.into(),
            sender_name: String::new(),
            sender_id: String::new(),
            text: String::new(),
            attachments: Vec::new(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn with_sender(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self.sender_id = id.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[cfg(test)]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// The account the event came from.
    pub fn account(&self) -> &Account {
        &self.origin.account
    }
}

/// Payload handed to a bridge for sending or editing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    /// Decorated sender prefix, e.g. `[discord] <alice> `.
    pub nick: String,
    /// Body after clamping, with attachment links appended.
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Single line of text for networks without separate author fields.
    pub fn rendered(&self) -> String {
        format!("{}{}", self.nick, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_parse() {
        let account = Account::parse("discord.main").unwrap();
        assert_eq!(account.protocol, "discord");
        assert_eq!(account.name, "main");
        assert_eq!(account.to_string(), "discord.main");

        // Names may themselves contain dots
        let account = Account::parse("irc.libera.chat").unwrap();
        assert_eq!(account.name, "libera.chat");

        assert!(Account::parse("discord").is_none());
        assert!(Account::parse(".main").is_none());
        assert!(Account::parse("discord.").is_none());
    }

    #[test]
    fn test_channel_ref_display() {
        let channel = ChannelRef::new(Account::new("slack", "work"), "general");
        assert_eq!(channel.to_string(), "slack.work#general");
    }

    #[test]
    fn test_rendered_message() {
        let message = OutboundMessage {
            nick: "[irc] <bob> ".to_string(),
            text: "hello".to_string(),
            attachments: Vec::new(),
        };
        assert_eq!(message.rendered(), "[irc] <bob> hello");
    }
}
