//! Message formatting for relayed copies.
//!
//! Handles nick decoration with placeholder substitution and per-target
//! length clamping. Supports placeholders: %user, %protocol, %bridge,
//! %gateway, %channel

use crate::common::{EventKind, InboundEvent, OutboundMessage};
use crate::gateway::Target;

/// Appended to text cut down to a target's maximum length.
pub const CLIPPED_SUFFIX: &str = " <clipped message>";

/// Nick formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct NickFormatter {
    /// Format string for this formatter.
    format: String,
}

impl NickFormatter {
    /// Create a new formatter with the given format string.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Format a nick with the given context.
    ///
    /// Substitutes the following placeholders:
    /// - `%user` - Sender display name
    /// - `%protocol` - Origin protocol (e.g. "discord")
    /// - `%bridge` - Origin account name
    /// - `%gateway` - Gateway that matched
    /// - `%channel` - Origin channel
    pub fn format(&self, ctx: &FormatContext) -> String {
        self.format
            .replace("%user", &ctx.user)
            .replace("%protocol", &ctx.protocol)
            .replace("%bridge", &ctx.bridge)
            .replace("%gateway", &ctx.gateway)
            .replace("%channel", &ctx.channel)
    }
}

/// Context for nick formatting.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    pub user: String,
    pub protocol: String,
    pub bridge: String,
    pub gateway: String,
    pub channel: String,
}

impl FormatContext {
    /// Build the context for delivering `event` through `gateway`.
    pub fn for_event(event: &InboundEvent, gateway: &str) -> Self {
        Self {
            user: event.sender_name.clone(),
            protocol: event.origin.account.protocol.clone(),
            bridge: event.origin.account.name.clone(),
            gateway: gateway.to_string(),
            channel: event.origin.channel.clone(),
        }
    }
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
///
/// Returns a byte offset that is safe to use for slicing `s`.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    // Walk backward until we find a char boundary
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Clamp `text` to at most `max_len` bytes, including the clip suffix.
///
/// Never cuts a multi-byte UTF-8 character in half. When `max_len` cannot
/// even hold the suffix, the text is cut without one.
pub fn clamp_message(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    if max_len <= CLIPPED_SUFFIX.len() {
        return text[..floor_char_boundary(text, max_len)].to_string();
    }

    let cut = floor_char_boundary(text, max_len - CLIPPED_SUFFIX.len());
    format!("{}{}", &text[..cut], CLIPPED_SUFFIX)
}

/// Render the copy of `event` to deliver to `target`.
///
/// Attachment URLs are appended on their own lines after clamping, so a
/// link is never cut in half.
pub fn render(event: &InboundEvent, target: &Target, default_nick_format: &str) -> OutboundMessage {
    let format = target
        .options
        .nick_format
        .as_deref()
        .unwrap_or(default_nick_format);
    let nick = NickFormatter::new(format).format(&FormatContext::for_event(event, &target.gateway));

    let body = match event.kind {
        EventKind::Join => format!("{} has joined {}", event.sender_name, event.origin.channel),
        EventKind::Leave => format!("{} has left {}", event.sender_name, event.origin.channel),
        _ => event.text.clone(),
    };

    let mut text = match target.options.max_length {
        Some(max_len) => clamp_message(&body, max_len),
        None => body,
    };

    for attachment in &event.attachments {
        if let Some(url) = &attachment.url {
            if !text.is_empty() {
                text.push('\n');
            }
            if let Some(comment) = attachment.comment.as_deref().filter(|c| !c.is_empty()) {
                text.push_str(comment);
                text.push_str(": ");
            }
            text.push_str(url);
        }
    }

    OutboundMessage {
        nick,
        text,
        attachments: event.attachments.clone(),
    }
}
