use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Location of a message: the (channel id, message id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub channel_id: u64,
    pub message_id: u64,
}

impl MessageKey {
    pub fn new(channel_id: u64, message_id: u64) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmojiRef {
    Unicode(String),
    Custom {
        id: u64,
        name: Option<String>,
        animated: bool,
    },
}

impl EmojiRef {
    /// Parses a configured emote: either `<:name:id>` / `<a:name:id>` or a literal glyph.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
            let (animated, rest) = match inner.strip_prefix("a:") {
                Some(rest) => (true, rest),
                None => (false, inner.strip_prefix(':').unwrap_or(inner)),
            };
            if let Some((name, id)) = rest.rsplit_once(':')
                && let Ok(id) = id.parse::<u64>()
            {
                return EmojiRef::Custom {
                    id,
                    name: Some(name.to_string()).filter(|n| !n.is_empty()),
                    animated,
                };
            }
        }
        EmojiRef::Unicode(trimmed.to_string())
    }

    /// Custom emotes compare by id; names and animation flags drift between events.
    pub fn matches(&self, other: &EmojiRef) -> bool {
        match (self, other) {
            (EmojiRef::Unicode(a), EmojiRef::Unicode(b)) => a == b,
            (EmojiRef::Custom { id: a, .. }, EmojiRef::Custom { id: b, .. }) => a == b,
            _ => false,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EmojiRef::Custom { .. })
    }

    pub fn cdn_url(&self) -> Option<String> {
        match self {
            EmojiRef::Custom { id, animated, .. } => {
                let ext = if *animated { "gif" } else { "png" };
                Some(format!("https://cdn.discordapp.com/emojis/{}.{}", id, ext))
            }
            EmojiRef::Unicode(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sticker {
    pub id: u64,
    pub name: String,
}

impl Sticker {
    pub fn cdn_url(&self) -> String {
        format!("https://cdn.discordapp.com/stickers/{}.png", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedMedia {
    pub url: String,
    pub proxy_url: Option<String>,
}

impl EmbedMedia {
    pub fn best_url(&self) -> &str {
        self.proxy_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedFooter {
    pub text: String,
    pub icon_url: Option<String>,
}

/// A rendered rich embed, as read from or written to the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub color: Option<u32>,
    pub author: Option<EmbedAuthor>,
    pub footer: Option<EmbedFooter>,
    pub fields: Vec<EmbedField>,
    pub image: Option<EmbedMedia>,
    pub thumbnail: Option<EmbedMedia>,
    pub video: Option<EmbedMedia>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: EmojiRef,
    pub count: u32,
}

/// The message a reply points at, as delivered alongside the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub guild_id: Option<u64>,
    pub key: MessageKey,
    pub author_id: u64,
    pub content: String,
}

/// A forwarded message: the inner snapshot plus where it was forwarded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedSnapshot {
    pub source_guild_id: Option<u64>,
    pub source: Option<MessageKey>,
    pub message: Box<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub guild_id: Option<u64>,
    pub key: MessageKey,
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub stickers: Vec<Sticker>,
    pub reactions: Vec<Reaction>,
    pub forwarded: Option<ForwardedSnapshot>,
    pub reply: Option<ReplyContext>,
}

impl Message {
    pub fn reaction(&self, emoji: &EmojiRef) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.emoji.matches(emoji))
    }

    pub fn footer_text(&self) -> Option<&str> {
        self.embeds
            .first()
            .and_then(|e| e.footer.as_ref())
            .map(|f| f.text.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub name: String,
    pub nsfw: bool,
}
