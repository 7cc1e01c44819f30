use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::{EmojiRef, MessageKey};

pub const DEFAULT_EMOTE: &str = "⭐";

/// Per-guild starboard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: u64,
    #[serde(default = "default_emote")]
    pub emote: String,
    #[serde(default)]
    pub selfstar: bool,
    #[serde(default)]
    pub ignore_bots: bool,
    #[serde(default)]
    pub embed_color: u32,
    #[serde(default)]
    pub starboard_channel: Option<u64>,
    #[serde(default)]
    pub nsfw_starboard_channel: Option<u64>,
    #[serde(default)]
    pub starboards: Vec<StarboardRule>,
    #[serde(default)]
    pub ignored_users: Vec<u64>,
    #[serde(default)]
    pub channel_settings: Vec<ChannelSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarboardRule {
    pub starboard_channel: u64,
    #[serde(default)]
    pub channels: Vec<u64>,
    pub required_stars: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub id: u64,
    #[serde(default)]
    pub ignored: bool,
    /// Zero means "no override".
    #[serde(default)]
    pub required_stars: u32,
}

/// Where a source channel's mirrors go and how many stars they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub mirror_channel: u64,
    pub required_stars: u32,
}

impl Placement {
    /// Adjusted counts at or below this retract a tracked mirror.
    pub fn retract_floor(&self) -> u32 {
        self.required_stars / 2
    }
}

impl GuildConfig {
    pub fn new(guild_id: u64) -> Self {
        let now = Utc::now();
        Self {
            guild_id,
            emote: default_emote(),
            selfstar: false,
            ignore_bots: false,
            embed_color: 0,
            starboard_channel: None,
            nsfw_starboard_channel: None,
            starboards: Vec::new(),
            ignored_users: Vec::new(),
            channel_settings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn emote(&self) -> EmojiRef {
        EmojiRef::parse(&self.emote)
    }

    pub fn channel_settings(&self, channel_id: u64) -> Option<&ChannelSettings> {
        self.channel_settings.iter().find(|s| s.id == channel_id)
    }

    pub fn ignores_author(&self, user_id: u64, bot: bool) -> bool {
        (bot && self.ignore_bots) || self.ignored_users.contains(&user_id)
    }

    /// Resolves threshold and mirror channel for messages posted in `channel_id`.
    ///
    /// A channel override is consulted first: ignored channels never resolve,
    /// and a positive `required_stars` replaces the rule threshold (the mirror
    /// falls back to the guild default when no rule covers the channel).
    /// Otherwise the first rule listing the channel wins.
    pub fn placement(&self, channel_id: u64, nsfw: bool) -> Option<Placement> {
        let settings = self.channel_settings(channel_id);
        if settings.is_some_and(|s| s.ignored) {
            return None;
        }

        let rule = self
            .starboards
            .iter()
            .find(|r| r.channels.contains(&channel_id));

        let (required_stars, mirror_channel) =
            match settings.map(|s| s.required_stars).filter(|n| *n > 0) {
                Some(required) => (
                    required,
                    rule.map(|r| r.starboard_channel)
                        .or(self.starboard_channel)?,
                ),
                None => {
                    let rule = rule?;
                    (rule.required_stars, rule.starboard_channel)
                }
            };

        let mirror_channel = match (nsfw, self.nsfw_starboard_channel) {
            (true, Some(nsfw_channel)) => nsfw_channel,
            _ => mirror_channel,
        };

        Some(Placement {
            mirror_channel,
            required_stars: required_stars.max(1),
        })
    }
}

/// Persisted link between an original message and its mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePair {
    pub guild_id: u64,
    pub original: MessageKey,
    pub mirror: MessageKey,
    pub created_at: DateTime<Utc>,
}

impl MessagePair {
    pub fn new(guild_id: u64, original: MessageKey, mirror: MessageKey) -> Self {
        Self {
            guild_id,
            original,
            mirror,
            created_at: Utc::now(),
        }
    }
}

fn default_emote() -> String {
    DEFAULT_EMOTE.to_string()
}
