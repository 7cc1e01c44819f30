use async_trait::async_trait;
use thiserror::Error;

use crate::media::MediaFile;

pub use self::model::{
    Attachment, Author, ChannelInfo, EmbedAuthor, Embed, EmbedField, EmbedFooter, EmbedMedia,
    EmojiRef, ForwardedSnapshot, Message, MessageKey, Reaction, ReplyContext, Sticker,
};

pub mod discord;
pub mod model;

/// Maximum number of reactors the platform returns in one page.
pub const REACTOR_PAGE_LIMIT: u8 = 100;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

/// A finished post: one embed plus at most one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPost {
    pub embed: Embed,
    pub file: Option<MediaFile>,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn get_message(&self, key: MessageKey) -> Result<Message, PlatformError>;

    async fn get_channel(&self, channel_id: u64) -> Result<ChannelInfo, PlatformError>;

    /// Lists up to [`REACTOR_PAGE_LIMIT`] user ids that reacted with `emoji`.
    async fn list_reactors(
        &self,
        key: MessageKey,
        emoji: &EmojiRef,
    ) -> Result<Vec<u64>, PlatformError>;

    async fn create_post(
        &self,
        channel_id: u64,
        post: OutgoingPost,
    ) -> Result<MessageKey, PlatformError>;

    async fn edit_post(&self, key: MessageKey, embed: Embed) -> Result<(), PlatformError>;

    async fn delete_post(&self, key: MessageKey) -> Result<(), PlatformError>;
}
