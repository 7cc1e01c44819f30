use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    Channel, ChannelId, Context, CreateAttachment, CreateEmbed, CreateEmbedAuthor,
    CreateEmbedFooter, CreateMessage, EditMessage, EventHandler, GatewayIntents, GuildId,
    MessageId, Reaction as GatewayReaction, ReactionType, Ready, Timestamp, UserId,
};
use serenity::http::{Http, HttpError};
use serenity::model::channel::{
    Attachment as DiscordAttachment, Embed as DiscordEmbed, Message as DiscordMessage,
    MessageReaction, MessageSnapshot,
};
use serenity::model::sticker::StickerItem;
use tracing::{debug, info};

use crate::platform::{
    Attachment, Author, ChannelInfo, ChatPlatform, Embed, EmbedAuthor, EmbedField, EmbedFooter,
    EmbedMedia, EmojiRef, ForwardedSnapshot, Message, MessageKey, OutgoingPost, PlatformError,
    REACTOR_PAGE_LIMIT, Reaction, ReplyContext, Sticker,
};
use crate::starboard::{DeleteEvent, ReactionEvent, StarboardEngine, StarboardEvent};

/// [`ChatPlatform`] backed by the Discord REST API.
pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn map_error(err: serenity::Error, what: impl std::fmt::Display) -> PlatformError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404 =>
        {
            PlatformError::NotFound(what.to_string())
        }
        _ => PlatformError::Request(format!("{}: {}", what, err)),
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn get_message(&self, key: MessageKey) -> Result<Message, PlatformError> {
        let message = self
            .http
            .get_message(ChannelId::new(key.channel_id), MessageId::new(key.message_id))
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(convert_message(&message))
    }

    async fn get_channel(&self, channel_id: u64) -> Result<ChannelInfo, PlatformError> {
        let channel = self
            .http
            .get_channel(ChannelId::new(channel_id))
            .await
            .map_err(|e| map_error(e, format!("channel {}", channel_id)))?;

        Ok(match channel {
            Channel::Guild(channel) => ChannelInfo {
                id: channel.id.get(),
                name: channel.name,
                nsfw: channel.nsfw,
            },
            other => ChannelInfo {
                id: other.id().get(),
                name: String::new(),
                nsfw: false,
            },
        })
    }

    async fn list_reactors(
        &self,
        key: MessageKey,
        emoji: &EmojiRef,
    ) -> Result<Vec<u64>, PlatformError> {
        let users = ChannelId::new(key.channel_id)
            .reaction_users(
                &*self.http,
                MessageId::new(key.message_id),
                reaction_type(emoji),
                Some(REACTOR_PAGE_LIMIT),
                None::<UserId>,
            )
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(users.into_iter().map(|u| u.id.get()).collect())
    }

    async fn create_post(
        &self,
        channel_id: u64,
        post: OutgoingPost,
    ) -> Result<MessageKey, PlatformError> {
        let mut builder = CreateMessage::new().embed(build_embed(&post.embed));
        if let Some(file) = post.file {
            builder = builder.add_file(CreateAttachment::bytes(file.data, file.filename));
        }

        let sent = ChannelId::new(channel_id)
            .send_message(&*self.http, builder)
            .await
            .map_err(|e| map_error(e, format!("channel {}", channel_id)))?;
        Ok(MessageKey::new(sent.channel_id.get(), sent.id.get()))
    }

    async fn edit_post(&self, key: MessageKey, embed: Embed) -> Result<(), PlatformError> {
        ChannelId::new(key.channel_id)
            .edit_message(
                &*self.http,
                MessageId::new(key.message_id),
                EditMessage::new().embed(build_embed(&embed)),
            )
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(())
    }

    async fn delete_post(&self, key: MessageKey) -> Result<(), PlatformError> {
        ChannelId::new(key.channel_id)
            .delete_message(&*self.http, MessageId::new(key.message_id))
            .await
            .map_err(|e| map_error(e, key))
    }
}

fn to_utc(timestamp: &Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_default()
}

fn emoji_ref(reaction: &ReactionType) -> EmojiRef {
    match reaction {
        ReactionType::Custom { animated, id, name } => EmojiRef::Custom {
            id: id.get(),
            name: name.clone(),
            animated: *animated,
        },
        ReactionType::Unicode(glyph) => EmojiRef::Unicode(glyph.clone()),
        other => EmojiRef::Unicode(other.to_string()),
    }
}

fn reaction_type(emoji: &EmojiRef) -> ReactionType {
    match emoji {
        EmojiRef::Unicode(glyph) => ReactionType::Unicode(glyph.clone()),
        EmojiRef::Custom { id, name, animated } => ReactionType::Custom {
            animated: *animated,
            id: (*id).into(),
            name: name.clone(),
        },
    }
}

fn convert_reaction(reaction: &MessageReaction) -> Reaction {
    Reaction {
        emoji: emoji_ref(&reaction.reaction_type),
        count: u32::try_from(reaction.count).unwrap_or(u32::MAX),
    }
}

fn convert_embed(embed: &DiscordEmbed) -> Embed {
    Embed {
        title: embed.title.clone(),
        description: embed.description.clone(),
        url: embed.url.clone(),
        timestamp: embed.timestamp.as_ref().map(to_utc),
        color: embed.colour.map(|c| c.0),
        author: embed.author.as_ref().map(|a| EmbedAuthor {
            name: a.name.clone(),
            url: a.url.clone(),
            icon_url: a.icon_url.clone(),
        }),
        footer: embed.footer.as_ref().map(|f| EmbedFooter {
            text: f.text.clone(),
            icon_url: f.icon_url.clone(),
        }),
        fields: embed
            .fields
            .iter()
            .map(|f| EmbedField {
                name: f.name.clone(),
                value: f.value.clone(),
                inline: f.inline,
            })
            .collect(),
        image: embed.image.as_ref().map(|i| EmbedMedia {
            url: i.url.clone(),
            proxy_url: i.proxy_url.clone(),
        }),
        thumbnail: embed.thumbnail.as_ref().map(|t| EmbedMedia {
            url: t.url.clone(),
            proxy_url: t.proxy_url.clone(),
        }),
        video: embed.video.as_ref().map(|v| EmbedMedia {
            url: v.url.clone(),
            proxy_url: v.proxy_url.clone(),
        }),
    }
}

fn convert_attachments(attachments: &[DiscordAttachment]) -> Vec<Attachment> {
    attachments
        .iter()
        .map(|a| Attachment {
            url: a.url.clone(),
            filename: a.filename.clone(),
        })
        .collect()
}

fn convert_stickers(stickers: &[StickerItem]) -> Vec<Sticker> {
    stickers
        .iter()
        .map(|s| Sticker {
            id: s.id.get(),
            name: s.name.clone(),
        })
        .collect()
}

/// The first snapshot of a forward, carried as a message of its own. Author,
/// timestamp and key are the outer message's since snapshots carry none.
fn convert_forward(message: &DiscordMessage, outer: &Message) -> Option<ForwardedSnapshot> {
    let snapshot: &MessageSnapshot = message.message_snapshots.first()?;
    let reference = message.message_reference.as_ref();

    let inner = Message {
        content: snapshot.content.clone(),
        attachments: convert_attachments(&snapshot.attachments),
        embeds: snapshot.embeds.iter().map(convert_embed).collect(),
        stickers: convert_stickers(&snapshot.sticker_items),
        reactions: Vec::new(),
        forwarded: None,
        reply: None,
        ..outer.clone()
    };

    Some(ForwardedSnapshot {
        source_guild_id: reference.and_then(|r| r.guild_id).map(|g| g.get()),
        source: reference.and_then(|r| {
            r.message_id
                .map(|m| MessageKey::new(r.channel_id.get(), m.get()))
        }),
        message: Box::new(inner),
    })
}

fn convert_message(message: &DiscordMessage) -> Message {
    let guild_id = message.guild_id.map(|g| g.get());
    let reply = message.referenced_message.as_ref().map(|replied| ReplyContext {
        guild_id,
        key: MessageKey::new(replied.channel_id.get(), replied.id.get()),
        author_id: replied.author.id.get(),
        content: replied.content.clone(),
    });

    let mut converted = Message {
        guild_id,
        key: MessageKey::new(message.channel_id.get(), message.id.get()),
        author: Author {
            id: message.author.id.get(),
            username: message.author.name.clone(),
            avatar_url: Some(message.author.face()),
            bot: message.author.bot,
        },
        content: message.content.clone(),
        timestamp: to_utc(&message.timestamp),
        attachments: convert_attachments(&message.attachments),
        embeds: message.embeds.iter().map(convert_embed).collect(),
        stickers: convert_stickers(&message.sticker_items),
        reactions: message.reactions.iter().map(convert_reaction).collect(),
        forwarded: None,
        reply,
    };

    if let Some(forwarded) = convert_forward(message, &converted) {
        // a forward is not a reply, whatever the reference says
        converted.reply = None;
        converted.forwarded = Some(forwarded);
    }
    converted
}

fn build_embed(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();
    if let Some(title) = &embed.title {
        builder = builder.title(title);
    }
    if let Some(description) = &embed.description {
        builder = builder.description(description);
    }
    if let Some(url) = &embed.url {
        builder = builder.url(url);
    }
    if let Some(timestamp) = embed
        .timestamp
        .and_then(|t| Timestamp::from_unix_timestamp(t.timestamp()).ok())
    {
        builder = builder.timestamp(timestamp);
    }
    if let Some(color) = embed.color {
        builder = builder.color(color);
    }
    if let Some(author) = &embed.author {
        let mut create = CreateEmbedAuthor::new(&author.name);
        if let Some(url) = &author.url {
            create = create.url(url);
        }
        if let Some(icon_url) = &author.icon_url {
            create = create.icon_url(icon_url);
        }
        builder = builder.author(create);
    }
    if let Some(footer) = &embed.footer {
        let mut create = CreateEmbedFooter::new(&footer.text);
        if let Some(icon_url) = &footer.icon_url {
            create = create.icon_url(icon_url);
        }
        builder = builder.footer(create);
    }
    for field in &embed.fields {
        builder = builder.field(&field.name, &field.value, field.inline);
    }
    if let Some(image) = &embed.image {
        builder = builder.image(&image.url);
    }
    if let Some(thumbnail) = &embed.thumbnail {
        builder = builder.thumbnail(&thumbnail.url);
    }
    builder
}

/// Gateway handler: turns reaction and delete events into engine work.
pub struct StarboardHandler {
    engine: Arc<StarboardEngine>,
}

impl StarboardHandler {
    pub fn new(engine: Arc<StarboardEngine>) -> Self {
        Self { engine }
    }

    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
    }

    fn spawn(&self, event: StarboardEvent) {
        let engine = self.engine.clone();
        tokio::spawn(async move { engine.dispatch(event).await });
    }

    fn reaction_event(reaction: &GatewayReaction) -> Option<ReactionEvent> {
        let guild_id = reaction.guild_id?;
        Some(ReactionEvent {
            guild_id: guild_id.get(),
            key: MessageKey::new(reaction.channel_id.get(), reaction.message_id.get()),
            emoji: emoji_ref(&reaction.emoji),
            user_id: reaction.user_id.map(|u| u.get()).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl EventHandler for StarboardHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            bot_user = %ready.user.name,
            guilds = ready.guilds.len(),
            "connected to discord"
        );
    }

    async fn reaction_add(&self, _ctx: Context, add_reaction: GatewayReaction) {
        match Self::reaction_event(&add_reaction) {
            Some(event) => self.spawn(StarboardEvent::ReactionAdd(event)),
            None => debug!("ignoring reaction outside a guild"),
        }
    }

    async fn reaction_remove(&self, _ctx: Context, removed_reaction: GatewayReaction) {
        if let Some(event) = Self::reaction_event(&removed_reaction) {
            self.spawn(StarboardEvent::ReactionRemove(event));
        }
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let Some(guild_id) = guild_id else {
            return;
        };
        self.spawn(StarboardEvent::MessageDelete(DeleteEvent {
            guild_id: guild_id.get(),
            key: MessageKey::new(channel_id.get(), deleted_message_id.get()),
        }));
    }
}
