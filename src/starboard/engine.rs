use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::GuildConfigCache;
use crate::db::{DatabaseError, DatabaseManager, GuildConfig, MessagePair, MessagePairStore};
use crate::platform::{ChatPlatform, EmojiRef, Message, MessageKey, PlatformError};
use crate::starboard::content::{ContentExtractor, ExtractError};
use crate::starboard::draft::{MirrorHeader, compose, star_footer};
use crate::starboard::event::{DeleteEvent, ReactionEvent, ReactionState, StarboardEvent};
use crate::starboard::guard::{Cancelled, ConcurrencyGuard, GuardToken};

#[derive(Error, Debug)]
pub enum StarboardError {
    #[error("store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("content extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// What a handled event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing applies: wrong emote, unconfigured channel, ignored author,
    /// below threshold, or nothing tracked.
    Ignored,
    Created(MessageKey),
    Updated,
    /// Tracked, and the rendered footer already matches.
    Unchanged,
    Removed,
    /// The mirror had vanished; its record was dropped.
    StaleDropped,
}

/// Reconciles reaction and delete signals against mirrored posts.
pub struct StarboardEngine {
    store: Arc<DatabaseManager>,
    guilds: Arc<GuildConfigCache>,
    platform: Arc<dyn ChatPlatform>,
    extractor: ContentExtractor,
    guard: ConcurrencyGuard,
}

impl StarboardEngine {
    pub fn new(
        store: Arc<DatabaseManager>,
        guilds: Arc<GuildConfigCache>,
        platform: Arc<dyn ChatPlatform>,
        extractor: ContentExtractor,
    ) -> Self {
        Self {
            store,
            guilds,
            platform,
            extractor,
            guard: ConcurrencyGuard::new(),
        }
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    /// Handles one event and logs the result. Never fails.
    pub async fn dispatch(&self, event: StarboardEvent) {
        let guild_id = event.guild_id();
        let key = event.key();
        let kind = event.kind();

        match self.handle(event).await {
            Ok(outcome) => debug!(
                guild_id,
                channel_id = key.channel_id,
                message_id = key.message_id,
                kind,
                ?outcome,
                "starboard event handled"
            ),
            Err(StarboardError::Cancelled(_)) => debug!(
                guild_id,
                channel_id = key.channel_id,
                message_id = key.message_id,
                kind,
                "starboard event superseded by a delete"
            ),
            Err(err) => warn!(
                guild_id,
                channel_id = key.channel_id,
                message_id = key.message_id,
                kind,
                error = %err,
                "starboard event dropped"
            ),
        }
    }

    pub async fn handle(&self, event: StarboardEvent) -> Result<Outcome, StarboardError> {
        match event {
            StarboardEvent::ReactionAdd(event) => self.on_reaction(&event, true).await,
            StarboardEvent::ReactionRemove(event) => self.on_reaction(&event, false).await,
            StarboardEvent::MessageDelete(event) => self.on_delete(&event).await,
        }
    }

    async fn on_reaction(
        &self,
        event: &ReactionEvent,
        added: bool,
    ) -> Result<Outcome, StarboardError> {
        let guild = self.guilds.get_or_create(event.guild_id).await?;
        let emote = guild.emote();
        if !emote.matches(&event.emoji) {
            return Ok(Outcome::Ignored);
        }

        let token = self.guard.acquire(event.key).await?;

        let mut message = match self.platform.get_message(event.key).await {
            Ok(message) => message,
            Err(err) if err.is_not_found() => {
                debug!("original {} is gone: {}", event.key, err);
                return Ok(Outcome::Ignored);
            }
            Err(err) => return Err(err.into()),
        };

        // fetched messages do not carry their guild
        message.guild_id.get_or_insert(event.guild_id);
        if let Some(reply) = message.reply.as_mut() {
            reply.guild_id.get_or_insert(event.guild_id);
        }

        match self.store.get_by_original(event.key).await? {
            Some(pair) => {
                self.reconcile_tracked(&token, &guild, &emote, &message, pair, added)
                    .await
            }
            None if added => self.try_create(&token, &guild, &emote, &message).await,
            None => Ok(Outcome::Ignored),
        }
    }

    async fn reaction_state(
        &self,
        message: &Message,
        emote: &EmojiRef,
    ) -> Result<Option<ReactionState>, StarboardError> {
        let Some(reaction) = message.reaction(emote) else {
            return Ok(None);
        };

        let reactors = self
            .platform
            .list_reactors(message.key, &reaction.emoji)
            .await?;

        Ok(Some(ReactionState {
            count: reaction.count,
            self_starred: reactors.contains(&message.author.id),
        }))
    }

    async fn try_create(
        &self,
        token: &GuardToken,
        guild: &GuildConfig,
        emote: &EmojiRef,
        message: &Message,
    ) -> Result<Outcome, StarboardError> {
        if guild.ignores_author(message.author.id, message.author.bot) {
            return Ok(Outcome::Ignored);
        }

        let channel = self.platform.get_channel(message.key.channel_id).await?;
        let Some(placement) = guild.placement(channel.id, channel.nsfw) else {
            return Ok(Outcome::Ignored);
        };

        let Some(state) = self.reaction_state(message, emote).await? else {
            return Ok(Outcome::Ignored);
        };
        let adjusted = state.adjusted(guild.selfstar);
        if adjusted < placement.required_stars {
            return Ok(Outcome::Ignored);
        }

        let extraction = self.extractor.extract(message).await?;
        let footer = star_footer(adjusted, emote, state.annotate_self_star(guild.selfstar));
        let draft = compose(
            MirrorHeader {
                message,
                channel_name: &channel.name,
                color: guild.embed_color,
                footer,
            },
            extraction,
        );

        token.ensure_active()?;
        let mirror = self
            .platform
            .create_post(placement.mirror_channel, draft.into_post())
            .await?;

        if let Err(cancelled) = token.ensure_active() {
            self.discard_mirror(mirror).await;
            return Err(cancelled.into());
        }

        let pair = MessagePair::new(guild.guild_id, message.key, mirror);
        if let Err(err) = self.store.create_pair(&pair).await {
            self.discard_mirror(mirror).await;
            return Err(err.into());
        }

        info!(
            guild_id = guild.guild_id,
            channel_id = message.key.channel_id,
            message_id = message.key.message_id,
            mirror = %mirror,
            stars = adjusted,
            "created starboard mirror"
        );
        Ok(Outcome::Created(mirror))
    }

    async fn reconcile_tracked(
        &self,
        token: &GuardToken,
        guild: &GuildConfig,
        emote: &EmojiRef,
        message: &Message,
        pair: MessagePair,
        added: bool,
    ) -> Result<Outcome, StarboardError> {
        let mirror = match self.platform.get_message(pair.mirror).await {
            Ok(mirror) => mirror,
            Err(err) if err.is_not_found() => {
                debug!("mirror {} of {} is gone, dropping record", pair.mirror, pair.original);
                token.ensure_active()?;
                self.store.delete_by_original(pair.original).await?;
                return Ok(Outcome::StaleDropped);
            }
            Err(err) => return Err(err.into()),
        };

        let Some(placement) = guild.placement(message.key.channel_id, false) else {
            return Ok(Outcome::Ignored);
        };

        let state = self.reaction_state(message, emote).await?;
        let state = match (state, added) {
            (Some(state), _) => state,
            (None, true) => return Ok(Outcome::Unchanged),
            (None, false) => {
                self.retract(token, &pair).await?;
                return Ok(Outcome::Removed);
            }
        };

        let adjusted = state.adjusted(guild.selfstar);
        if !added && adjusted <= placement.retract_floor() {
            self.retract(token, &pair).await?;
            return Ok(Outcome::Removed);
        }

        let footer = star_footer(adjusted, emote, state.annotate_self_star(guild.selfstar));
        if mirror.footer_text() == Some(footer.text.as_str()) {
            return Ok(Outcome::Unchanged);
        }

        let mut embed = mirror.embeds.first().cloned().unwrap_or_default();
        embed.footer = Some(footer);

        token.ensure_active()?;
        self.platform.edit_post(pair.mirror, embed).await?;
        debug!("updated mirror {} to {} stars", pair.mirror, adjusted);
        Ok(Outcome::Updated)
    }

    async fn on_delete(&self, event: &DeleteEvent) -> Result<Outcome, StarboardError> {
        self.guard.cancel(event.key);
        let token = self.guard.acquire(event.key).await?;

        if let Some(pair) = self.store.get_by_original(event.key).await? {
            self.retract(&token, &pair).await?;
            return Ok(Outcome::Removed);
        }

        let Some(pair) = self.store.get_by_mirror(event.key).await? else {
            return Ok(Outcome::Ignored);
        };
        drop(token);

        self.guard.cancel(pair.original);
        let token = self.guard.acquire(pair.original).await?;
        token.ensure_active()?;
        self.store.delete_by_original(pair.original).await?;
        info!(
            guild_id = pair.guild_id,
            channel_id = pair.original.channel_id,
            message_id = pair.original.message_id,
            "mirror deleted, dropped record"
        );
        Ok(Outcome::Removed)
    }

    /// Deletes the mirror, then its record. A mirror that is already gone is fine.
    async fn retract(&self, token: &GuardToken, pair: &MessagePair) -> Result<(), StarboardError> {
        token.ensure_active()?;
        match self.platform.delete_post(pair.mirror).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!("mirror {} already deleted", pair.mirror);
            }
            Err(err) => return Err(err.into()),
        }
        self.store.delete_by_original(pair.original).await?;
        info!(
            guild_id = pair.guild_id,
            channel_id = pair.original.channel_id,
            message_id = pair.original.message_id,
            mirror = %pair.mirror,
            "removed starboard mirror"
        );
        Ok(())
    }

    async fn discard_mirror(&self, mirror: MessageKey) {
        if let Err(err) = self.platform.delete_post(mirror).await {
            warn!("failed to discard orphaned mirror {}: {}", mirror, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::db::{ChannelSettings, GuildStore, MemoryStore, StarboardRule};
    use crate::gif::{GifError, GifResolver};
    use crate::media::{FetchError, MediaFile, MediaSource};
    use tokio::sync::Notify;

    use crate::platform::{Attachment, Author, ChannelInfo, Embed, OutgoingPost, Reaction};

    const GUILD: u64 = 1;
    const SOURCE: u64 = 10;
    const BOARD: u64 = 100;
    const NSFW_SOURCE: u64 = 11;
    const NSFW_BOARD: u64 = 666;
    const AUTHOR: u64 = 7;
    const ORIGINAL: MessageKey = MessageKey {
        channel_id: SOURCE,
        message_id: 500,
    };

    #[derive(Default)]
    struct PlatformState {
        messages: HashMap<MessageKey, Message>,
        reactors: HashMap<MessageKey, Vec<u64>>,
        channels: HashMap<u64, ChannelInfo>,
        next_id: u64,
        created: Vec<(u64, OutgoingPost)>,
        edits: usize,
        deleted: Vec<MessageKey>,
        fail_edits: bool,
    }

    /// In-memory platform: posts become readable messages.
    #[derive(Default)]
    struct ScriptedPlatform {
        state: Mutex<PlatformState>,
    }

    impl ScriptedPlatform {
        fn new() -> Self {
            let platform = Self::default();
            {
                let mut state = platform.state.lock();
                state.next_id = 9000;
                for (id, name, nsfw) in [
                    (SOURCE, "general", false),
                    (NSFW_SOURCE, "after-dark", true),
                    (BOARD, "starboard", false),
                ] {
                    state.channels.insert(
                        id,
                        ChannelInfo {
                            id,
                            name: name.to_string(),
                            nsfw,
                        },
                    );
                }
            }
            platform
        }

        fn post_original(&self, key: MessageKey, content: &str) {
            self.state.lock().messages.insert(key, message(key, content));
        }

        fn attach(&self, key: MessageKey, url: &str) {
            if let Some(message) = self.state.lock().messages.get_mut(&key) {
                message.attachments.push(Attachment {
                    url: url.to_string(),
                    filename: url.rsplit('/').next().unwrap_or_default().to_string(),
                });
            }
        }

        fn set_stars(&self, key: MessageKey, reactors: &[u64]) {
            let mut state = self.state.lock();
            if let Some(message) = state.messages.get_mut(&key) {
                message.reactions = if reactors.is_empty() {
                    Vec::new()
                } else {
                    vec![Reaction {
                        emoji: EmojiRef::Unicode("⭐".to_string()),
                        count: reactors.len() as u32,
                    }]
                };
            }
            state.reactors.insert(key, reactors.to_vec());
        }

        fn remove_message(&self, key: MessageKey) {
            self.state.lock().messages.remove(&key);
        }

        fn created(&self) -> usize {
            self.state.lock().created.len()
        }

        fn edits(&self) -> usize {
            self.state.lock().edits
        }

        fn deleted(&self) -> Vec<MessageKey> {
            self.state.lock().deleted.clone()
        }

        fn footer(&self, key: MessageKey) -> Option<String> {
            self.state
                .lock()
                .messages
                .get(&key)
                .and_then(|m| m.footer_text().map(ToOwned::to_owned))
        }

        fn last_post(&self) -> Option<(u64, OutgoingPost)> {
            self.state.lock().created.last().cloned()
        }
    }

    #[async_trait]
    impl ChatPlatform for ScriptedPlatform {
        async fn get_message(&self, key: MessageKey) -> Result<Message, PlatformError> {
            self.state
                .lock()
                .messages
                .get(&key)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(key.to_string()))
        }

        async fn get_channel(&self, channel_id: u64) -> Result<ChannelInfo, PlatformError> {
            self.state
                .lock()
                .channels
                .get(&channel_id)
                .cloned()
                .ok_or_else(|| PlatformError::NotFound(channel_id.to_string()))
        }

        async fn list_reactors(
            &self,
            key: MessageKey,
            _emoji: &EmojiRef,
        ) -> Result<Vec<u64>, PlatformError> {
            Ok(self
                .state
                .lock()
                .reactors
                .get(&key)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_post(
            &self,
            channel_id: u64,
            post: OutgoingPost,
        ) -> Result<MessageKey, PlatformError> {
            let mut state = self.state.lock();
            state.next_id += 1;
            let key = MessageKey::new(channel_id, state.next_id);
            let mut mirror = message(key, "");
            mirror.embeds = vec![post.embed.clone()];
            state.messages.insert(key, mirror);
            state.created.push((channel_id, post));
            Ok(key)
        }

        async fn edit_post(&self, key: MessageKey, embed: Embed) -> Result<(), PlatformError> {
            let mut state = self.state.lock();
            if state.fail_edits {
                return Err(PlatformError::Request("edit rejected".to_string()));
            }
            let mirror = state
                .messages
                .get_mut(&key)
                .ok_or_else(|| PlatformError::NotFound(key.to_string()))?;
            mirror.embeds = vec![embed];
            state.edits += 1;
            Ok(())
        }

        async fn delete_post(&self, key: MessageKey) -> Result<(), PlatformError> {
            let mut state = self.state.lock();
            state
                .messages
                .remove(&key)
                .ok_or_else(|| PlatformError::NotFound(key.to_string()))?;
            state.deleted.push(key);
            Ok(())
        }
    }

    struct NoMedia;

    /// Signals when a download starts, then blocks until released.
    #[derive(Default)]
    struct GatedMedia {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl MediaSource for GatedMedia {
        async fn fetch(&self, url: &str) -> Result<Option<MediaFile>, FetchError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Some(MediaFile {
                data: b"abc".to_vec(),
                content_type: "video/mp4".to_string(),
                filename: url.rsplit('/').next().unwrap_or("clip.mp4").to_string(),
            }))
        }
    }

    #[async_trait]
    impl MediaSource for NoMedia {
        async fn fetch(&self, url: &str) -> Result<Option<MediaFile>, FetchError> {
            Err(FetchError::Request {
                url: url.to_string(),
                message: "offline".to_string(),
            })
        }
    }

    struct NoGifs;

    #[async_trait]
    impl GifResolver for NoGifs {
        async fn resolve(&self, _page_url: &str) -> Result<Option<String>, GifError> {
            Ok(None)
        }
    }

    /// Memory store whose pair writes always fail.
    struct BrokenPairs(MemoryStore);

    #[async_trait]
    impl GuildStore for BrokenPairs {
        async fn get_guild(&self, guild_id: u64) -> Result<Option<GuildConfig>, DatabaseError> {
            self.0.get_guild(guild_id).await
        }
        async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
            self.0.create_guild(guild).await
        }
        async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
            self.0.update_guild(guild).await
        }
        async fn delete_guild(&self, guild_id: u64) -> Result<(), DatabaseError> {
            self.0.delete_guild(guild_id).await
        }
    }

    #[async_trait]
    impl MessagePairStore for BrokenPairs {
        async fn get_by_original(
            &self,
            original: MessageKey,
        ) -> Result<Option<MessagePair>, DatabaseError> {
            self.0.get_by_original(original).await
        }
        async fn get_by_mirror(
            &self,
            mirror: MessageKey,
        ) -> Result<Option<MessagePair>, DatabaseError> {
            self.0.get_by_mirror(mirror).await
        }
        async fn create_pair(&self, _pair: &MessagePair) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }
        async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError> {
            self.0.delete_by_original(original).await
        }
    }

    fn message(key: MessageKey, content: &str) -> Message {
        Message {
            guild_id: Some(GUILD),
            key,
            author: Author {
                id: AUTHOR,
                username: "alice".to_string(),
                avatar_url: None,
                bot: false,
            },
            content: content.to_string(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            stickers: Vec::new(),
            reactions: Vec::new(),
            forwarded: None,
            reply: None,
        }
    }

    fn guild_config(required_stars: u32, selfstar: bool) -> GuildConfig {
        let mut guild = GuildConfig::new(GUILD);
        guild.selfstar = selfstar;
        guild.nsfw_starboard_channel = Some(NSFW_BOARD);
        guild.starboards.push(StarboardRule {
            starboard_channel: BOARD,
            channels: vec![SOURCE, NSFW_SOURCE],
            required_stars,
        });
        guild
    }

    struct Harness {
        engine: StarboardEngine,
        platform: Arc<ScriptedPlatform>,
        store: Arc<DatabaseManager>,
    }

    async fn harness_with(store: Arc<DatabaseManager>, guild: GuildConfig) -> Harness {
        harness_with_media(store, guild, Arc::new(NoMedia)).await
    }

    async fn harness_with_media(
        store: Arc<DatabaseManager>,
        guild: GuildConfig,
        media: Arc<dyn MediaSource>,
    ) -> Harness {
        store.create_guild(&guild).await.unwrap();
        let platform = Arc::new(ScriptedPlatform::new());
        let guilds = Arc::new(GuildConfigCache::new(store.clone(), Duration::from_secs(60)));
        let extractor = ContentExtractor::new(media, Arc::new(NoGifs));
        let engine = StarboardEngine::new(store.clone(), guilds, platform.clone(), extractor);
        Harness {
            engine,
            platform,
            store,
        }
    }

    async fn harness(guild: GuildConfig) -> Harness {
        harness_with(
            Arc::new(DatabaseManager::in_memory(Duration::from_secs(5))),
            guild,
        )
        .await
    }

    fn star(key: MessageKey, user_id: u64) -> ReactionEvent {
        ReactionEvent {
            guild_id: GUILD,
            key,
            emoji: EmojiRef::Unicode("⭐".to_string()),
            user_id,
        }
    }

    fn add(key: MessageKey, user_id: u64) -> StarboardEvent {
        StarboardEvent::ReactionAdd(star(key, user_id))
    }

    fn remove(key: MessageKey, user_id: u64) -> StarboardEvent {
        StarboardEvent::ReactionRemove(star(key, user_id))
    }

    fn delete(key: MessageKey) -> StarboardEvent {
        StarboardEvent::MessageDelete(DeleteEvent {
            guild_id: GUILD,
            key,
        })
    }

    impl Harness {
        async fn mirror_of(&self, original: MessageKey) -> Option<MessageKey> {
            self.store
                .get_by_original(original)
                .await
                .unwrap()
                .map(|pair| pair.mirror)
        }

        async fn track(&self, reactors: &[u64]) -> MessageKey {
            self.platform.post_original(ORIGINAL, "hello world");
            self.platform.set_stars(ORIGINAL, reactors);
            let last = reactors.last().copied().unwrap_or(AUTHOR);
            match self.engine.handle(add(ORIGINAL, last)).await.unwrap() {
                Outcome::Created(mirror) => mirror,
                other => panic!("expected a mirror, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn self_star_is_discounted_until_threshold() {
        let h = harness(guild_config(3, false)).await;
        h.platform.post_original(ORIGINAL, "hello");

        h.platform.set_stars(ORIGINAL, &[AUTHOR, 20, 21]);
        let outcome = h.engine.handle(add(ORIGINAL, 21)).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(h.platform.created(), 0);

        h.platform.set_stars(ORIGINAL, &[AUTHOR, 20, 21, 22]);
        let outcome = h.engine.handle(add(ORIGINAL, 22)).await.unwrap();
        let Outcome::Created(mirror) = outcome else {
            panic!("expected creation, got {:?}", outcome);
        };
        assert_eq!(mirror.channel_id, BOARD);
        assert_eq!(h.platform.footer(mirror).as_deref(), Some("⭐ 3"));
        assert_eq!(h.mirror_of(ORIGINAL).await, Some(mirror));
    }

    #[tokio::test]
    async fn replayed_add_does_not_double_decrement() {
        let h = harness(guild_config(3, false)).await;
        let mirror = h.track(&[AUTHOR, 20, 21, 22]).await;

        for _ in 0..3 {
            let outcome = h.engine.handle(add(ORIGINAL, 22)).await.unwrap();
            assert_eq!(outcome, Outcome::Unchanged);
        }
        assert_eq!(h.platform.footer(mirror).as_deref(), Some("⭐ 3"));
        assert_eq!(h.platform.edits(), 0);
        assert_eq!(h.platform.created(), 1);
    }

    #[tokio::test]
    async fn hysteresis_keeps_mirror_until_half_threshold() {
        let h = harness(guild_config(5, false)).await;
        let mirror = h.track(&[20, 21, 22, 23, 24]).await;
        assert_eq!(h.platform.footer(mirror).as_deref(), Some("⭐ 5"));

        h.platform.set_stars(ORIGINAL, &[20, 21, 22, 23]);
        assert_eq!(
            h.engine.handle(remove(ORIGINAL, 24)).await.unwrap(),
            Outcome::Updated
        );
        assert_eq!(h.platform.footer(mirror).as_deref(), Some("⭐ 4"));

        h.platform.set_stars(ORIGINAL, &[20, 21, 22]);
        assert_eq!(
            h.engine.handle(remove(ORIGINAL, 23)).await.unwrap(),
            Outcome::Updated
        );
        assert_eq!(h.platform.footer(mirror).as_deref(), Some("⭐ 3"));

        h.platform.set_stars(ORIGINAL, &[20, 21]);
        assert_eq!(
            h.engine.handle(remove(ORIGINAL, 22)).await.unwrap(),
            Outcome::Removed
        );
        assert_eq!(h.platform.deleted(), vec![mirror]);
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }

    #[tokio::test]
    async fn removing_every_star_retracts() {
        let h = harness(guild_config(2, false)).await;
        let mirror = h.track(&[20, 21]).await;

        h.platform.set_stars(ORIGINAL, &[]);
        assert_eq!(
            h.engine.handle(remove(ORIGINAL, 21)).await.unwrap(),
            Outcome::Removed
        );
        assert_eq!(h.platform.deleted(), vec![mirror]);
    }

    #[tokio::test]
    async fn lookups_by_original_and_mirror_agree() {
        let h = harness(guild_config(1, false)).await;
        let mirror = h.track(&[20]).await;

        let by_original = h.store.get_by_original(ORIGINAL).await.unwrap();
        let by_mirror = h.store.get_by_mirror(mirror).await.unwrap();
        assert!(by_original.is_some());
        assert_eq!(by_original, by_mirror);
    }

    #[tokio::test]
    async fn deleting_untracked_message_is_a_noop() {
        let h = harness(guild_config(3, false)).await;
        let outcome = h.engine.handle(delete(ORIGINAL)).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(h.platform.deleted().is_empty());
    }

    #[tokio::test]
    async fn deleting_original_removes_mirror_and_record() {
        let h = harness(guild_config(1, false)).await;
        let mirror = h.track(&[20]).await;

        h.platform.remove_message(ORIGINAL);
        let outcome = h.engine.handle(delete(ORIGINAL)).await.unwrap();
        assert_eq!(outcome, Outcome::Removed);
        assert_eq!(h.platform.deleted(), vec![mirror]);
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }

    #[tokio::test]
    async fn deleting_mirror_drops_record_only() {
        let h = harness(guild_config(1, false)).await;
        let mirror = h.track(&[20]).await;

        h.platform.remove_message(mirror);
        let outcome = h.engine.handle(delete(mirror)).await.unwrap();
        assert_eq!(outcome, Outcome::Removed);
        assert!(h.platform.deleted().is_empty());
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }

    #[tokio::test]
    async fn stale_mirror_record_is_dropped() {
        let h = harness(guild_config(1, false)).await;
        let mirror = h.track(&[20]).await;

        h.platform.remove_message(mirror);
        h.platform.set_stars(ORIGINAL, &[20, 21]);
        let outcome = h.engine.handle(add(ORIGINAL, 21)).await.unwrap();
        assert_eq!(outcome, Outcome::StaleDropped);
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }

    #[tokio::test]
    async fn platform_errors_leave_record_untouched() {
        let h = harness(guild_config(1, false)).await;
        let mirror = h.track(&[20]).await;

        h.platform.state.lock().fail_edits = true;
        h.platform.set_stars(ORIGINAL, &[20, 21]);
        let result = h.engine.handle(add(ORIGINAL, 21)).await;
        assert!(matches!(result, Err(StarboardError::Platform(_))));
        assert_eq!(h.mirror_of(ORIGINAL).await, Some(mirror));
    }

    #[tokio::test]
    async fn failed_record_write_discards_new_mirror() {
        let store = Arc::new(DatabaseManager::with_store(
            Arc::new(BrokenPairs(MemoryStore::new())),
            Duration::from_secs(5),
        ));
        let h = harness_with(store, guild_config(1, false)).await;
        h.platform.post_original(ORIGINAL, "hello");
        h.platform.set_stars(ORIGINAL, &[20]);

        let result = h.engine.handle(add(ORIGINAL, 20)).await;
        assert!(matches!(result, Err(StarboardError::Database(_))));
        assert_eq!(h.platform.created(), 1);
        assert_eq!(h.platform.deleted().len(), 1);
    }

    #[tokio::test]
    async fn selfstar_allowed_counts_raw_and_annotates() {
        let h = harness(guild_config(2, true)).await;
        let mirror = h.track(&[AUTHOR, 20]).await;
        assert_eq!(
            h.platform.footer(mirror).as_deref(),
            Some("⭐ 2 | self-starred")
        );
    }

    #[tokio::test]
    async fn ignored_channel_never_mirrors() {
        let mut guild = guild_config(1, false);
        guild.channel_settings.push(ChannelSettings {
            id: SOURCE,
            ignored: true,
            required_stars: 0,
        });
        let h = harness(guild).await;
        h.platform.post_original(ORIGINAL, "hello");
        h.platform.set_stars(ORIGINAL, &[20, 21, 22]);

        assert_eq!(
            h.engine.handle(add(ORIGINAL, 22)).await.unwrap(),
            Outcome::Ignored
        );
        assert_eq!(h.platform.created(), 0);
    }

    #[tokio::test]
    async fn nsfw_sources_go_to_nsfw_board() {
        let h = harness(guild_config(1, false)).await;
        let key = MessageKey::new(NSFW_SOURCE, 42);
        h.platform.post_original(key, "spicy");
        h.platform.set_stars(key, &[20]);

        let outcome = h.engine.handle(add(key, 20)).await.unwrap();
        assert!(matches!(outcome, Outcome::Created(m) if m.channel_id == NSFW_BOARD));
    }

    #[tokio::test]
    async fn other_emotes_and_ignored_authors_are_skipped() {
        let mut guild = guild_config(1, false);
        guild.ignored_users.push(AUTHOR);
        let h = harness(guild).await;
        h.platform.post_original(ORIGINAL, "hello");
        h.platform.set_stars(ORIGINAL, &[20]);

        let mut other = star(ORIGINAL, 20);
        other.emoji = EmojiRef::Unicode("🔥".to_string());
        assert_eq!(
            h.engine
                .handle(StarboardEvent::ReactionAdd(other))
                .await
                .unwrap(),
            Outcome::Ignored
        );
        assert_eq!(
            h.engine.handle(add(ORIGINAL, 20)).await.unwrap(),
            Outcome::Ignored
        );
        assert_eq!(h.platform.created(), 0);
    }

    #[tokio::test]
    async fn mirror_post_carries_author_line_and_text() {
        let h = harness(guild_config(1, false)).await;
        h.track(&[20]).await;

        let (channel, post) = h.platform.last_post().unwrap();
        assert_eq!(channel, BOARD);
        let embed = post.embed;
        assert_eq!(embed.author.unwrap().name, "@alice in #general");
        assert_eq!(embed.description.as_deref(), Some("hello world"));
        assert_eq!(embed.fields[0].name, "Original message");
    }

    #[tokio::test]
    async fn cancelled_waiter_aborts_before_mutating() {
        let h = Arc::new(harness(guild_config(1, false)).await);
        h.platform.post_original(ORIGINAL, "hello");
        h.platform.set_stars(ORIGINAL, &[20]);

        let held = h.engine.guard().acquire(ORIGINAL).await.unwrap();
        let pending = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.handle(add(ORIGINAL, 20)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.engine.guard().cancel(ORIGINAL);
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(StarboardError::Cancelled(_))));
        drop(held);

        assert_eq!(h.platform.created(), 0);
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }

    #[tokio::test]
    async fn delete_preempts_create_during_extraction() {
        let store = Arc::new(DatabaseManager::in_memory(Duration::from_secs(5)));
        let media = Arc::new(GatedMedia::default());
        let h = Arc::new(harness_with_media(store, guild_config(1, false), media.clone()).await);
        h.platform.post_original(ORIGINAL, "watch this");
        h.platform.attach(ORIGINAL, "https://cdn.example.com/clip.mp4");
        h.platform.set_stars(ORIGINAL, &[20]);

        let reaction = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.handle(add(ORIGINAL, 20)).await })
        };
        media.started.notified().await;

        let deletion = {
            let h = h.clone();
            tokio::spawn(async move { h.engine.handle(delete(ORIGINAL)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        media.release.notify_one();

        let result = reaction.await.unwrap();
        assert!(matches!(result, Err(StarboardError::Cancelled(_))));
        assert_eq!(deletion.await.unwrap().unwrap(), Outcome::Ignored);

        assert_eq!(h.platform.created(), 0);
        assert_eq!(h.mirror_of(ORIGINAL).await, None);
    }
}
