use crate::platform::{EmojiRef, MessageKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub guild_id: u64,
    pub key: MessageKey,
    pub emoji: EmojiRef,
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEvent {
    pub guild_id: u64,
    pub key: MessageKey,
}

/// Every gateway signal the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StarboardEvent {
    ReactionAdd(ReactionEvent),
    ReactionRemove(ReactionEvent),
    MessageDelete(DeleteEvent),
}

impl StarboardEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            StarboardEvent::ReactionAdd(e) | StarboardEvent::ReactionRemove(e) => e.guild_id,
            StarboardEvent::MessageDelete(e) => e.guild_id,
        }
    }

    pub fn key(&self) -> MessageKey {
        match self {
            StarboardEvent::ReactionAdd(e) | StarboardEvent::ReactionRemove(e) => e.key,
            StarboardEvent::MessageDelete(e) => e.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StarboardEvent::ReactionAdd(_) => "reaction_add",
            StarboardEvent::ReactionRemove(_) => "reaction_remove",
            StarboardEvent::MessageDelete(_) => "message_delete",
        }
    }
}

/// The star reaction on an original message at the time of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionState {
    pub count: u32,
    /// The original author is among the reactors.
    pub self_starred: bool,
}

impl ReactionState {
    pub fn adjusted(&self, selfstar_allowed: bool) -> u32 {
        if self.self_starred && !selfstar_allowed {
            self.count.saturating_sub(1)
        } else {
            self.count
        }
    }

    pub fn annotate_self_star(&self, selfstar_allowed: bool) -> bool {
        self.self_starred && selfstar_allowed
    }
}
