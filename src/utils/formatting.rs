use crate::platform::MessageKey;

/// Jump link to a message. Direct messages use `@me` in place of the guild.
pub fn message_link(guild_id: Option<u64>, key: MessageKey) -> String {
    let guild = guild_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "@me".to_string());
    format!(
        "https://discord.com/channels/{}/{}/{}",
        guild, key.channel_id, key.message_id
    )
}

pub fn markdown_link(label: &str, url: &str) -> String {
    format!("[{}]({})", label, url)
}

/// Continues a block quote across every line of `text`.
pub fn quote_lines(text: &str) -> String {
    text.replace('\n', "\n> ")
}

pub fn user_mention(user_id: u64) -> String {
    format!("<@{}>", user_id)
}
