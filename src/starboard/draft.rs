use chrono::{DateTime, Utc};

use crate::media::MediaFile;
use crate::platform::{
    Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia, EmojiRef, Message, OutgoingPost,
};
use crate::starboard::content::{Extraction, Visual};
use crate::utils::formatting::{markdown_link, message_link, quote_lines, user_mention};

const MAX_DESCRIPTION_CHARS: usize = 4096;
const SELF_STARRED_SUFFIX: &str = " | self-starred";

/// An immutable mirror post. Every builder step returns a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    embed: Embed,
    file: Option<MediaFile>,
}

impl PostDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(
        mut self,
        name: impl Into<String>,
        url: Option<String>,
        icon_url: Option<String>,
    ) -> Self {
        self.embed.author = Some(EmbedAuthor {
            name: name.into(),
            url,
            icon_url,
        });
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description: String = description.into();
        self.embed.description = if description.is_empty() {
            None
        } else {
            Some(truncate_chars(&description, MAX_DESCRIPTION_CHARS))
        };
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.embed.color = Some(color);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.embed.timestamp = Some(timestamp);
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        inline: bool,
    ) -> Self {
        self.embed.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = EmbedField>) -> Self {
        self.embed.fields.extend(fields);
        self
    }

    pub fn footer(mut self, footer: EmbedFooter) -> Self {
        self.embed.footer = Some(footer);
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.embed.image = Some(EmbedMedia {
            url: url.into(),
            proxy_url: None,
        });
        self
    }

    pub fn attach(mut self, file: MediaFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Places the extracted visual: an image URL, an uploaded file, or a link field.
    pub fn visual(self, visual: Option<Visual>) -> Self {
        match visual {
            Some(Visual::Image(url)) => self.image(url),
            Some(Visual::Upload(file)) => self.attach(file),
            Some(Visual::Link(url)) => {
                self.field("Attachment", markdown_link("Click here", &url), true)
            }
            None => self,
        }
    }

    pub fn embed(&self) -> &Embed {
        &self.embed
    }

    pub fn into_post(self) -> OutgoingPost {
        OutgoingPost {
            embed: self.embed,
            file: self.file,
        }
    }
}

/// Footer showing the star count. Custom emotes render as an icon next to
/// the bare number; unicode emotes are written inline.
pub fn star_footer(count: u32, emote: &EmojiRef, annotate_self_star: bool) -> EmbedFooter {
    let (mut text, icon_url) = match emote {
        EmojiRef::Custom { .. } => (count.to_string(), emote.cdn_url()),
        EmojiRef::Unicode(glyph) => (format!("{} {}", glyph, count), None),
    };
    if annotate_self_star {
        text.push_str(SELF_STARRED_SUFFIX);
    }
    EmbedFooter { text, icon_url }
}

/// Everything besides the extracted content that goes into a new mirror.
pub struct MirrorHeader<'a> {
    pub message: &'a Message,
    pub channel_name: &'a str,
    pub color: u32,
    pub footer: EmbedFooter,
}

pub fn compose(header: MirrorHeader<'_>, extraction: Extraction) -> PostDraft {
    let message = header.message;
    let link = message_link(message.guild_id, message.key);

    let source = message
        .forwarded
        .as_ref()
        .map(|f| f.message.as_ref())
        .unwrap_or(message);
    let mut content = extraction.transform.apply(&source.content);

    let mut draft = PostDraft::new()
        .author(
            format!("@{} in #{}", message.author.username, header.channel_name),
            Some(link.clone()),
            message.author.avatar_url.clone(),
        )
        .color(header.color)
        .timestamp(message.timestamp)
        .field("Original message", markdown_link("Click here", &link), true)
        .footer(header.footer)
        .visual(extraction.visual)
        .fields(extraction.fields);

    if let Some(forwarded) = &message.forwarded {
        let target = match forwarded.source {
            Some(source) => message_link(forwarded.source_guild_id, source),
            None => link.clone(),
        };
        draft = draft.field("Forwarded message", markdown_link("Click here", &target), false);
    }

    if let Some(reply) = &message.reply {
        content.push_str("\n\n> Replying to ");
        content.push_str(&user_mention(reply.author_id));
        if reply.content.is_empty() {
            let target = message_link(reply.guild_id, reply.key);
            draft = draft.field("Reply to", markdown_link("Click here", &target), false);
        } else {
            content.push_str("\n> \n> ");
            content.push_str(&quote_lines(&reply.content));
        }
    }

    draft.description(content)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
