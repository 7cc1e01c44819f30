use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::gif::{GifError, GifResolver};
use crate::media::{FetchError, MediaFile, MediaSource};
use crate::platform::{Attachment, Embed, EmbedField, Message};
use crate::starboard::url::{self, ClassifiedUrl, UrlKind};
use crate::utils::formatting::{markdown_link, quote_lines};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Gif(#[from] GifError),
}

/// The single visual a mirror carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visual {
    Upload(MediaFile),
    Image(String),
    /// Media that exists but could not be re-uploaded.
    Link(String),
}

/// Rewrites the original text once the visual has been chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TextTransform {
    #[default]
    Keep,
    /// Drops the first occurrence of a link that is now shown as the visual.
    StripLink(String),
    /// Appends a quoted embed description under its heading.
    QuoteEmbed {
        heading: Option<String>,
        description: String,
    },
}

impl TextTransform {
    pub fn apply(&self, content: &str) -> String {
        match self {
            TextTransform::Keep => content.to_string(),
            TextTransform::StripLink(link) => content.replacen(link.as_str(), "", 1),
            TextTransform::QuoteEmbed {
                heading,
                description,
            } => {
                let mut out = String::from(content);
                out.push_str("\n\n");
                if let Some(heading) = heading {
                    out.push_str("> ");
                    out.push_str(heading);
                }
                out.push_str("\n> \n> ");
                out.push_str(&quote_lines(description));
                out
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub visual: Option<Visual>,
    pub fields: Vec<EmbedField>,
    pub transform: TextTransform,
}

impl Extraction {
    fn link_field(&mut self, name: impl Into<String>, url: &str) {
        self.fields.push(EmbedField {
            name: name.into(),
            value: markdown_link("Click here", url),
            inline: true,
        });
    }
}

/// Picks the mirror's visual from a message in priority order: sticker,
/// attachments, the first supported link, then the first platform embed.
pub struct ContentExtractor {
    media: Arc<dyn MediaSource>,
    gifs: Arc<dyn GifResolver>,
}

impl ContentExtractor {
    pub fn new(media: Arc<dyn MediaSource>, gifs: Arc<dyn GifResolver>) -> Self {
        Self { media, gifs }
    }

    /// Forwarded messages are extracted from their inner snapshot.
    pub async fn extract(&self, message: &Message) -> Result<Extraction, ExtractError> {
        let source = message
            .forwarded
            .as_ref()
            .map(|f| f.message.as_ref())
            .unwrap_or(message);

        let mut out = Extraction::default();

        let sticker_locked = match source.stickers.first() {
            Some(sticker) => {
                out.visual = Some(Visual::Image(sticker.cdn_url()));
                true
            }
            None => false,
        };

        if !source.attachments.is_empty() {
            self.from_attachments(&source.attachments, sticker_locked, &mut out)
                .await?;
            return Ok(out);
        }

        if sticker_locked {
            return Ok(out);
        }

        if let Some(found) = url::first_supported(&source.content) {
            self.from_url(source, found, &mut out).await?;
            return Ok(out);
        }

        if let Some(embed) = source.embeds.first() {
            from_embed(embed, &mut out);
        }

        Ok(out)
    }

    async fn from_attachments(
        &self,
        attachments: &[Attachment],
        sticker_locked: bool,
        out: &mut Extraction,
    ) -> Result<(), ExtractError> {
        let Some((first, rest)) = attachments.split_first() else {
            return Ok(());
        };

        if sticker_locked {
            out.link_field("Attachment", &first.url);
        } else if url::is_image(&first.url) {
            out.visual = Some(Visual::Image(first.url.clone()));
        } else {
            out.visual = Some(match self.media.fetch(&first.url).await? {
                Some(file) => Visual::Upload(file),
                None => {
                    debug!("attachment {} too large to reupload", first.filename);
                    Visual::Link(first.url.clone())
                }
            });
        }

        for (ind, attachment) in rest.iter().enumerate() {
            out.link_field(format!("Attachment {}", ind + 2), &attachment.url);
        }

        Ok(())
    }

    async fn from_url(
        &self,
        message: &Message,
        found: ClassifiedUrl,
        out: &mut Extraction,
    ) -> Result<(), ExtractError> {
        match found.kind {
            UrlKind::Image => {
                out.visual = Some(Visual::Image(found.raw.clone()));
                out.transform = TextTransform::StripLink(found.raw);
            }
            UrlKind::Video => {
                let download = url::video_download_url(&found.raw);
                match self.media.fetch(&download).await? {
                    Some(file) => {
                        out.visual = Some(Visual::Upload(file));
                        out.transform = TextTransform::StripLink(found.raw);
                    }
                    None => {
                        debug!("video {} too large to reupload", download);
                        out.visual = Some(Visual::Link(download));
                    }
                }
            }
            UrlKind::Gif => {
                if let Some(gif) = self.gifs.resolve(&found.raw).await? {
                    out.visual = Some(Visual::Image(gif));
                    out.transform = TextTransform::StripLink(found.raw);
                }
            }
            UrlKind::ImageHost => {
                let thumbnail = message
                    .embeds
                    .first()
                    .and_then(|e| e.thumbnail.as_ref())
                    .map(|t| t.best_url().to_string());
                if let Some(image) = thumbnail.or_else(|| url::imgur_direct_url(&found.url)) {
                    out.visual = Some(Visual::Image(image));
                    out.transform = TextTransform::StripLink(found.raw);
                }
            }
        }
        Ok(())
    }
}

fn from_embed(embed: &Embed, out: &mut Extraction) {
    let image = embed
        .thumbnail
        .as_ref()
        .map(|t| t.best_url().to_string())
        .or_else(|| embed.image.as_ref().map(|i| i.url.clone()));
    if let Some(image) = image {
        out.visual = Some(Visual::Image(image));
    }

    if let Some(video) = &embed.video {
        out.link_field("Embedded video", &video.url);
    }

    if let Some(description) = embed.description.as_deref().filter(|d| !d.is_empty()) {
        let heading = embed
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| embed.author.as_ref().map(|a| a.name.clone()));
        out.transform = TextTransform::QuoteEmbed {
            heading,
            description: description.to_string(),
        };
    }
}
