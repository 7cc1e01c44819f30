use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static STRICT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhttps?://[^\s<>]+").expect("valid url regex"));

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "webp", "gif"];
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mov", "gifv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Image,
    Video,
    /// A tenor.com GIF page.
    Gif,
    /// An imgur page.
    ImageHost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedUrl {
    /// The URL exactly as it appeared in the text.
    pub raw: String,
    pub url: Url,
    pub kind: UrlKind,
}

pub fn classify(raw: &str) -> Option<ClassifiedUrl> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let path = url.path().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

    let kind = if has_extension(&path, &IMAGE_EXTENSIONS) {
        UrlKind::Image
    } else if has_extension(&path, &VIDEO_EXTENSIONS) {
        UrlKind::Video
    } else if host.contains("imgur") {
        UrlKind::ImageHost
    } else if url.as_str().contains("tenor.com/view") {
        UrlKind::Gif
    } else {
        return None;
    };

    Some(ClassifiedUrl {
        raw: raw.to_string(),
        url,
        kind,
    })
}

/// Every supported URL in `content`, in order of appearance.
pub fn find_urls(content: &str) -> Vec<ClassifiedUrl> {
    STRICT_URL
        .find_iter(content)
        .map(|m| trim_trailing_punctuation(m.as_str()))
        .filter_map(classify)
        .collect()
}

pub fn first_supported(content: &str) -> Option<ClassifiedUrl> {
    find_urls(content).into_iter().next()
}

pub fn is_image(raw: &str) -> bool {
    classify(raw).is_some_and(|c| c.kind == UrlKind::Image)
}

/// `.gifv` pages are served as plain mp4 at the same path.
pub fn video_download_url(url: &str) -> String {
    match url.strip_suffix(".gifv") {
        Some(stem) => format!("{}.mp4", stem),
        None => url.to_string(),
    }
}

/// Direct image for an imgur page: the last path segment is the image id.
pub fn imgur_direct_url(url: &Url) -> Option<String> {
    let id = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    if id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(format!("https://i.imgur.com/{}.png", id))
    } else {
        None
    }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| extensions.contains(&ext))
}

fn trim_trailing_punctuation(raw: &str) -> &str {
    raw.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"', ')', ']', '*', '_', '|'])
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("https://example.com/cat.png", Some(UrlKind::Image) ; "png")]
    #[test_case("https://example.com/cat.JPEG?size=large", Some(UrlKind::Image) ; "uppercase jpeg with query")]
    #[test_case("https://example.com/a.webp", Some(UrlKind::Image) ; "webp")]
    #[test_case("https://example.com/a.gif", Some(UrlKind::Image) ; "gif file")]
    #[test_case("https://example.com/clip.mp4", Some(UrlKind::Video) ; "mp4")]
    #[test_case("https://i.imgur.com/abc.gifv", Some(UrlKind::Video) ; "gifv before host check")]
    #[test_case("https://example.com/clip.mov", Some(UrlKind::Video) ; "mov")]
    #[test_case("https://imgur.com/gallery/abc123", Some(UrlKind::ImageHost) ; "imgur page")]
    #[test_case("https://tenor.com/view/cat-dance-123", Some(UrlKind::Gif) ; "tenor view")]
    #[test_case("https://tenor.com/search/cats", None ; "tenor search")]
    #[test_case("https://example.com/page", None ; "plain page")]
    #[test_case("ftp://example.com/cat.png", None ; "non http scheme")]
    fn classifies(raw: &str, expected: Option<UrlKind>) {
        assert_eq!(classify(raw).map(|c| c.kind), expected);
    }

    #[test]
    fn finds_urls_in_order_and_skips_unsupported() {
        let found = find_urls(
            "look https://example.com/page and https://example.com/b.png, then https://x.com/c.mp4.",
        );
        let raws: Vec<&str> = found.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(raws, vec!["https://example.com/b.png", "https://x.com/c.mp4"]);
    }

    #[test]
    fn requires_scheme() {
        assert!(find_urls("example.com/cat.png www.example.com/a.gif").is_empty());
    }

    #[test]
    fn gifv_is_downloaded_as_mp4() {
        assert_eq!(
            video_download_url("https://i.imgur.com/abc.gifv"),
            "https://i.imgur.com/abc.mp4"
        );
        assert_eq!(video_download_url("https://x.com/a.webm"), "https://x.com/a.webm");
    }

    #[test]
    fn imgur_ids_come_from_last_segment() {
        let url = Url::parse("https://imgur.com/gallery/AbC123/").unwrap();
        assert_eq!(
            imgur_direct_url(&url).as_deref(),
            Some("https://i.imgur.com/AbC123.png")
        );
        let url = Url::parse("https://imgur.com/").unwrap();
        assert_eq!(imgur_direct_url(&url), None);
    }
}
