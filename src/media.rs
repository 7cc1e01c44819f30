use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MediaConfig;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

impl MediaFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Anything that can turn a remote URL into an uploadable file.
///
/// `Ok(None)` means the media exists but is too large to re-upload; callers
/// fall back to linking it.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<MediaFile>, FetchError>;
}

pub struct MediaFetcher {
    client: Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(config: &MediaConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            max_bytes: config.max_upload_bytes,
        })
    }

    async fn probe_length(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        // hosts that refuse HEAD still get the capped GET
        if !response.status().is_success() {
            debug!(
                "HEAD {} returned {}, length unknown",
                url,
                response.status().as_u16()
            );
            return Ok(None);
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok()))
    }
}

#[async_trait]
impl MediaSource for MediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<MediaFile>, FetchError> {
        let declared = self.probe_length(url).await?;
        if !within_ceiling(declared, self.max_bytes) {
            debug!(
                "refusing to download {}: declared {:?} bytes (max {})",
                url, declared, self.max_bytes
            );
            return Ok(None);
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let raw_content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
            data.extend_from_slice(&chunk);
            if data.len() as u64 >= self.max_bytes {
                warn!(
                    "body of {} exceeded {} bytes without declaring it, dropping",
                    url, self.max_bytes
                );
                return Ok(None);
            }
        }

        let filename = filename_from_url(url).unwrap_or_else(|| "attachment".to_string());
        let content_type = normalize_content_type(raw_content_type.as_deref(), &filename, &data);
        let filename = ensure_filename_extension(&filename, &content_type);

        debug!("downloaded {} bytes from {}", data.len(), url);

        Ok(Some(MediaFile {
            data,
            content_type,
            filename,
        }))
    }
}

fn request_error(url: &str, e: reqwest::Error) -> FetchError {
    FetchError::Request {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Unknown lengths are let through; the streamed body is capped separately.
fn within_ceiling(declared: Option<u64>, max_bytes: u64) -> bool {
    declared.is_none_or(|len| len < max_bytes)
}

pub fn filename_from_url(url: &str) -> Option<String> {
    if let Ok(parsed) = reqwest::Url::parse(url)
        && let Some(segment) = parsed.path_segments().and_then(|mut s| s.next_back())
        && let Some(name) = sanitize_filename(segment)
    {
        return Some(name);
    }

    let without_query = url.split('?').next().unwrap_or(url);
    let tail = without_query.rsplit('/').next().unwrap_or(without_query);
    sanitize_filename(tail)
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let basename = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let basename = basename.trim();
    if basename.is_empty() {
        return None;
    }

    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn normalize_content_type(header_value: Option<&str>, filename: &str, data: &[u8]) -> String {
    let header_value = header_value
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or("application/octet-stream");

    if !header_value.is_empty() && header_value != "application/octet-stream" {
        return header_value.to_string();
    }

    guess_mime_from_filename(filename)
        .or_else(|| sniff_mime(data))
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn ensure_filename_extension(filename: &str, content_type: &str) -> String {
    if Path::new(filename).extension().is_some() {
        return filename.to_string();
    }

    if let Some(ext) = extension_from_mime(content_type) {
        return format!("{}.{}", filename, ext);
    }

    filename.to_string()
}

fn guess_mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    extension_to_mime(&ext)
}

fn extension_to_mime(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" => Some("video/quicktime"),
        _ => None,
    }
}

fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        _ => None,
    }
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if data.len() >= 3 && data[..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    if data.len() >= 6 && (&data[..6] == b"GIF87a" || &data[..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    None
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn http_response(status: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
        for (name, value) in headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        let mut out = out.into_bytes();
        out.extend_from_slice(body);
        out
    }

    /// One-response-per-connection HTTP server. Returns its address and a GET counter.
    async fn serve<F>(respond: F) -> (SocketAddr, Arc<AtomicUsize>)
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gets = Arc::new(AtomicUsize::new(0));
        let counter = gets.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let method = request.split_whitespace().next().unwrap_or_default();
                if method == "GET" {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                let _ = socket.write_all(&respond(method)).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, gets)
    }

    fn fetcher(max_upload_bytes: u64) -> MediaFetcher {
        MediaFetcher::new(&MediaConfig {
            max_upload_bytes,
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn refused_head_falls_through_to_get() {
        let (addr, gets) = serve(|method| match method {
            "HEAD" => http_response("405 Method Not Allowed", &[], b""),
            _ => http_response(
                "200 OK",
                &[
                    ("Content-Type", "video/mp4".to_string()),
                    ("Content-Length", "3".to_string()),
                ],
                b"abc",
            ),
        })
        .await;

        let file = fetcher(DEFAULT_MAX_UPLOAD_BYTES)
            .fetch(&format!("http://{}/media/clip.mp4?ex=1", addr))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.data, b"abc");
        assert_eq!(file.filename, "clip.mp4");
        assert_eq!(file.content_type, "video/mp4");
        assert_eq!(gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declared_oversize_is_refused_without_download() {
        let (addr, gets) = serve(|_| {
            http_response(
                "200 OK",
                &[("Content-Length", DEFAULT_MAX_UPLOAD_BYTES.to_string())],
                b"",
            )
        })
        .await;

        let result = fetcher(DEFAULT_MAX_UPLOAD_BYTES)
            .fetch(&format!("http://{}/big.mp4", addr))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undeclared_oversize_body_is_capped() {
        let (addr, gets) = serve(|method| match method {
            "HEAD" => http_response("200 OK", &[], b""),
            _ => http_response("200 OK", &[], &[7u8; 64]),
        })
        .await;

        let result = fetcher(16)
            .fetch(&format!("http://{}/stream.webm", addr))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sniffs_type_and_extension_from_body() {
        let (addr, _) = serve(|method| {
            let mut body = PNG_MAGIC.to_vec();
            body.extend_from_slice(&[0, 0, 0]);
            let headers = [
                ("Content-Type", "application/octet-stream".to_string()),
                ("Content-Length", body.len().to_string()),
            ];
            match method {
                "HEAD" => http_response("200 OK", &headers, b""),
                _ => http_response("200 OK", &headers, &body),
            }
        })
        .await;

        let file = fetcher(1024)
            .fetch(&format!("http://{}/download", addr))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.filename, "download.png");
        assert_eq!(file.size(), 11);
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = fetcher(1024)
            .fetch(&format!("http://{}/gone.png", addr))
            .await;
        assert!(matches!(result, Err(FetchError::Request { .. })));
    }

    #[test]
    fn strips_query_from_url_filename() {
        let url = "https://cdn.discordapp.com/attachments/1/2/clip.mp4?ex=abc&is=def";
        assert_eq!(filename_from_url(url).unwrap(), "clip.mp4");
    }

    #[test]
    fn filename_falls_back_for_unparseable_urls() {
        assert_eq!(filename_from_url("not a url/clip.webm").unwrap(), "clip.webm");
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn ceiling_is_exclusive() {
        assert!(within_ceiling(Some(DEFAULT_MAX_UPLOAD_BYTES - 1), DEFAULT_MAX_UPLOAD_BYTES));
        assert!(!within_ceiling(Some(DEFAULT_MAX_UPLOAD_BYTES), DEFAULT_MAX_UPLOAD_BYTES));
        assert!(within_ceiling(None, DEFAULT_MAX_UPLOAD_BYTES));
    }

    #[test]
    fn infers_png_type_and_extension_when_header_is_octet_stream() {
        let mut body = PNG_MAGIC.to_vec();
        body.extend_from_slice(&[0, 0, 0]);
        let content_type =
            normalize_content_type(Some("application/octet-stream"), "attachment", &body);
        assert_eq!(content_type, "image/png");

        let filename = ensure_filename_extension("attachment", &content_type);
        assert_eq!(filename, "attachment.png");
    }

    #[test]
    fn header_content_type_wins_when_specific() {
        let content_type = normalize_content_type(Some("video/mp4; codecs=avc1"), "clip", &[]);
        assert_eq!(content_type, "video/mp4");
    }
}
