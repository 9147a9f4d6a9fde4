//! Screenshot normalization into a single attachable file.
//!
//! Sources arrive as a local path, a base64 string, a data URI, a remote URL,
//! or a JSON-stringified wrapper around any of those. Resolution order is
//! local path, inline data, remote URL; anything else yields no attachment.
//! A file the pipeline writes is owned by the returned
//! [`PreparedAttachment`] and removed exactly once, either by an explicit
//! [`PreparedAttachment::cleanup`] or on drop. Caller files are never touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::content::slugify;
use crate::context::WorkItemContext;

/// Keys checked, in order, when a source is a JSON object wrapper.
const WRAPPER_KEYS: [&str; 8] = [
    "screenshot",
    "imagePath",
    "path",
    "dataUri",
    "data",
    "base64",
    "url",
    "src",
];

/// Raw base64 shorter than this is not considered image data.
const MIN_RAW_BASE64_LEN: usize = 32;

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads larger than this are rejected.
pub const MAX_DOWNLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Captures a screenshot when the context carries none.
///
/// Returns a source in any of the accepted shapes, or `None` when nothing
/// could be captured.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn capture(&self, context: &WorkItemContext) -> anyhow::Result<Option<String>>;
}

/// A file ready for upload.
#[derive(Debug)]
pub struct PreparedAttachment {
    path: PathBuf,
    filename: String,
    content_type: String,
    owned: bool,
    cleaned: bool,
}

impl PreparedAttachment {
    /// Wrap a caller-owned file; cleanup leaves it in place.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot.png".into());
        let content_type = content_type_for(extension_of(&filename)).to_string();
        Self {
            path,
            filename,
            content_type,
            owned: false,
            cleaned: false,
        }
    }

    fn owned(path: PathBuf, filename: String, content_type: String) -> Self {
        Self {
            path,
            filename,
            content_type,
            owned: true,
            cleaned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the file is uploaded and embedded under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Whether the pipeline created (and will delete) the file.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Remove an owned temp file. Idempotent; returns true only on the call
    /// that actually removed it.
    pub fn cleanup(&mut self) -> bool {
        if self.cleaned {
            return false;
        }
        self.cleaned = true;
        if !self.owned {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed attachment temp file");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove attachment temp file");
                false
            }
        }
    }
}

impl Drop for PreparedAttachment {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Turns an image source into a [`PreparedAttachment`].
pub struct AttachmentPipeline {
    http: reqwest::Client,
    temp_dir: PathBuf,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    max_download_bytes: usize,
}

impl Default for AttachmentPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentPipeline {
    pub fn new() -> Self {
        Self {
            http: download_client(DEFAULT_DOWNLOAD_TIMEOUT),
            temp_dir: std::env::temp_dir(),
            screenshots: None,
            max_download_bytes: MAX_DOWNLOAD_BYTES,
        }
    }

    /// Per-request timeout for remote screenshot downloads.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = download_client(timeout);
        self
    }

    pub fn with_max_download_bytes(mut self, limit: usize) -> Self {
        self.max_download_bytes = limit;
        self
    }

    /// Write temp files under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_screenshot_source(mut self, source: Arc<dyn ScreenshotSource>) -> Self {
        self.screenshots = Some(source);
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Prepare the context's image, capturing one if the context has none.
    pub async fn prepare(&self, context: &WorkItemContext) -> Option<PreparedAttachment> {
        let source = match context.image_source() {
            Some(source) => source.to_string(),
            None => self.capture(context).await?,
        };
        self.resolve(&source, context.display_name()).await
    }

    async fn capture(&self, context: &WorkItemContext) -> Option<String> {
        let screenshots = self.screenshots.as_ref()?;
        match screenshots.capture(context).await {
            Ok(Some(source)) if !source.trim().is_empty() => Some(source),
            Ok(_) => None,
            Err(e) => {
                warn!(component = context.display_name(), error = %e, "Screenshot capture failed");
                None
            }
        }
    }

    /// Resolve a single source. Unusable sources yield `None`.
    pub async fn resolve(&self, source: &str, name: &str) -> Option<PreparedAttachment> {
        let source = unwrap_wrapper(source)?;
        let stem = match slugify(name) {
            s if s.is_empty() => "component".to_string(),
            s => s,
        };

        if !is_remote(&source) && !source.starts_with("data:") {
            let path = Path::new(&source);
            if path.is_file() {
                debug!(path = %path.display(), "Using local screenshot file");
                return Some(PreparedAttachment::borrowed(path));
            }
        }

        if let Some((bytes, ext)) = decode_inline(&source) {
            return self.write_temp(&stem, ext, &bytes).await;
        }

        if is_remote(&source) {
            return match self.download(&source).await {
                Ok((bytes, ext)) => self.write_temp(&stem, ext, &bytes).await,
                Err(e) => {
                    warn!(url = %source, error = %e, "Screenshot download failed");
                    None
                }
            };
        }

        info!(
            source = %source_preview(&source),
            "Screenshot source not recognized, continuing without attachment"
        );
        None
    }

    async fn download(&self, url: &str) -> anyhow::Result<(Vec<u8>, &'static str)> {
        let limit = self.max_download_bytes;
        let mut response = self.http.get(url).send().await?.error_for_status()?;
        if let Some(len) = response.content_length() {
            anyhow::ensure!(len <= limit as u64, "screenshot is {len} bytes, limit is {limit}");
        }
        let from_header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_mime);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            anyhow::ensure!(
                bytes.len() + chunk.len() <= limit,
                "screenshot exceeds the {limit} byte limit"
            );
            bytes.extend_from_slice(&chunk);
        }
        let ext = from_header
            .or_else(|| sniff_image(&bytes))
            .or_else(|| known_extension(url))
            .unwrap_or("png");
        Ok((bytes, ext))
    }

    async fn write_temp(&self, stem: &str, ext: &str, bytes: &[u8]) -> Option<PreparedAttachment> {
        let filename = format!("{stem}-screenshot.{ext}");
        let path = self
            .temp_dir
            .join(format!("artifact-sync-{}-{filename}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            warn!(path = %path.display(), error = %e, "Failed to write screenshot temp file");
            return None;
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote screenshot temp file");
        Some(PreparedAttachment::owned(
            path,
            filename,
            content_type_for(ext).to_string(),
        ))
    }
}

/// Peel JSON wrappers (`"\"...\""`, `{"screenshot": ...}`) down to a plain
/// source string.
fn unwrap_wrapper(source: &str) -> Option<String> {
    let mut current = source.trim().to_string();
    // Bounded: each pass strips one layer.
    for _ in 0..4 {
        if !(current.starts_with('{') || current.starts_with('"')) {
            break;
        }
        let Ok(value) = serde_json::from_str::<Value>(&current) else {
            break;
        };
        current = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Object(map) => WRAPPER_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())?,
            _ => return None,
        };
    }
    (!current.is_empty()).then_some(current)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Decode a data URI or raw base64 image.
fn decode_inline(source: &str) -> Option<(Vec<u8>, &'static str)> {
    let engine = base64::engine::general_purpose::STANDARD;

    if let Some(rest) = source.strip_prefix("data:") {
        let (meta, payload) = rest.split_once(',')?;
        if !meta.ends_with(";base64") {
            return None;
        }
        let mime = meta.trim_end_matches(";base64");
        let bytes = engine.decode(strip_whitespace(payload)).ok()?;
        let ext = extension_for_mime(mime)
            .or_else(|| sniff_image(&bytes))
            .unwrap_or("png");
        return Some((bytes, ext));
    }

    let compact = strip_whitespace(source);
    if compact.len() < MIN_RAW_BASE64_LEN
        || !compact
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    {
        return None;
    }
    let bytes = engine.decode(compact).ok()?;
    // Raw base64 carries no type; only accept recognizable images.
    let ext = sniff_image(&bytes)?;
    Some((bytes, ext))
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

fn extension_of(filename: &str) -> &str {
    filename.rsplit_once('.').map_or("", |(_, ext)| ext)
}

fn known_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match extension_of(path).to_ascii_lowercase().as_str() {
        "png" => Some("png"),
        "jpg" | "jpeg" => Some("jpg"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        "svg" => Some("svg"),
        _ => None,
    }
}

fn content_type_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn download_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn source_preview(source: &str) -> String {
    let mut preview: String = source.chars().take(60).collect();
    if source.chars().count() > 60 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn pipeline(dir: &tempfile::TempDir) -> AttachmentPipeline {
        AttachmentPipeline::new().with_temp_dir(dir.path())
    }

    fn files_in(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_data_uri_written_and_cleaned_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = format!("data:image/png;base64,{PNG_B64}");
        let mut att = pipeline(&dir).resolve(&source, "LoginButton").await.unwrap();

        assert!(att.is_owned());
        assert!(att.path().exists());
        assert_eq!(att.filename(), "login-button-screenshot.png");
        assert_eq!(att.content_type(), "image/png");
        assert!(att.read().await.unwrap().starts_with(b"\x89PNG"));

        assert!(att.cleanup());
        assert!(!att.path().exists());
        assert!(!att.cleanup());
        drop(att);
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_owned_file() {
        let dir = tempfile::tempdir().unwrap();
        let att = pipeline(&dir).resolve(PNG_B64, "Card").await.unwrap();
        assert_eq!(files_in(&dir), 1);
        drop(att);
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_local_path_is_borrowed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shot.jpg");
        std::fs::write(&file, b"\xff\xd8\xff\xe0").unwrap();

        let mut att = pipeline(&dir)
            .resolve(file.to_str().unwrap(), "Card")
            .await
            .unwrap();
        assert!(!att.is_owned());
        assert_eq!(att.filename(), "shot.jpg");
        assert_eq!(att.content_type(), "image/jpeg");
        assert!(!att.cleanup());
        drop(att);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_json_wrappers() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir);

        let wrapped = serde_json::json!({"screenshot": format!("data:image/png;base64,{PNG_B64}")})
            .to_string();
        assert!(p.resolve(&wrapped, "A").await.is_some());

        let stringified = serde_json::to_string(&wrapped).unwrap();
        assert!(p.resolve(&stringified, "A").await.is_some());
    }

    #[tokio::test]
    async fn test_remote_url_downloaded() {
        let server = MockServer::start().await;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(PNG_B64)
            .unwrap();
        Mock::given(method("GET"))
            .and(path("/shot"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(bytes),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let att = pipeline(&dir)
            .resolve(&format!("{}/shot", server.uri()), "Hero Banner")
            .await
            .unwrap();
        assert!(att.is_owned());
        assert_eq!(att.filename(), "hero-banner-screenshot.png");
    }

    #[tokio::test]
    async fn test_failed_download_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        assert!(pipeline(&dir)
            .resolve(&format!("{}/missing.png", server.uri()), "X")
            .await
            .is_none());
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_oversized_download_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0u8; 4096]),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let att = pipeline(&dir)
            .with_max_download_bytes(1024)
            .resolve(&format!("{}/huge.png", server.uri()), "X")
            .await;
        assert!(att.is_none());
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let att = pipeline(&dir)
            .with_timeout(Duration::from_millis(200))
            .resolve(&format!("{}/slow.png", server.uri()), "X")
            .await;
        assert!(att.is_none());
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_sources_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir);
        assert!(p.resolve("not an image", "X").await.is_none());
        assert!(p.resolve("/no/such/file.png", "X").await.is_none());
        assert!(p.resolve("{\"other\": 1}", "X").await.is_none());
        assert!(p.resolve("data:text/plain,hello", "X").await.is_none());
    }

    struct FixedCapture(Option<String>);

    #[async_trait]
    impl ScreenshotSource for FixedCapture {
        async fn capture(&self, _context: &WorkItemContext) -> anyhow::Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_capture_used_when_context_has_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WorkItemContext::new("Nav");

        assert!(pipeline(&dir).prepare(&ctx).await.is_none());

        let with_capture = pipeline(&dir)
            .with_screenshot_source(Arc::new(FixedCapture(Some(PNG_B64.to_string()))));
        let att = with_capture.prepare(&ctx).await.unwrap();
        assert_eq!(att.filename(), "nav-screenshot.png");
    }
}
