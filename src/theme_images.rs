use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::bili::BiliClient;
use crate::cache::write_atomic;
use crate::error::{Error, Result};
use crate::server::ProxyUrls;
use crate::utils::is_http_url;

/// Largest accepted image, in bytes.
pub const MAX_IMAGE_BYTES: usize = 20 << 20;

/// Extensions a stored theme image can carry (without the dot).
pub const EXTENSIONS: &[&str] = &["png", "jpg", "gif", "webp", "svg", "bmp", "ico", "avif"];

const DEFAULT_EXTENSION: &str = ".jpg";

/// Content type → file extension.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/pjpeg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/bmp", ".bmp"),
    ("image/x-icon", ".ico"),
    ("image/vnd.microsoft.icon", ".ico"),
    ("image/avif", ".avif"),
];

/// Essence of a content type header, e.g. `image/png` from
/// `Image/PNG; charset=binary`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn extension_for(content_type: &str, data: &[u8]) -> &'static str {
    let mut ct = essence(content_type);
    if ct.is_empty() {
        ct = sniff_content_type(data).unwrap_or_default().to_string();
    }
    if let Some((_, ext)) = IMAGE_TYPES.iter().find(|(mime, _)| *mime == ct) {
        return *ext;
    }
    if ct.contains("png") {
        ".png"
    } else if ct.contains("webp") {
        ".webp"
    } else if ct.contains("gif") {
        ".gif"
    } else {
        DEFAULT_EXTENSION
    }
}

/// Content type served for a stored file name.
pub fn content_type_for_file(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => "image/jpeg",
    }
}

/// Guess an image type from magic bytes.
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"BM") {
        return Some("image/bmp");
    }
    if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some("image/x-icon");
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"avif" {
        return Some("image/avif");
    }
    let head = String::from_utf8_lossy(&data[..data.len().min(256)]).to_ascii_lowercase();
    if head.trim_start().starts_with("<svg") || (head.contains("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

/// Split `data:image/<x>;base64,<payload>` into its mime type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| Error::Validation("not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::Validation("data URL has no payload".to_string()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| Error::Validation("data URL must be base64 encoded".to_string()))?;
    if !mime.starts_with("image/") {
        return Err(Error::Validation(format!("not an image type: {mime}")));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Validation(format!("invalid base64 payload: {e}")))?;
    Ok((mime.to_string(), bytes))
}

/// Content-addressed storage for user-supplied theme images.
#[derive(Debug, Clone)]
pub struct ThemeImageStore {
    client: BiliClient,
    dir: PathBuf,
    urls: ProxyUrls,
}

impl ThemeImageStore {
    pub fn new(client: BiliClient, dir: impl Into<PathBuf>, urls: ProxyUrls) -> Self {
        Self {
            client,
            dir: dir.into(),
            urls,
        }
    }

    /// Store an inline image and return its proxy URL.
    pub async fn save_from_data_url(&self, data_url: &str) -> Result<String> {
        if data_url.trim().is_empty() {
            return Err(Error::Validation("data URL is empty".to_string()));
        }
        let (mime, bytes) = decode_data_url(data_url)?;
        self.store(&bytes, &mime).await
    }

    /// Download a remote image and return its proxy URL.
    pub async fn save_from_url(&self, image_url: &str) -> Result<String> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(Error::Validation("image URL is empty".to_string()));
        }
        if !is_http_url(image_url) {
            return Err(Error::Validation("unsupported URL scheme".to_string()));
        }

        let resp = self
            .client
            .plain_get(image_url)
            .header(ACCEPT, "image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8")
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }
        if resp
            .content_length()
            .is_some_and(|len| len > MAX_IMAGE_BYTES as u64)
        {
            return Err(Error::Validation(format!(
                "image exceeds {MAX_IMAGE_BYTES} bytes"
            )));
        }
        let declared = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();

        let mut data = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Err(Error::Validation(format!(
                    "image exceeds {MAX_IMAGE_BYTES} bytes"
                )));
            }
            data.extend_from_slice(&chunk);
        }

        let content_type = if declared.trim().is_empty() {
            sniff_content_type(&data).unwrap_or_default().to_string()
        } else {
            declared
        };
        if !essence(&content_type).starts_with("image/") {
            return Err(Error::Validation(format!(
                "invalid content type: {content_type:?}"
            )));
        }
        self.store(&data, &content_type).await
    }

    async fn store(&self, data: &[u8], content_type: &str) -> Result<String> {
        if data.is_empty() {
            return Err(Error::Validation("image data is empty".to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(Error::Validation(format!(
                "image exceeds {MAX_IMAGE_BYTES} bytes"
            )));
        }

        let file_name = format!(
            "{:x}{}",
            Sha256::digest(data),
            extension_for(content_type, data)
        );
        let path = self.dir.join(&file_name);

        if tokio::fs::try_exists(&path).await? {
            debug!(%file_name, "theme image already stored");
            return Ok(self.urls.theme_image_url(&file_name));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, data).await?;
        info!(%file_name, bytes = data.len(), "stored theme image");
        Ok(self.urls.theme_image_url(&file_name))
    }
}
