//! Turns a video id into a signed, time-limited audio URL.
//!
//! Signed CDN links carry their expiry in one of several query parameters.
//! When none parses, the link is assumed to live for two hours, which is
//! shorter than anything the platform hands out.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bili::BiliClient;
use crate::error::{Error, Result};
use crate::server::ProxyUrls;
use crate::utils::extract_bvid;

/// Query parameters that may carry the expiry, checked in order.
pub const EXPIRY_PARAMS: [&str; 5] = ["expire", "expires", "deadline", "e", "validtime"];

/// Values above this are millisecond timestamps.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const FALLBACK_TTL_HOURS: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLink {
    pub raw_url: String,
    pub expires_at: DateTime<Utc>,
    pub proxy_url: String,
    /// Title of the selected page.
    pub title: String,
    /// Seconds.
    pub duration: i64,
}

/// A resolved link enriched with video metadata for display.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAudio {
    pub bvid: String,
    pub raw_url: String,
    pub proxy_url: String,
    pub expires_at: DateTime<Utc>,
    pub title: String,
    pub cover: String,
    pub author: String,
    pub duration: i64,
    pub format: String,
}

/// Expiry of a signed URL, relative to the current time.
pub fn derive_expiry(raw_url: &str) -> DateTime<Utc> {
    derive_expiry_at(raw_url, Utc::now())
}

pub fn derive_expiry_at(raw_url: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now + Duration::hours(FALLBACK_TTL_HOURS);
    let Ok(url) = reqwest::Url::parse(raw_url) else {
        return fallback;
    };

    for key in EXPIRY_PARAMS {
        // First occurrence only.
        let Some(value) = url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
        else {
            continue;
        };
        let Ok(mut ts) = value.trim().parse::<i64>() else {
            continue;
        };
        if ts > MILLIS_THRESHOLD {
            ts /= 1000;
        }
        if ts > 0 {
            if let Some(at) = DateTime::<Utc>::from_timestamp(ts, 0) {
                return at;
            }
        }
    }
    fallback
}

#[derive(Debug, Clone)]
pub struct LinkResolver {
    client: BiliClient,
    urls: ProxyUrls,
}

impl LinkResolver {
    pub fn new(client: BiliClient, urls: ProxyUrls) -> Self {
        Self { client, urls }
    }

    /// Resolve page `page_index` (1-based) of `bvid`. Out-of-range indices
    /// fall back to the first page.
    pub async fn resolve(&self, bvid: &str, page_index: i64) -> Result<ResolvedLink> {
        let bvid = bvid.trim();
        if bvid.is_empty() {
            return Err(Error::Validation("content id is empty".to_string()));
        }

        let pages = self.client.pagelist(bvid).await?;
        let page = usize::try_from(page_index)
            .ok()
            .filter(|i| (1..=pages.len()).contains(i))
            .and_then(|i| pages.get(i - 1))
            .or_else(|| pages.first())
            .ok_or_else(|| Error::NotFound(format!("no pages for {bvid}")))?;

        let tracks = self.client.playurl_audio(bvid, page.cid).await?;
        let raw_url = tracks
            .first()
            .and_then(|t| t.best_url())
            .ok_or(Error::NoPlayableTrack)?
            .to_string();

        let expires_at = derive_expiry(&raw_url);
        debug!(%bvid, cid = page.cid, %expires_at, "resolved audio link");

        Ok(ResolvedLink {
            proxy_url: self.urls.audio_url(&raw_url),
            raw_url,
            expires_at,
            title: page.part.clone(),
            duration: page.duration,
        })
    }

    /// Resolve free-form input (URL, share text or bare id) to the first
    /// page's audio with metadata. Metadata failures fall back to page data.
    pub async fn resolve_audio(&self, input: &str) -> Result<ResolvedAudio> {
        let bvid = extract_bvid(input)
            .ok_or_else(|| Error::Validation(format!("no video id found in {input:?}")))?
            .to_string();
        let link = self.resolve(&bvid, 1).await?;

        let (title, cover, author, duration) = match self.client.video_info(&bvid).await {
            Ok(info) => (
                if info.title.is_empty() { link.title.clone() } else { info.title },
                info.cover,
                info.author,
                if info.duration > 0 { info.duration } else { link.duration },
            ),
            Err(e) => {
                warn!(%bvid, error = %e, "video metadata unavailable, using page data");
                (link.title.clone(), String::new(), String::new(), link.duration)
            }
        };

        Ok(ResolvedAudio {
            bvid,
            raw_url: link.raw_url,
            proxy_url: link.proxy_url,
            expires_at: link.expires_at,
            title,
            cover,
            author,
            duration,
            format: "m4a".to_string(),
        })
    }
}
