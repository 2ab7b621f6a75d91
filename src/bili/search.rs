use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BiliClient;
use crate::error::Result;
use crate::utils::{normalize_cover_url, strip_html_tags};

const MAX_PAGE_SIZE: u32 = 30;
const DEFAULT_PAGE_SIZE: u32 = 10;

/// A search result, shaped like a song that has not been saved yet.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub bvid: String,
    pub title: String,
    pub author: String,
    pub cover: String,
    /// Display duration as sent upstream, e.g. `"4:02"`.
    pub duration: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Option<Vec<RawHit>>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    duration: String,
}

/// Clamp paging input: page starts at 1, page size within `1..=30` else 10.
pub fn normalize_paging(page: i64, page_size: i64) -> (u32, u32) {
    let page = if page <= 0 {
        1
    } else {
        u32::try_from(page).unwrap_or(u32::MAX)
    };
    let page_size = match u32::try_from(page_size) {
        Ok(size) if (1..=MAX_PAGE_SIZE).contains(&size) => size,
        _ => DEFAULT_PAGE_SIZE,
    };
    (page, page_size)
}

impl BiliClient {
    /// Video search. An upstream rejection (non-zero code) yields no hits
    /// rather than an error.
    pub async fn search_videos(
        &self,
        keyword: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<SearchHit>> {
        let (page, page_size) = normalize_paging(page, page_size);
        let url = format!("{}/x/web-interface/search/type", self.endpoints().api_base);
        let env = self
            .get_envelope::<SearchData>(
                &url,
                &[
                    ("search_type", "video".to_string()),
                    ("keyword", keyword.to_string()),
                    ("page", page.to_string()),
                    ("page_size", page_size.to_string()),
                    ("order", "totalrank".to_string()),
                ],
            )
            .await?;
        if env.code != 0 {
            debug!(code = env.code, message = %env.message, "search rejected upstream");
            return Ok(Vec::new());
        }

        let hits = env
            .data
            .and_then(|d| d.result)
            .unwrap_or_default()
            .into_iter()
            .map(|raw| SearchHit {
                bvid: raw.bvid,
                title: strip_html_tags(&raw.title),
                author: raw.author,
                cover: normalize_cover_url(&raw.pic),
                duration: raw.duration,
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(normalize_paging(0, 0), (1, 10));
        assert_eq!(normalize_paging(-3, 31), (1, 10));
        assert_eq!(normalize_paging(4, 30), (4, 30));
        assert_eq!(normalize_paging(2, 1), (2, 1));
    }
}
