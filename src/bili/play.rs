use serde::Deserialize;

use super::BiliClient;
use crate::error::Result;

/// One page (part) of a multi-part video.
#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    pub cid: i64,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub part: String,
    /// Seconds.
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashAudio {
    #[serde(default)]
    pub id: i64,
    #[serde(default, rename = "baseUrl", alias = "base_url")]
    pub base_url: String,
    #[serde(default, rename = "backupUrl", alias = "backup_url")]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub codecs: String,
}

impl DashAudio {
    /// Primary URL, else the first non-empty backup URL.
    pub fn best_url(&self) -> Option<&str> {
        if !self.base_url.is_empty() {
            return Some(&self.base_url);
        }
        self.backup_url
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .find(|u| !u.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayurlData {
    #[serde(default)]
    dash: Option<Dash>,
}

#[derive(Debug, Default, Deserialize)]
struct Dash {
    #[serde(default)]
    audio: Option<Vec<DashAudio>>,
}

/// Subset of the video view endpoint used for song metadata.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub title: String,
    pub cover: String,
    pub author: String,
    pub duration: i64,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    pic: String,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    owner: Option<Owner>,
    #[serde(default)]
    staff: Option<Vec<Staff>>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Staff {
    #[serde(default)]
    name: String,
}

impl BiliClient {
    /// Ordered page list of a video.
    pub async fn pagelist(&self, bvid: &str) -> Result<Vec<PageInfo>> {
        let url = format!("{}/x/player/pagelist", self.endpoints().api_base);
        let pages: Option<Vec<PageInfo>> = self
            .get_envelope(&url, &[("bvid", bvid.to_string())])
            .await?
            .into_data()
            .map(Some)
            .or_else(|e| if e.is_not_found() { Ok(None) } else { Err(e) })?;
        Ok(pages.unwrap_or_default())
    }

    /// DASH audio tracks for one page, in upstream order.
    pub async fn playurl_audio(&self, bvid: &str, cid: i64) -> Result<Vec<DashAudio>> {
        let url = format!("{}/x/player/playurl", self.endpoints().api_base);
        let data: PlayurlData = self
            .get_data(
                &url,
                &[
                    ("bvid", bvid.to_string()),
                    ("cid", cid.to_string()),
                    ("fnval", "4048".to_string()),
                ],
            )
            .await?;
        Ok(data.dash.and_then(|d| d.audio).unwrap_or_default())
    }

    pub async fn video_info(&self, bvid: &str) -> Result<VideoInfo> {
        let url = format!("{}/x/web-interface/view", self.endpoints().api_base);
        let data: ViewData = self.get_data(&url, &[("bvid", bvid.to_string())]).await?;

        let staff: Vec<String> = data
            .staff
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.name)
            .filter(|n| !n.is_empty())
            .collect();
        let author = if staff.is_empty() {
            data.owner.map(|o| o.name).unwrap_or_default()
        } else {
            staff.join("; ")
        };

        Ok(VideoInfo {
            title: data.title,
            cover: crate::utils::normalize_cover_url(&data.pic),
            author,
            duration: data.duration,
        })
    }
}
