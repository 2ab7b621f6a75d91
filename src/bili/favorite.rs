use serde::{Deserialize, Serialize};

use super::{parse_envelope, BiliClient};
use crate::error::{Error, Result};

/// Favorite item type for plain videos; audio and collections are skipped.
const VIDEO_ITEM_TYPE: i64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteFolder {
    pub id: i64,
    pub title: String,
    #[serde(alias = "media_count")]
    pub count: i64,
    #[serde(default)]
    pub cover: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteItem {
    pub id: i64,
    pub bvid: String,
}

#[derive(Debug, Default, Deserialize)]
struct FolderList {
    #[serde(default)]
    list: Option<Vec<RawFolder>>,
}

#[derive(Debug, Deserialize)]
struct RawFolder {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    media_count: i64,
    #[serde(default)]
    cover: String,
}

#[derive(Debug, Deserialize)]
struct FolderInfoData {
    info: RawFolder,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: i64,
    #[serde(default, rename = "type")]
    kind: i64,
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    bv_id: String,
}

impl From<RawFolder> for FavoriteFolder {
    fn from(raw: RawFolder) -> Self {
        Self {
            id: raw.id,
            title: raw.title,
            count: raw.media_count,
            cover: raw.cover,
        }
    }
}

impl BiliClient {
    /// Folders created by user `mid` (first 100).
    pub async fn favorite_folders(&self, mid: i64) -> Result<Vec<FavoriteFolder>> {
        let url = format!("{}/x/v3/fav/folder/created/list", self.endpoints().api_base);
        let data: Option<FolderList> = self
            .get_envelope(
                &url,
                &[
                    ("up_mid", mid.to_string()),
                    ("pn", "1".to_string()),
                    ("ps", "100".to_string()),
                ],
            )
            .await?
            .check_then_data()?;
        Ok(data
            .and_then(|d| d.list)
            .unwrap_or_default()
            .into_iter()
            .map(FavoriteFolder::from)
            .collect())
    }

    /// Title, cover and size of a folder.
    pub async fn favorite_folder_info(&self, media_id: i64) -> Result<FavoriteFolder> {
        let url = format!("{}/x/v3/fav/resource/list", self.endpoints().api_base);
        let data: FolderInfoData = self
            .get_text_envelope(
                &url,
                &[
                    ("media_id", media_id.to_string()),
                    ("pn", "1".to_string()),
                    ("ps", "1".to_string()),
                ],
            )
            .await?
            .into_data()?;
        Ok(data.info.into())
    }

    /// Video ids inside a folder. Public folders work without login.
    pub async fn favorite_folder_bvids(&self, media_id: i64) -> Result<Vec<FavoriteItem>> {
        let url = format!("{}/x/v3/fav/resource/ids", self.endpoints().api_base);
        let items: Vec<RawItem> = self
            .get_text_envelope(
                &url,
                &[
                    ("media_id", media_id.to_string()),
                    ("platform", "web".to_string()),
                ],
            )
            .await?
            .check_then_data()?
            .unwrap_or_default();
        if items.is_empty() {
            return Err(Error::NotFound(format!(
                "favorite folder {media_id} is empty or missing"
            )));
        }

        Ok(items
            .into_iter()
            .filter(|it| it.kind == VIDEO_ITEM_TYPE)
            .filter_map(|it| {
                let bvid = if it.bvid.is_empty() { it.bv_id } else { it.bvid };
                (!bvid.is_empty()).then_some(FavoriteItem { id: it.id, bvid })
            })
            .collect())
    }

    /// Like [`BiliClient::get_envelope`] but never errors on the HTTP status:
    /// the favorite endpoints answer missing or private folders with an HTML
    /// page, which maps to `NotFound`.
    async fn get_text_envelope<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<super::Envelope<T>> {
        let body = self
            .http
            .get(url)
            .headers(self.api_headers(super::default_referer()))
            .query(query)
            .send()
            .await?
            .text()
            .await?;
        parse_envelope(&body)
    }
}

impl<T> super::Envelope<T> {
    /// Check the code and hand back `data`, which may legitimately be null.
    fn check_then_data(self) -> Result<Option<T>> {
        self.check()?;
        Ok(self.data)
    }
}
