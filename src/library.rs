//! Song and stream-source persistence.
//!
//! The playback core only needs a handful of operations, expressed by
//! [`LibraryStore`]. [`JsonLibrary`] keeps everything in one JSON document.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::write_atomic;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Song {
    pub id: String,
    pub bvid: String,
    pub name: String,
    pub singer: String,
    pub singer_id: String,
    pub cover: String,
    pub source_id: String,
    pub stream_url: String,
    pub stream_url_expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Song {
    /// True when the stored stream URL stays valid for at least `margin`.
    pub fn has_fresh_stream(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        !self.stream_url.is_empty()
            && self
                .stream_url_expires_at
                .is_some_and(|at| at > now + margin)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSource {
    pub id: String,
    pub bvid: String,
    pub stream_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn song(&self, id: &str) -> Result<Option<Song>>;

    /// Songs made from video `bvid`, ordered by name.
    async fn songs_by_bvid(&self, bvid: &str) -> Result<Vec<Song>>;

    /// Insert or replace songs, assigning ids where missing.
    async fn upsert_songs(&self, songs: Vec<Song>) -> Result<Vec<Song>>;

    /// Record a refreshed stream URL on a song.
    async fn update_stream(
        &self,
        id: &str,
        stream_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a song and its stream source once nothing references it.
    async fn delete_song(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LibraryData {
    songs: HashMap<String, Song>,
    sources: HashMap<String, StreamSource>,
}

/// [`LibraryStore`] persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonLibrary {
    path: PathBuf,
    data: Mutex<LibraryData>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl JsonLibrary {
    /// Open the library at `path`, starting empty when the file is absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LibraryData::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), songs = data.songs.len(), "opened library");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub async fn songs(&self) -> Vec<Song> {
        let data = self.data.lock().await;
        let mut songs: Vec<Song> = data.songs.values().cloned().collect();
        songs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        songs
    }

    pub async fn source(&self, id: &str) -> Option<StreamSource> {
        self.data.lock().await.sources.get(id).cloned()
    }

    async fn persist(&self, data: &LibraryData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.path, &bytes).await
    }
}

#[async_trait]
impl LibraryStore for JsonLibrary {
    async fn song(&self, id: &str) -> Result<Option<Song>> {
        Ok(self.data.lock().await.songs.get(id).cloned())
    }

    async fn songs_by_bvid(&self, bvid: &str) -> Result<Vec<Song>> {
        let data = self.data.lock().await;
        let mut songs: Vec<Song> = data
            .songs
            .values()
            .filter(|s| s.bvid == bvid)
            .cloned()
            .collect();
        songs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(songs)
    }

    async fn upsert_songs(&self, songs: Vec<Song>) -> Result<Vec<Song>> {
        let mut data = self.data.lock().await;
        let now = Utc::now();
        let mut saved = Vec::with_capacity(songs.len());

        for mut song in songs {
            if song.name.trim().is_empty() {
                return Err(Error::Validation("song name is required".to_string()));
            }
            if song.id.is_empty() {
                song.id = new_id();
            }
            if !song.stream_url.is_empty() && song.source_id.is_empty() {
                let source = StreamSource {
                    id: new_id(),
                    bvid: song.bvid.clone(),
                    stream_url: song.stream_url.clone(),
                    expires_at: song.stream_url_expires_at,
                };
                song.source_id = source.id.clone();
                data.sources.insert(source.id.clone(), source);
            }
            song.updated_at = Some(now);
            data.songs.insert(song.id.clone(), song.clone());
            saved.push(song);
        }

        self.persist(&data).await?;
        info!(count = saved.len(), "saved songs");
        Ok(saved)
    }

    async fn update_stream(
        &self,
        id: &str,
        stream_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        let song = data
            .songs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("song {id}")))?;
        song.stream_url = stream_url.to_string();
        song.stream_url_expires_at = Some(expires_at);
        song.updated_at = Some(Utc::now());

        let source_id = song.source_id.clone();
        if let Some(source) = data.sources.get_mut(&source_id) {
            source.stream_url = stream_url.to_string();
            source.expires_at = Some(expires_at);
        }
        self.persist(&data).await
    }

    async fn delete_song(&self, id: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        let song = data
            .songs
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("song {id}")))?;

        if !song.source_id.is_empty()
            && !data.songs.values().any(|s| s.source_id == song.source_id)
        {
            data.sources.remove(&song.source_id);
            debug!(source_id = %song.source_id, "removed orphaned stream source");
        }
        self.persist(&data).await
    }
}
