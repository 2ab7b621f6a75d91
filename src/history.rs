use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::now_unix;

/// What was playing last, so the player can pick up where it left off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayHistory {
    pub favorite_id: String,
    pub song_id: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct PlayHistoryFile {
    path: PathBuf,
}

impl PlayHistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn save(&self, favorite_id: &str, song_id: &str) -> Result<PlayHistory> {
        let record = PlayHistory {
            favorite_id: favorite_id.to_string(),
            song_id: song_id.to_string(),
            timestamp: now_unix(),
        };
        let content = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(record)
    }

    /// Last saved record, or an empty one when nothing was saved yet.
    pub async fn load(&self) -> Result<PlayHistory> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PlayHistory::default()),
            Err(e) => Err(e.into()),
        }
    }
}
