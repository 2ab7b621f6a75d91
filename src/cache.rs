//! Passive audio cache and explicit downloads.
//!
//! Audio files are named `<song id>.m4s` and live either in the passive cache
//! (filled while playing) or the downloads directory (user requested). Every
//! write lands in a `.part` sibling first and is renamed into place only after
//! its size matches what upstream declared, so a file that exists under its
//! final name is always complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::bili::BiliClient;
use crate::downloads::InflightDownloads;
use crate::error::{Error, Result};
use crate::library::{LibraryStore, Song};
use crate::paths::StorageDirs;
use crate::resolver::LinkResolver;
use crate::server::{is_safe_file_name, ProxyUrls, AUDIO_EXTENSIONS};

pub const AUDIO_EXTENSION: &str = "m4s";

/// A stored stream URL must outlive this margin to be used for a download.
const FRESHNESS_MARGIN_SECS: i64 = 30;

const WRITE_BUFFER: usize = 64 * 1024;

/// `<song id>.m4s`, refusing ids that would not make a safe file name.
pub fn audio_file_name(song_id: &str) -> Result<String> {
    let name = format!("{song_id}.{AUDIO_EXTENSION}");
    if !is_safe_file_name(&name, AUDIO_EXTENSIONS) {
        return Err(Error::Validation(format!("unusable song id {song_id:?}")));
    }
    Ok(name)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Removes a `.part` file when dropped unless [`PartFile::keep`] was called.
/// Covers the cancelled-future case, where no error path runs.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "discarded partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial file")
            }
        }
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

/// Write `bytes` to `dest` through a `.part` file and a rename.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let part = part_path(dest);
    remove_if_present(&part).await;

    let guard = PartFile::new(part.clone());
    let mut file = fs::File::create(&part).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&part, dest).await?;
    guard.keep();
    Ok(())
}

/// GET `url` into `dest`, verifying the byte count against `Content-Length`.
///
/// Nothing is left behind on failure: the `.part` file is removed, and so is
/// the destination if it fails the final size check after the rename.
pub async fn fetch_verified(client: &BiliClient, url: &str, dest: &Path) -> Result<u64> {
    let resp = client
        .media_get(url, None)
        .timeout(client.timeouts().download)
        .send()
        .await?;
    if resp.status() != StatusCode::OK {
        return Err(Error::UpstreamStatus(resp.status().as_u16()));
    }
    let expected = match resp.content_length() {
        Some(len) if len > 0 => len,
        _ => {
            return Err(Error::Integrity(
                "upstream did not declare a content length, cannot verify download".to_string(),
            ))
        }
    };

    let part = part_path(dest);
    remove_if_present(&part).await;

    let guard = PartFile::new(part.clone());
    stream_into_place(resp, &part, dest, expected).await?;
    // Renamed away; nothing left to clean up.
    guard.keep();
    Ok(expected)
}

async fn stream_into_place(
    resp: reqwest::Response,
    part: &Path,
    dest: &Path,
    expected: u64,
) -> Result<()> {
    let file = fs::File::create(part).await?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
    let mut stream = resp.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > expected {
            return Err(Error::Integrity(format!(
                "received more than the declared {expected} bytes"
            )));
        }
        writer.write_all(&chunk).await?;
    }
    if written != expected {
        return Err(Error::Integrity(format!(
            "expected {expected} bytes, received {written}"
        )));
    }

    writer.flush().await?;
    let file = writer.into_inner();
    file.sync_all().await?;
    drop(file);

    let on_disk = fs::metadata(part).await?.len();
    if on_disk != expected {
        return Err(Error::Integrity(format!(
            "expected {expected} bytes on disk, found {on_disk}"
        )));
    }

    if fs::try_exists(dest).await? {
        fs::remove_file(dest).await?;
    }
    fs::rename(part, dest).await?;

    let final_len = match fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            remove_if_present(dest).await;
            return Err(e.into());
        }
    };
    if final_len != expected {
        remove_if_present(dest).await;
        return Err(Error::Integrity(format!(
            "expected {expected} bytes after rename, found {final_len}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CacheManager {
    client: BiliClient,
    resolver: LinkResolver,
    library: Arc<dyn LibraryStore>,
    dirs: StorageDirs,
    urls: ProxyUrls,
    inflight: InflightDownloads,
}

impl CacheManager {
    pub fn new(
        client: BiliClient,
        resolver: LinkResolver,
        library: Arc<dyn LibraryStore>,
        dirs: StorageDirs,
        urls: ProxyUrls,
    ) -> Self {
        Self {
            client,
            resolver,
            library,
            dirs,
            urls,
            inflight: InflightDownloads::new(),
        }
    }

    /// True while a download of `song_id` is running or queued.
    pub fn is_downloading(&self, song_id: &str) -> bool {
        self.inflight.is_inflight(song_id)
    }

    /// Download a song into the downloads directory. Concurrent calls for
    /// the same song run one after the other.
    pub async fn download(&self, song_id: &str) -> Result<PathBuf> {
        let song_id = song_id.trim();
        if song_id.is_empty() {
            return Err(Error::Validation("song id is empty".to_string()));
        }
        let song = self
            .library
            .song(song_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("song {song_id}")))?;
        let file_name = audio_file_name(song_id)?;

        let _guard = self.inflight.acquire(song_id).await;
        let url = self.stream_url_for(&song).await?;

        fs::create_dir_all(&self.dirs.downloads).await?;
        let dest = self.dirs.downloads.join(&file_name);
        let bytes = fetch_verified(&self.client, &url, &dest).await.map_err(|e| {
            warn!(%song_id, error = %e, "download failed");
            e
        })?;

        info!(%song_id, bytes, path = %dest.display(), "download complete");
        Ok(dest)
    }

    /// Fill the passive cache for a song from `url`. A proxy URL is unwrapped
    /// to its upstream target.
    pub async fn cache_audio(&self, song_id: &str, url: &str) -> Result<PathBuf> {
        let song_id = song_id.trim();
        if song_id.is_empty() {
            return Err(Error::Validation("song id is empty".to_string()));
        }
        let file_name = audio_file_name(song_id)?;
        let target = upstream_target(url)
            .ok_or_else(|| Error::Validation(format!("not an http(s) url: {url:?}")))?;

        let _guard = self.inflight.acquire(&format!("cache/{song_id}")).await;
        fs::create_dir_all(&self.dirs.audio_cache).await?;
        let dest = self.dirs.audio_cache.join(&file_name);
        let bytes = fetch_verified(&self.client, &target, &dest).await?;
        debug!(%song_id, bytes, "cached audio");
        Ok(dest)
    }

    /// URL to download from: the stored link when it is fresh and points
    /// upstream, otherwise a newly resolved one.
    async fn stream_url_for(&self, song: &Song) -> Result<String> {
        let fresh = song.has_fresh_stream(
            Utc::now(),
            chrono::Duration::seconds(FRESHNESS_MARGIN_SECS),
        );
        if fresh && !ProxyUrls::is_proxy_url(&song.stream_url) {
            return Ok(song.stream_url.clone());
        }
        if song.bvid.is_empty() {
            return Err(Error::Validation(format!(
                "song {} has no content id to resolve",
                song.id
            )));
        }

        let link = self.resolver.resolve(&song.bvid, 1).await?;
        if !fresh {
            if let Err(e) = self
                .library
                .update_stream(&song.id, &link.proxy_url, link.expires_at)
                .await
            {
                warn!(song_id = %song.id, error = %e, "failed to persist refreshed stream url");
            }
        }
        Ok(link.raw_url)
    }

    /// Cached or downloaded file for a song, passive cache first.
    pub async fn local_audio_path(&self, song_id: &str) -> Result<Option<PathBuf>> {
        let file_name = audio_file_name(song_id)?;
        for dir in [&self.dirs.audio_cache, &self.dirs.downloads] {
            let path = dir.join(&file_name);
            if is_file(&path).await {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// `/local` proxy URL for a song that is on disk, `None` otherwise.
    pub async fn local_audio_url(&self, song_id: &str) -> Result<Option<String>> {
        if song_id.is_empty() {
            return Err(Error::Validation("song id is empty".to_string()));
        }
        let file_name = audio_file_name(song_id)?;
        Ok(self
            .local_audio_path(song_id)
            .await?
            .map(|_| self.urls.local_url(&file_name)))
    }

    pub async fn is_downloaded(&self, song_id: &str) -> Result<bool> {
        if song_id.is_empty() {
            return Err(Error::Validation("song id is empty".to_string()));
        }
        let path = self.dirs.downloads.join(audio_file_name(song_id)?);
        Ok(is_file(&path).await)
    }

    /// Delete a downloaded file. Missing files are not an error.
    pub async fn delete_download(&self, song_id: &str) -> Result<()> {
        if song_id.is_empty() {
            return Err(Error::Validation("song id is empty".to_string()));
        }
        let path = self.dirs.downloads.join(audio_file_name(song_id)?);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(%song_id, "deleted downloaded song");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total size of the passive cache in bytes.
    pub async fn cache_size(&self) -> Result<u64> {
        dir_size(&self.dirs.audio_cache).await
    }

    /// Remove everything in the passive cache. Downloads are untouched.
    pub async fn clear_cache(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dirs.audio_cache).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.dirs.audio_cache).await?;
        info!("cleared audio cache");
        Ok(())
    }
}

/// Upstream URL behind `url`: proxy audio URLs are unwrapped, plain http(s)
/// URLs pass through.
fn upstream_target(url: &str) -> Option<String> {
    let url = url.trim();
    if ProxyUrls::is_proxy_url(url) {
        let parsed = reqwest::Url::parse(url).ok()?;
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "u")
            .map(|(_, v)| v.into_owned())
            .filter(|v| crate::utils::is_http_url(v));
    }
    crate::utils::is_http_url(url).then(|| url.to_string())
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn dir_size(dir: &Path) -> Result<u64> {
    let mut pending = vec![dir.to_path_buf()];
    let mut total = 0;
    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_names_come_from_song_ids() {
        assert_eq!(
            audio_file_name("6f1c2a9e-0d3b-4c55-9a7e-1b2c3d4e5f60").unwrap(),
            "6f1c2a9e-0d3b-4c55-9a7e-1b2c3d4e5f60.m4s"
        );
        assert!(audio_file_name("../etc/passwd").is_err());
        assert!(audio_file_name("").is_err());
    }

    #[test]
    fn part_file_sits_next_to_destination() {
        assert_eq!(
            part_path(Path::new("/data/downloads/x.m4s")),
            Path::new("/data/downloads/x.m4s.part")
        );
    }

    #[test]
    fn proxy_urls_unwrap_to_upstream() {
        let urls = ProxyUrls::new(9999);
        let proxied = urls.audio_url("https://upos.example/a.m4s?deadline=1");
        assert_eq!(
            upstream_target(&proxied).as_deref(),
            Some("https://upos.example/a.m4s?deadline=1")
        );
        assert_eq!(
            upstream_target("https://upos.example/b.m4s").as_deref(),
            Some("https://upos.example/b.m4s")
        );
        assert_eq!(upstream_target("file:///tmp/x"), None);
    }

    #[tokio::test]
    async fn atomic_write_replaces_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("state.json");
        write_atomic(&dest, b"one").await.unwrap();
        write_atomic(&dest, b"two").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"two");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn part_file_is_removed_unless_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dropped = tmp.path().join("a.m4s.part");
        std::fs::write(&dropped, b"half").unwrap();
        drop(PartFile::new(dropped.clone()));
        assert!(!dropped.exists());

        let kept = tmp.path().join("b.m4s.part");
        std::fs::write(&kept, b"whole").unwrap();
        PartFile::new(kept.clone()).keep();
        assert!(kept.exists());

        // Already gone is fine.
        drop(PartFile::new(tmp.path().join("missing.part")));
    }

    #[tokio::test]
    async fn cache_size_sums_nested_files_and_tolerates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(dir_size(&tmp.path().join("absent")).await.unwrap(), 0);

        std::fs::write(tmp.path().join("a.m4s"), vec![0u8; 10]).unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/b.m4s"), vec![0u8; 5]).unwrap();
        assert_eq!(dir_size(tmp.path()).await.unwrap(), 15);
    }
}
