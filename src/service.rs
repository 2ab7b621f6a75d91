use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bili::favorite::{FavoriteFolder, FavoriteItem};
use crate::bili::login::{LoginPollState, QrCode, UserInfo};
use crate::bili::search::SearchHit;
use crate::bili::BiliClient;
use crate::cache::CacheManager;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::history::{PlayHistory, PlayHistoryFile};
use crate::library::{JsonLibrary, LibraryStore, Song};
use crate::paths::PathConfig;
use crate::resolver::{LinkResolver, ResolvedAudio, ResolvedLink};
use crate::server::{ProxyServer, ProxyStatus};
use crate::settings::Settings;
use crate::theme_images::ThemeImageStore;

/// Everything the player front end talks to, wired from one settings and
/// path configuration.
pub struct Service {
    paths: PathConfig,
    client: BiliClient,
    credentials: CredentialStore,
    resolver: LinkResolver,
    cache: CacheManager,
    proxy: ProxyServer,
    themes: ThemeImageStore,
    library: Arc<JsonLibrary>,
    history: PlayHistoryFile,
}

impl Service {
    pub async fn new(settings: &Settings, paths: PathConfig) -> Result<Self> {
        let client = BiliClient::new(settings.timeouts())?;
        Self::with_client(settings, paths, client).await
    }

    /// Build around an existing client, e.g. one pointed at other endpoints.
    pub async fn with_client(
        settings: &Settings,
        paths: PathConfig,
        client: BiliClient,
    ) -> Result<Self> {
        paths.ensure_directories_exist()?;

        let dirs = paths.storage_dirs();
        let proxy = ProxyServer::new(settings.proxy_port, client.clone(), dirs.clone());
        let urls = proxy.urls().clone();

        let library = Arc::new(JsonLibrary::open(&paths.library_file).await?);
        let credentials = CredentialStore::new(client.clone(), &paths.credential_file);
        let resolver = LinkResolver::new(client.clone(), urls.clone());
        let cache = CacheManager::new(
            client.clone(),
            resolver.clone(),
            library.clone(),
            dirs.clone(),
            urls.clone(),
        );
        let themes = ThemeImageStore::new(client.clone(), dirs.theme_images, urls);
        let history = PlayHistoryFile::new(&paths.play_history_file);

        match credentials.restore().await {
            Ok(true) => info!("login session restored"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to restore login session"),
        }

        Ok(Self {
            paths,
            client,
            credentials,
            resolver,
            cache,
            proxy,
            themes,
            library,
            history,
        })
    }

    pub fn paths(&self) -> &PathConfig {
        &self.paths
    }

    pub fn client(&self) -> &BiliClient {
        &self.client
    }

    pub fn library(&self) -> &Arc<JsonLibrary> {
        &self.library
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn proxy(&self) -> &ProxyServer {
        &self.proxy
    }

    // Proxy

    pub async fn start_proxy(&self) -> Result<ProxyStatus> {
        self.proxy.start().await
    }

    pub async fn stop_proxy(&self) {
        self.proxy.stop().await
    }

    pub fn image_proxy_url(&self, raw: &str) -> String {
        self.proxy.urls().image_url(raw)
    }

    // Playback

    pub async fn resolve(&self, bvid: &str, page_index: i64) -> Result<ResolvedLink> {
        self.resolver.resolve(bvid, page_index).await
    }

    pub async fn resolve_audio(&self, input: &str) -> Result<ResolvedAudio> {
        self.resolver.resolve_audio(input).await
    }

    /// Saved songs of a video followed by an unsaved entry carrying the
    /// platform's current title, author and cover. If the video cannot be
    /// resolved, only the saved songs are returned.
    pub async fn search_bvid(&self, bvid: &str) -> Result<Vec<Song>> {
        let bvid = bvid.trim();
        if bvid.is_empty() {
            return Err(Error::Validation("content id is empty".to_string()));
        }
        let mut results = self.library.songs_by_bvid(bvid).await?;
        match self.resolver.resolve_audio(bvid).await {
            Ok(audio) => results.push(Song {
                bvid: audio.bvid,
                name: audio.title,
                singer: audio.author,
                cover: audio.cover,
                ..Song::default()
            }),
            Err(e) => {
                warn!(%bvid, error = %e, "remote lookup failed, returning saved songs only")
            }
        }
        Ok(results)
    }

    pub async fn search_videos(
        &self,
        keyword: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<SearchHit>> {
        self.client.search_videos(keyword, page, page_size).await
    }

    // Cache and downloads

    pub async fn download_song(&self, song_id: &str) -> Result<PathBuf> {
        self.cache.download(song_id).await
    }

    pub async fn cache_song(&self, song_id: &str, url: &str) -> Result<PathBuf> {
        self.cache.cache_audio(song_id, url).await
    }

    pub async fn local_audio_url(&self, song_id: &str) -> Result<Option<String>> {
        self.cache.local_audio_url(song_id).await
    }

    pub async fn is_song_downloaded(&self, song_id: &str) -> Result<bool> {
        self.cache.is_downloaded(song_id).await
    }

    pub async fn delete_downloaded_song(&self, song_id: &str) -> Result<()> {
        self.cache.delete_download(song_id).await
    }

    pub async fn audio_cache_size(&self) -> Result<u64> {
        self.cache.cache_size().await
    }

    pub async fn clear_audio_cache(&self) -> Result<()> {
        self.cache.clear_cache().await
    }

    pub async fn save_theme_image_from_data_url(&self, data_url: &str) -> Result<String> {
        self.themes.save_from_data_url(data_url).await
    }

    pub async fn save_theme_image_from_url(&self, url: &str) -> Result<String> {
        self.themes.save_from_url(url).await
    }

    // Login

    pub async fn generate_login_qr(&self) -> Result<QrCode> {
        self.client.login_qr_generate().await
    }

    /// Poll the QR login; a successful login is persisted right away.
    pub async fn poll_login(&self, qrcode_key: &str) -> Result<LoginPollState> {
        let state = self.client.login_qr_poll(qrcode_key).await?;
        if state.is_success() {
            if let Err(e) = self.credentials.save().await {
                warn!(error = %e, "login succeeded but the session could not be saved");
            }
        }
        Ok(state)
    }

    pub fn is_logged_in(&self) -> bool {
        self.credentials.is_logged_in()
    }

    pub async fn logout(&self) {
        self.credentials.logout().await
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        self.client.user_info().await
    }

    // Favorites

    /// Folders of the logged-in user.
    pub async fn my_favorite_folders(&self) -> Result<Vec<FavoriteFolder>> {
        let user = self.client.user_info().await?;
        self.client.favorite_folders(user.uid).await
    }

    pub async fn favorite_folder_info(&self, media_id: i64) -> Result<FavoriteFolder> {
        self.client.favorite_folder_info(media_id).await
    }

    pub async fn favorite_folder_bvids(&self, media_id: i64) -> Result<Vec<FavoriteItem>> {
        self.client.favorite_folder_bvids(media_id).await
    }

    // History

    pub async fn save_play_history(&self, favorite_id: &str, song_id: &str) -> Result<PlayHistory> {
        self.history.save(favorite_id, song_id).await
    }

    pub async fn play_history(&self) -> Result<PlayHistory> {
        self.history.load().await
    }
}
