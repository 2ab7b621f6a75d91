//! Loopback HTTP proxy.
//!
//! The webview cannot attach the platform's referer to media requests, so
//! audio and images are fetched through here. Cached files and theme images
//! are served from disk by name.

use std::io::SeekFrom;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::bili::BiliClient;
use crate::error::Result;
use crate::paths::StorageDirs;
use crate::theme_images;
use crate::utils::is_http_url;

pub const DEFAULT_PROXY_PORT: u16 = 9999;

/// Extensions accepted by `/local`.
pub const AUDIO_EXTENSIONS: &[&str] = &["m4s"];

const MAX_FILE_NAME_LEN: usize = 160;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Upstream response headers relayed to the client.
const RELAYED_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::LAST_MODIFIED,
    header::ETAG,
];

/// Builds proxy URLs without touching the listener.
///
/// Clones share one base URL. When the proxy binds an ephemeral port,
/// [`ProxyServer::start`] rewrites it so every clone hands out reachable URLs.
#[derive(Debug, Clone)]
pub struct ProxyUrls {
    base_url: Arc<RwLock<String>>,
}

impl ProxyUrls {
    pub fn new(port: u16) -> Self {
        Self {
            base_url: Arc::new(RwLock::new(base_url_for(port))),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_port(&self, port: u16) {
        *self
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = base_url_for(port);
    }

    pub fn audio_url(&self, raw: &str) -> String {
        format!("{}/audio?u={}", self.base_url(), urlencoding::encode(raw))
    }

    pub fn image_url(&self, raw: &str) -> String {
        format!("{}/image?u={}", self.base_url(), urlencoding::encode(raw))
    }

    pub fn local_url(&self, file_name: &str) -> String {
        format!("{}/local?f={}", self.base_url(), urlencoding::encode(file_name))
    }

    pub fn theme_image_url(&self, file_name: &str) -> String {
        format!(
            "{}/theme-image?f={}",
            self.base_url(),
            urlencoding::encode(file_name)
        )
    }

    /// True for any loopback `/audio` URL, whatever port it was minted on.
    pub fn is_proxy_url(url: &str) -> bool {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return false;
        };
        let loopback = match parsed.host_str() {
            Some("localhost") => true,
            Some(host) => host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback()),
            None => false,
        };
        loopback && parsed.path() == "/audio"
    }
}

/// Accepts `stem.ext` where the stem is ASCII alphanumerics, `-` or `_`
/// and `ext` is one of `allowed_exts`. Rules out separators and `..`.
pub fn is_safe_file_name(name: &str, allowed_exts: &[&str]) -> bool {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return false;
    }
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && stem
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        && allowed_exts.iter().any(|a| a.eq_ignore_ascii_case(ext))
}

#[derive(Clone)]
struct ProxyState {
    client: BiliClient,
    dirs: StorageDirs,
}

#[derive(Debug, Deserialize)]
struct UpstreamQuery {
    u: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    f: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub port: u16,
    pub base_url: String,
}

struct RunningProxy {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct ProxyServer {
    port: u16,
    urls: ProxyUrls,
    state: ProxyState,
    running: Mutex<Option<RunningProxy>>,
}

impl ProxyServer {
    /// Port 0 binds an ephemeral port. Once started, [`ProxyStatus`] and
    /// every URL from [`ProxyServer::urls`] carry the real one.
    pub fn new(port: u16, client: BiliClient, dirs: StorageDirs) -> Self {
        Self {
            port,
            urls: ProxyUrls::new(port),
            state: ProxyState { client, dirs },
            running: Mutex::new(None),
        }
    }

    pub fn urls(&self) -> &ProxyUrls {
        &self.urls
    }

    pub fn base_url(&self) -> String {
        self.urls.base_url()
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Bind and serve. Calling again while running is a no-op.
    pub async fn start(&self) -> Result<ProxyStatus> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                debug!(addr = %current.addr, "local proxy already running");
                return Ok(status_for(current.addr));
            }
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port)).await?;
        let addr = listener.local_addr()?;
        self.urls.set_port(addr.port());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.state.clone());

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "local proxy stopped with error");
            }
        });

        info!(%addr, "local proxy listening");
        *running = Some(RunningProxy {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(status_for(addr))
    }

    /// Graceful shutdown. Streams still open after a short grace period are
    /// cut off.
    pub async fn stop(&self) {
        let Some(mut current) = self.running.lock().await.take() else {
            return;
        };
        if let Some(tx) = current.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut current.task).await {
            Ok(Ok(())) => info!(addr = %current.addr, "local proxy stopped"),
            Ok(Err(e)) => warn!(error = %e, "local proxy task failed"),
            Err(_) => {
                warn!("local proxy did not drain in time, aborting");
                current.task.abort();
            }
        }
    }

    pub async fn status(&self) -> ProxyStatus {
        match self.running.lock().await.as_ref() {
            Some(r) if !r.task.is_finished() => status_for(r.addr),
            _ => ProxyStatus {
                running: false,
                port: self.port,
                base_url: self.urls.base_url(),
            },
        }
    }
}

fn base_url_for(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

fn status_for(addr: SocketAddr) -> ProxyStatus {
    ProxyStatus {
        running: true,
        port: addr.port(),
        base_url: format!("http://{addr}"),
    }
}

/// Pings a proxy to check if it's responsive
pub async fn ping(base_url: &str) -> bool {
    reqwest::Client::new()
        .get(format!("{base_url}/ping"))
        .timeout(Duration::from_millis(1500))
        .send()
        .await
        .map(|res| res.status().is_success())
        .unwrap_or(false)
}

fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/ping", get(pong))
        .route("/audio", get(proxy_audio).options(preflight))
        .route("/image", get(proxy_image).options(preflight))
        .route("/local", get(serve_local).options(preflight))
        .route("/theme-image", get(serve_theme_image).options(preflight))
        .with_state(state)
}

async fn pong() -> Response {
    with_cors("pong".into_response())
}

async fn preflight() -> Response {
    with_cors(StatusCode::NO_CONTENT.into_response())
}

async fn proxy_audio(
    State(state): State<ProxyState>,
    Query(query): Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    relay(&state, query.u, &headers, "audio").await
}

async fn proxy_image(
    State(state): State<ProxyState>,
    Query(query): Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    relay(&state, query.u, &headers, "image").await
}

async fn relay(
    state: &ProxyState,
    target: Option<String>,
    headers: &HeaderMap,
    kind: &'static str,
) -> Response {
    let Some(target) = target.filter(|t| !t.trim().is_empty()) else {
        return plain_error(StatusCode::BAD_REQUEST, "missing u parameter");
    };
    if !is_http_url(&target) {
        return plain_error(StatusCode::BAD_REQUEST, "u must be an http(s) url");
    }

    let upstream = match state
        .client
        .media_get(&target, headers.get(header::RANGE))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            warn!(kind, error = %e, "upstream fetch failed");
            return plain_error(StatusCode::BAD_GATEWAY, "upstream fetch failed");
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    for name in RELAYED_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(resp) => with_cors(resp),
        Err(e) => {
            error!(kind, error = %e, "failed to build relay response");
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "relay failed")
        }
    }
}

async fn serve_local(
    State(state): State<ProxyState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(name) = query.f.filter(|f| !f.is_empty()) else {
        return plain_error(StatusCode::BAD_REQUEST, "missing f parameter");
    };
    if !is_safe_file_name(&name, AUDIO_EXTENSIONS) {
        return plain_error(StatusCode::BAD_REQUEST, "invalid file name");
    }

    // Passive cache first, then explicit downloads.
    for dir in [&state.dirs.audio_cache, &state.dirs.downloads] {
        let path = dir.join(&name);
        if is_file(&path).await {
            return serve_file(&path, &headers, "audio/mp4").await;
        }
    }
    plain_error(StatusCode::NOT_FOUND, "file not found")
}

async fn serve_theme_image(
    State(state): State<ProxyState>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(name) = query.f.filter(|f| !f.is_empty()) else {
        return plain_error(StatusCode::BAD_REQUEST, "missing f parameter");
    };
    if !is_safe_file_name(&name, theme_images::EXTENSIONS) {
        return plain_error(StatusCode::BAD_REQUEST, "invalid file name");
    }

    let path = state.dirs.theme_images.join(&name);
    if !is_file(&path).await {
        return plain_error(StatusCode::NOT_FOUND, "file not found");
    }
    let content_type = theme_images::content_type_for_file(&name);
    serve_file(&path, &headers, content_type).await
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Single `bytes=` range against a file of `len` bytes. Malformed and
/// multi-range headers are ignored and the whole file is served.
fn parse_range(value: &str, len: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || len == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: len.saturating_sub(suffix),
            end: len - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    let end = if end.is_empty() {
        len - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(len - 1),
            Ok(_) => return ByteRange::Unsatisfiable,
            Err(_) => return ByteRange::Full,
        }
    };
    ByteRange::Partial { start, end }
}

async fn serve_file(path: &Path, headers: &HeaderMap, content_type: &'static str) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return plain_error(StatusCode::NOT_FOUND, "file not found");
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open file");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to open file");
        }
    };
    let len = match file.metadata().await {
        Ok(m) => m.len(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to stat file");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file");
        }
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(ByteRange::Full, |v| parse_range(v, len));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    let response = match range {
        ByteRange::Full => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, len)
            .body(Body::from_stream(ReaderStream::new(file))),
        ByteRange::Partial { start, end } => {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                error!(path = %path.display(), error = %e, "seek failed");
                return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file");
            }
            let count = end - start + 1;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, count)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))
                .body(Body::from_stream(ReaderStream::new(file.take(count))))
        }
        ByteRange::Unsatisfiable => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{len}"))
            .body(Body::empty()),
    };

    match response {
        Ok(resp) => with_cors(resp),
        Err(e) => {
            error!(error = %e, "failed to build file response");
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
        }
    }
}

fn plain_error(status: StatusCode, message: &'static str) -> Response {
    with_cors((status, message).into_response())
}

fn with_cors(mut resp: Response) -> Response {
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range, Accept-Ranges"),
    );
    resp
}
