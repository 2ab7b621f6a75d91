use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::bili::{BiliClient, SESSION_COOKIE};
use crate::error::{Error, Result};

/// Restored sessions are assumed valid for about a month.
const RESTORED_SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    #[serde(default)]
    sessdata: String,
    #[serde(default)]
    saved_at: String,
}

/// Persists the platform session cookie across restarts.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    client: BiliClient,
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(client: BiliClient, path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.has_session()
    }

    /// Write the current session cookie to disk, readable by the owner only.
    pub async fn save(&self) -> Result<()> {
        let url = self.client.session_url()?;
        let sessdata = self
            .client
            .jar()
            .cookie_value(&url, SESSION_COOKIE)
            .filter(|v| !v.is_empty())
            .ok_or(Error::NotLoggedIn)?;

        let record = SavedSession {
            sessdata,
            saved_at: Utc::now().to_rfc3339(),
        };
        let bytes = serde_json::to_vec(&record)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // `mode` only applies on creation; tighten pre-existing files too.
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        info!(path = %self.path.display(), "saved login session");
        Ok(())
    }

    /// Load a saved session into the cookie jar. A missing file or empty
    /// value is not an error.
    pub async fn restore(&self) -> Result<bool> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let saved: SavedSession = serde_json::from_slice(&content)?;
        if saved.sessdata.is_empty() {
            return Ok(false);
        }

        let url = self.client.session_url()?;
        let cookie = restore_cookie_string(&saved.sessdata, &url);
        self.client.jar().add_cookie_str(&cookie, &url);
        info!(saved_at = %saved.saved_at, "restored login session");
        Ok(true)
    }

    /// Drop the session from memory and disk. Cleanup failures are ignored.
    pub async fn logout(&self) {
        self.client.jar().clear();
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove saved session file");
            }
        }
        info!("logged out");
    }
}

/// Cookie for the platform's parent domain, scoped to https when the
/// session URL is https. Bare IP hosts get a host-only cookie.
fn restore_cookie_string(value: &str, url: &reqwest::Url) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; Max-Age={RESTORED_SESSION_MAX_AGE_SECS}"
    );
    if let Some(host) = url.host_str() {
        if host.parse::<IpAddr>().is_err() && host != "localhost" {
            let domain = host.strip_prefix("www.").unwrap_or(host);
            cookie.push_str(&format!("; Domain=.{domain}"));
        }
    }
    if url.scheme() == "https" {
        cookie.push_str("; Secure");
    }
    cookie
}
