use std::fmt;
use std::sync::RwLock;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;

/// Name of the platform's session cookie.
pub const SESSION_COOKIE: &str = "SESSDATA";

/// Cookie store shared by every request of a [`super::BiliClient`].
///
/// Wraps reqwest's [`Jar`] so the whole session can be dropped on logout,
/// which the plain jar does not support.
#[derive(Default)]
pub struct SessionJar {
    inner: RwLock<Jar>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a `Set-Cookie` style string as if `url` had sent it.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        if let Ok(jar) = self.inner.read() {
            jar.add_cookie_str(cookie, url);
        }
    }

    /// Value of cookie `name` as it would be sent to `url`.
    pub fn cookie_value(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.cookies(url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// Forget every cookie.
    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut jar) => *jar = Jar::default(),
            Err(poisoned) => *poisoned.into_inner() = Jar::default(),
        }
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        if let Ok(jar) = self.inner.read() {
            jar.set_cookies(cookie_headers, url);
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.inner.read().ok().and_then(|jar| jar.cookies(url))
    }
}

impl fmt::Debug for SessionJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionJar").finish_non_exhaustive()
    }
}
