//! HTTP client for the video platform's web API.
//!
//! Every request carries a browser user agent and a platform referer; the
//! platform rejects media and API calls without them. All requests share one
//! cookie jar so a login performed through [`login`] authenticates later calls.

pub mod cookies;
pub mod favorite;
pub mod login;
pub mod play;
pub mod search;

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, RANGE, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::settings::HttpTimeouts;

pub use cookies::{SessionJar, SESSION_COOKIE};

pub fn default_user_agent() -> &'static str {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
}

pub fn default_referer() -> &'static str {
    "https://www.bilibili.com/"
}

/// Base URLs of the three platform hosts. Overridable for tests.
#[derive(Debug, Clone)]
pub struct BiliEndpoints {
    pub api_base: String,
    pub passport_base: String,
    pub www_base: String,
}

impl Default for BiliEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            passport_base: "https://passport.bilibili.com".to_string(),
            www_base: "https://www.bilibili.com".to_string(),
        }
    }
}

impl BiliEndpoints {
    /// Point every host at the same base URL.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: base.clone(),
            passport_base: base.clone(),
            www_base: base,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiliClient {
    /// API calls: bounded by the request timeout, compressed bodies allowed.
    http: Client,
    /// Media transfers: no total timeout and no transparent decompression, so
    /// `Content-Length` always describes the bytes we receive.
    media: Client,
    endpoints: BiliEndpoints,
    jar: Arc<SessionJar>,
    timeouts: HttpTimeouts,
}

impl BiliClient {
    pub fn new(timeouts: HttpTimeouts) -> Result<Self> {
        Self::with_endpoints(BiliEndpoints::default(), timeouts)
    }

    pub fn with_endpoints(endpoints: BiliEndpoints, timeouts: HttpTimeouts) -> Result<Self> {
        let jar = Arc::new(SessionJar::new());

        let http = Client::builder()
            .cookie_provider(jar.clone())
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()?;

        let media = Client::builder()
            .cookie_provider(jar.clone())
            .connect_timeout(timeouts.connect)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .gzip(false)
            .brotli(false)
            .build()?;

        Ok(Self {
            http,
            media,
            endpoints,
            jar,
            timeouts,
        })
    }

    pub fn endpoints(&self) -> &BiliEndpoints {
        &self.endpoints
    }

    pub fn jar(&self) -> &SessionJar {
        &self.jar
    }

    pub fn timeouts(&self) -> HttpTimeouts {
        self.timeouts
    }

    /// URL whose cookies decide whether a session exists.
    pub fn session_url(&self) -> Result<Url> {
        Url::parse(&self.endpoints.www_base)
            .map_err(|e| Error::Validation(format!("bad www base url: {e}")))
    }

    /// True when the jar holds a non-empty session cookie for the platform.
    pub fn has_session(&self) -> bool {
        self.session_url()
            .ok()
            .and_then(|url| self.jar.cookie_value(&url, SESSION_COOKIE))
            .is_some_and(|v| !v.is_empty())
    }

    /// GET against a platform CDN. `range` is forwarded verbatim when present.
    pub fn media_get(&self, url: &str, range: Option<&HeaderValue>) -> RequestBuilder {
        let mut req = self
            .media
            .get(url)
            .header(USER_AGENT, default_user_agent())
            .header(REFERER, default_referer());
        if let Some(range) = range {
            req = req.header(RANGE, range.clone());
        }
        req
    }

    /// GET for resources outside the platform (theme images). Bounded by the
    /// request timeout.
    pub fn plain_get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header(USER_AGENT, default_user_agent())
            .header(REFERER, default_referer())
            .header(ORIGIN, "https://www.bilibili.com")
    }

    fn api_headers(&self, referer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(default_user_agent()));
        if let Ok(v) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, v);
        }
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.bilibili.com"));
        headers
    }

    /// GET a JSON envelope and unwrap its `data` field.
    pub(crate) async fn get_data<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.get_envelope::<T>(url, query).await?.into_data()
    }

    pub(crate) async fn get_envelope<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Envelope<T>> {
        let resp = self
            .http
            .get(url)
            .headers(self.api_headers(default_referer()))
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            // Some rejections still carry a coded envelope worth surfacing.
            if let Ok(env) = serde_json::from_str::<Envelope<T>>(&body) {
                if env.code != 0 {
                    return Ok(env);
                }
            }
            return Err(Error::UpstreamStatus(status.as_u16()));
        }
        parse_envelope(&body)
    }
}

/// The `{code, message, data}` wrapper every platform API answers with.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn check(&self) -> Result<()> {
        if self.code != 0 {
            return Err(Error::api(self.code, self.message.clone()));
        }
        Ok(())
    }

    pub fn into_data(self) -> Result<T> {
        self.check()?;
        self.data
            .ok_or_else(|| Error::NotFound("upstream response carried no data".to_string()))
    }
}

pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Envelope<T>> {
    if body.trim_start().starts_with('<') {
        return Err(Error::NotFound(
            "upstream answered with an HTML page".to_string(),
        ));
    }
    Ok(serde_json::from_str(body)?)
}
