use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the playback core.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform answered with a non-zero status code in its JSON envelope.
    #[error("upstream api error (code {code}): {message}")]
    UpstreamApi { code: i64, message: String },

    /// Network failure or timeout. Never retried here.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with an unexpected HTTP status.
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input, oversized payload or wrong content type.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Declared and actual byte counts disagree, or cannot be compared.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("no playable audio track in upstream response")]
    NoPlayableTrack,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Upstream status code carried by an [`Error::UpstreamApi`].
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::UpstreamApi { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn api(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "unknown upstream error".to_string()
        } else {
            message
        };
        Self::UpstreamApi { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_code_is_only_reported_for_upstream_errors() {
        let err = Error::api(-404, "啥都木有");
        assert_eq!(err.api_code(), Some(-404));
        assert!(err.to_string().contains("-404"));

        assert_eq!(Error::NoPlayableTrack.api_code(), None);
    }

    #[test]
    fn empty_upstream_message_gets_placeholder() {
        let err = Error::api(62002, "  ");
        assert_eq!(
            err.to_string(),
            "upstream api error (code 62002): unknown upstream error"
        );
    }
}
