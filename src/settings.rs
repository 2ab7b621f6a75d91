use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::server::DEFAULT_PROXY_PORT;

// Unified backend settings with persistence support
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    // Local proxy
    pub proxy_port: u16,

    // Outbound HTTP
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub download_timeout_secs: u64,

    // Logging, overridden by RUST_LOG when set
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_port: DEFAULT_PROXY_PORT,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            download_timeout_secs: 300,
            log_level: "info".to_string(),
        }
    }
}

/// Timeouts applied by the upstream client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
    pub download: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Settings::default().timeouts()
    }
}

impl Settings {
    /// Read settings from disk. `Ok(None)` when the file does not exist yet;
    /// an unreadable or malformed file is an error so the caller can report
    /// it once logging is up. Loaded values are clamped by [`Settings::validate`].
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut settings: Settings = serde_json::from_str(&content)?;
        settings.validate();
        Ok(Some(settings))
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), "saved settings");
        Ok(())
    }

    /// Validate and clamp settings to reasonable ranges
    pub fn validate(&mut self) {
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 600);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(1, 120);
        self.download_timeout_secs = self.download_timeout_secs.clamp(10, 3600);

        let level = self.log_level.trim().to_ascii_lowercase();
        self.log_level = match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => level,
            _ => "info".to_string(),
        };
    }

    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            request: Duration::from_secs(self.request_timeout_secs),
            connect: Duration::from_secs(self.connect_timeout_secs),
            download: Duration::from_secs(self.download_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let s = Settings::default();
        assert_eq!(s.proxy_port, 9999);
        assert_eq!(s.timeouts().download, Duration::from_secs(300));
        assert_eq!(s.timeouts().connect, Duration::from_secs(10));
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let mut s = Settings {
            request_timeout_secs: 0,
            download_timeout_secs: 1,
            log_level: "LOUD".to_string(),
            ..Settings::default()
        };
        s.validate();
        assert_eq!(s.request_timeout_secs, 1);
        assert_eq!(s.download_timeout_secs, 10);
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn partial_file_is_completed_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"proxy_port": 18080, "download_timeout_secs": 1}"#).unwrap();

        let loaded = Settings::read(&path).unwrap().unwrap();
        assert_eq!(loaded.proxy_port, 18080);
        assert_eq!(loaded.request_timeout_secs, 30);
        assert_eq!(loaded.download_timeout_secs, 10);

        loaded.save(&path).unwrap();
        assert_eq!(Settings::read(&path).unwrap(), Some(loaded));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(Settings::read(&tmp.path().join("settings.json")).unwrap(), None);
    }

    #[test]
    fn malformed_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::read(&path).unwrap_err(),
            crate::Error::Json(_)
        ));
    }
}
