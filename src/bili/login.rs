use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::BiliClient;
use crate::error::{Error, Result};

/// QR codes are valid for about three minutes upstream.
const QR_LIFETIME_SECS: i64 = 180;

#[derive(Debug, Clone, Serialize)]
pub struct QrCode {
    pub url: String,
    pub qrcode_key: String,
    pub expire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginPollState {
    NotScanned,
    ScannedAwaitingConfirm,
    Expired,
    Success,
    Other { code: i64, message: String },
}

impl LoginPollState {
    fn from_code(code: i64, message: String) -> Self {
        match code {
            0 => Self::Success,
            86038 => Self::Expired,
            86101 => Self::NotScanned,
            86090 => Self::ScannedAwaitingConfirm,
            other => Self::Other {
                code: other,
                message: if message.is_empty() {
                    format!("unknown login state {other}")
                } else {
                    message
                },
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub uid: i64,
    pub username: String,
    pub face: String,
    pub level: i64,
    pub vip_type: i64,
}

#[derive(Debug, Deserialize)]
struct QrGenerateData {
    #[serde(default)]
    url: String,
    #[serde(default)]
    qrcode_key: String,
}

#[derive(Debug, Deserialize)]
struct QrPollData {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavData {
    #[serde(default)]
    is_login: bool,
    #[serde(default)]
    mid: i64,
    #[serde(default)]
    uname: String,
    #[serde(default)]
    face: String,
    #[serde(default, rename = "level_info")]
    level_info: Option<LevelInfo>,
    #[serde(default)]
    vip_type: i64,
}

#[derive(Debug, Deserialize)]
struct LevelInfo {
    #[serde(default)]
    current_level: i64,
}

impl BiliClient {
    pub async fn login_qr_generate(&self) -> Result<QrCode> {
        let url = format!(
            "{}/x/passport-login/web/qrcode/generate",
            self.endpoints().passport_base
        );
        let data: QrGenerateData = self.get_data(&url, &[]).await?;
        Ok(QrCode {
            url: data.url,
            qrcode_key: data.qrcode_key,
            expire_at: Utc::now() + Duration::seconds(QR_LIFETIME_SECS),
        })
    }

    /// One poll of the QR login flow. On success the session cookie has
    /// already landed in the jar.
    pub async fn login_qr_poll(&self, qrcode_key: &str) -> Result<LoginPollState> {
        if qrcode_key.trim().is_empty() {
            return Err(Error::Validation("qrcode key is empty".to_string()));
        }
        let url = format!(
            "{}/x/passport-login/web/qrcode/poll",
            self.endpoints().passport_base
        );
        let data: QrPollData = self
            .get_data(&url, &[("qrcode_key", qrcode_key.to_string())])
            .await?;
        Ok(LoginPollState::from_code(data.code, data.message))
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        if !self.has_session() {
            return Err(Error::NotLoggedIn);
        }
        let url = format!("{}/x/web-interface/nav", self.endpoints().api_base);
        let env = self.get_envelope::<NavData>(&url, &[]).await?;
        // -101: account not logged in
        if env.code == -101 {
            return Err(Error::NotLoggedIn);
        }
        let data = env.into_data()?;
        if !data.is_login {
            return Err(Error::NotLoggedIn);
        }
        Ok(UserInfo {
            uid: data.mid,
            username: data.uname,
            face: data.face,
            level: data.level_info.map(|l| l.current_level).unwrap_or_default(),
            vip_type: data.vip_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_codes_map_to_states() {
        assert_eq!(LoginPollState::from_code(0, String::new()), LoginPollState::Success);
        assert_eq!(LoginPollState::from_code(86038, String::new()), LoginPollState::Expired);
        assert_eq!(
            LoginPollState::from_code(86101, String::new()),
            LoginPollState::NotScanned
        );
        assert_eq!(
            LoginPollState::from_code(86090, String::new()),
            LoginPollState::ScannedAwaitingConfirm
        );
        assert_eq!(
            LoginPollState::from_code(1, String::new()),
            LoginPollState::Other {
                code: 1,
                message: "unknown login state 1".to_string()
            }
        );
    }
}
